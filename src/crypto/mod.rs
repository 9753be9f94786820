//! Crypto module for Chrome credential recovery.

pub mod chromium;

pub use chromium::{decrypt_row, obtain_master_key, DecryptError, DecryptScheme, MasterKey};
