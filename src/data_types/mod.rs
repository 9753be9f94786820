//! Data types moved by the migration: credentials, bookmarks, history.

pub mod bookmark;
pub mod history;
pub mod password;

pub use bookmark::{parse_bookmark_tree, parse_netscape_html, to_netscape_html, BookmarkNode};
pub use history::{extract_history, stage_history, HistoryEntry};
pub use password::{extract_credentials, parse_credential_csv, write_credential_csv, Credential, CredentialBatch};
