//! Source and destination profile resolution.
//!
//! Zen Browser keeps Mozilla-style profiles listed in `profiles.ini`; the
//! default profile owns the `places.sqlite` this tool merges into. Chrome
//! profiles are plain directories under the user data dir.

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A destination browser profile. Resolved once per pipeline run and
/// treated as read-only afterwards.
#[derive(Debug, Clone)]
pub struct BrowserProfile {
    pub name: String,
    pub path: PathBuf,
    pub is_default: bool,
}

impl BrowserProfile {
    pub fn places_db(&self) -> PathBuf {
        self.path.join("places.sqlite")
    }
}

/// Locations of the Chrome stores this migration reads.
#[derive(Debug, Clone)]
pub struct ChromeStores {
    pub login_data: PathBuf,
    pub local_state: PathBuf,
    pub bookmarks: PathBuf,
    pub history: PathBuf,
}

impl ChromeStores {
    /// Resolve store paths inside a Chrome user data directory.
    ///
    /// `Local State` lives beside the profile directories, everything else
    /// inside the named profile.
    pub fn resolve(user_data_dir: &Path, profile: &str) -> Self {
        let profile_dir = user_data_dir.join(profile);
        Self {
            login_data: profile_dir.join("Login Data"),
            local_state: user_data_dir.join("Local State"),
            bookmarks: profile_dir.join("Bookmarks"),
            history: profile_dir.join("History"),
        }
    }
}

/// Parse `profiles.ini` and list the profiles it declares.
///
/// Relative paths are resolved against the ini's directory. Sections that
/// declare no `Path` are ignored.
pub fn detect_profiles(user_data_dir: &Path) -> Result<Vec<BrowserProfile>> {
    let ini_path = user_data_dir.join("profiles.ini");
    if !ini_path.exists() {
        return scan_profile_dirs(user_data_dir);
    }

    let content = std::fs::read_to_string(&ini_path)?;
    let mut profiles = Vec::new();
    let mut name = String::new();
    let mut path: Option<String> = None;
    let mut is_relative = true;
    let mut is_default = false;
    let mut in_profile_section = false;

    let flush = |name: &mut String,
                     path: &mut Option<String>,
                     is_relative: bool,
                     is_default: bool,
                     profiles: &mut Vec<BrowserProfile>| {
        if let Some(p) = path.take() {
            let resolved = if is_relative {
                user_data_dir.join(&p)
            } else {
                PathBuf::from(&p)
            };
            profiles.push(BrowserProfile {
                name: std::mem::take(name),
                path: resolved,
                is_default,
            });
        } else {
            name.clear();
        }
    };

    for line in content.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            if in_profile_section {
                flush(&mut name, &mut path, is_relative, is_default, &mut profiles);
            }
            in_profile_section = line.starts_with("[Profile");
            is_relative = true;
            is_default = false;
            continue;
        }
        if !in_profile_section {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            match key.trim() {
                "Name" => name = value.trim().to_string(),
                "Path" => path = Some(value.trim().to_string()),
                "IsRelative" => is_relative = value.trim() != "0",
                "Default" => is_default = value.trim() == "1",
                _ => {}
            }
        }
    }
    if in_profile_section {
        flush(&mut name, &mut path, is_relative, is_default, &mut profiles);
    }

    debug!("Found {} profile(s) in {:?}", profiles.len(), ini_path);
    Ok(profiles)
}

/// Fallback when no `profiles.ini` exists: any directory holding a
/// `places.sqlite` is a usable profile.
fn scan_profile_dirs(user_data_dir: &Path) -> Result<Vec<BrowserProfile>> {
    let profiles_dir = user_data_dir.join("Profiles");
    let scan_root = if profiles_dir.is_dir() {
        profiles_dir
    } else {
        user_data_dir.to_path_buf()
    };
    if !scan_root.is_dir() {
        return Ok(Vec::new());
    }

    let mut profiles = Vec::new();
    for dir_entry in std::fs::read_dir(&scan_root)? {
        let path = dir_entry?.path();
        if path.is_dir() && path.join("places.sqlite").exists() {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let is_default = name.ends_with(".default") || name.ends_with(".default-release");
            profiles.push(BrowserProfile { name, path, is_default });
        }
    }
    Ok(profiles)
}

/// Resolve the profile a migration should target: the declared default,
/// else the only candidate, else an error.
pub fn default_profile(user_data_dir: &Path) -> Result<BrowserProfile> {
    let profiles = detect_profiles(user_data_dir)?;
    if profiles.is_empty() {
        return Err(anyhow!(
            "No Zen Browser profile found under {:?}",
            user_data_dir
        ));
    }
    Ok(profiles
        .iter()
        .find(|p| p.is_default)
        .cloned()
        .unwrap_or_else(|| profiles[0].clone()))
}
