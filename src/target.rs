// Mount targets: a directory on Unix-like systems, a drive letter on Windows.

use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::LaunchError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountTarget {
    Directory(PathBuf),
    /// Upper-case drive letter, rendered as `X:`
    Drive(char),
}

impl MountTarget {
    /// Parse a drive letter as typed by the user (`e`, `E`, `E:`).
    pub fn drive(input: &str) -> Option<Self> {
        let trimmed = input.trim().trim_end_matches(':');
        let mut chars = trimmed.chars();
        match (chars.next(), chars.next()) {
            (Some(letter), None) if letter.is_ascii_alphabetic() => {
                Some(MountTarget::Drive(letter.to_ascii_uppercase()))
            }
            _ => None,
        }
    }

    pub fn directory(path: impl Into<PathBuf>) -> Self {
        MountTarget::Directory(path.into())
    }

    pub fn as_arg(&self) -> OsString {
        match self {
            MountTarget::Directory(path) => path.clone().into_os_string(),
            MountTarget::Drive(letter) => format!("{}:", letter).into(),
        }
    }

    /// Create the mount directory if it does not exist yet.
    pub fn prepare(&self) -> io::Result<()> {
        match self {
            MountTarget::Directory(path) => std::fs::create_dir_all(path),
            MountTarget::Drive(_) => Ok(()),
        }
    }

    /// Reject targets the helper cannot possibly use.
    pub fn validate(&self) -> Result<(), LaunchError> {
        match self {
            MountTarget::Directory(path) => {
                if path.as_os_str().is_empty() {
                    return Err(self.invalid("empty path"));
                }
                if path.exists() && !path.is_dir() {
                    return Err(self.invalid("not a directory"));
                }
                if !path.exists() {
                    return Err(self.invalid("directory does not exist"));
                }
                Ok(())
            }
            MountTarget::Drive(letter) => {
                if letter.is_ascii_uppercase() {
                    Ok(())
                } else {
                    Err(self.invalid("drive letter must be A-Z"))
                }
            }
        }
    }

    fn invalid(&self, reason: &str) -> LaunchError {
        LaunchError::InvalidTarget {
            target: self.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for MountTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountTarget::Directory(path) => write!(f, "{}", path.display()),
            MountTarget::Drive(letter) => write!(f, "{}:", letter),
        }
    }
}

/// Drive letters not currently in use. Empty on non-Windows systems.
pub fn available_drive_letters() -> Vec<char> {
    if !cfg!(windows) {
        return Vec::new();
    }

    ('A'..='Z')
        .filter(|letter| !Path::new(&format!("{}:\\", letter)).exists())
        .collect()
}
