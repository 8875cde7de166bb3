//! Host platform detection.
use std::fmt;

use serde::{Deserialize, Serialize};

/// Platform a run targets.
///
/// Contributions may be restricted to a set of platforms; detection only
/// distinguishes the platforms units actually branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// macOS.
    Macos,
    /// Ubuntu (and Debian derivatives reporting `ID_LIKE=ubuntu`).
    Ubuntu,
    /// Amazon Linux 2.
    Al2,
    /// Anything else.
    Unknown,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Macos => write!(f, "macos"),
            Self::Ubuntu => write!(f, "ubuntu"),
            Self::Al2 => write!(f, "al2"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl Platform {
    /// Detect the current platform.
    #[must_use]
    pub fn detect() -> Self {
        if cfg!(target_os = "macos") {
            return Self::Macos;
        }
        if cfg!(target_os = "linux") {
            return std::fs::read_to_string("/etc/os-release")
                .map_or(Self::Unknown, |contents| Self::from_os_release(&contents));
        }
        Self::Unknown
    }

    /// Classify a Linux host from the contents of `/etc/os-release`.
    #[must_use]
    pub fn from_os_release(contents: &str) -> Self {
        let mut id = "";
        let mut id_like = "";
        let mut version_id = "";
        for line in contents.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"');
            match key.trim() {
                "ID" => id = value,
                "ID_LIKE" => id_like = value,
                "VERSION_ID" => version_id = value,
                _ => {}
            }
        }

        match id {
            "ubuntu" => Self::Ubuntu,
            "amzn" if version_id == "2" => Self::Al2,
            _ if id_like.split_whitespace().any(|l| l == "ubuntu") => Self::Ubuntu,
            _ => Self::Unknown,
        }
    }
}
