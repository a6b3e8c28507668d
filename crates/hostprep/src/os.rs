//! Target operating system selection.

use dialoguer::{theme::ColorfulTheme, Select};
use serde::{Deserialize, Serialize};
use sysinfo::System;

/// Host operating system family being provisioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    ArchLinux,
    CentOs,
    Debian,
    Fedora,
    MacOs,
    Ubuntu,
    Windows,
}

impl OsFamily {
    /// All supported families, in selection-menu order.
    pub const ALL: [Self; 7] = [
        Self::ArchLinux,
        Self::CentOs,
        Self::Debian,
        Self::Fedora,
        Self::MacOs,
        Self::Ubuntu,
        Self::Windows,
    ];

    /// Lowercase token for this family.
    #[must_use]
    pub fn token(self) -> &'static str {
        match self {
            Self::ArchLinux => "archlinux",
            Self::CentOs => "centos",
            Self::Debian => "debian",
            Self::Fedora => "fedora",
            Self::MacOs => "macos",
            Self::Ubuntu => "ubuntu",
            Self::Windows => "windows",
        }
    }

    /// Detect the family of the machine we are running on.
    ///
    /// Returns `None` for unrecognised Linux distributions and other platforms.
    #[must_use]
    pub fn detect() -> Option<Self> {
        match std::env::consts::OS {
            "windows" => Some(Self::Windows),
            "macos" => Some(Self::MacOs),
            "linux" => Self::from_distribution_id(&System::distribution_id()),
            _ => None,
        }
    }

    /// Map an os-release `ID` to a family.
    #[must_use]
    pub fn from_distribution_id(id: &str) -> Option<Self> {
        match id.trim().to_lowercase().as_str() {
            "arch" | "archlinux" | "manjaro" | "endeavouros" => Some(Self::ArchLinux),
            "centos" | "rhel" | "rocky" | "almalinux" => Some(Self::CentOs),
            "debian" => Some(Self::Debian),
            "fedora" => Some(Self::Fedora),
            "ubuntu" | "pop" | "linuxmint" => Some(Self::Ubuntu),
            _ => None,
        }
    }

    /// Prompt the operator to pick a family, pre-selecting `default` when given.
    ///
    /// # Errors
    ///
    /// Returns an error if the terminal prompt fails.
    pub fn select_interactive(default: Option<Self>) -> anyhow::Result<Self> {
        let items: Vec<&str> = Self::ALL.iter().map(|f| f.token()).collect();
        let default_idx = default
            .and_then(|d| Self::ALL.iter().position(|f| *f == d))
            .unwrap_or(0);

        let idx = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("Select the operating system to provision")
            .items(&items)
            .default(default_idx)
            .interact()?;

        Ok(Self::ALL[idx])
    }
}

impl std::fmt::Display for OsFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.token())
    }
}

impl std::str::FromStr for OsFamily {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|f| f.token() == token)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown operating system: {s}. Supported: archlinux, centos, debian, fedora, macos, ubuntu, windows"
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_parsing() {
        for family in OsFamily::ALL {
            assert_eq!(family.token().parse::<OsFamily>().unwrap(), family);
        }
        assert_eq!("Ubuntu".parse::<OsFamily>().unwrap(), OsFamily::Ubuntu);
        assert!("solaris".parse::<OsFamily>().is_err());
    }

    #[test]
    fn test_serde_uses_tokens() {
        let json = serde_json::to_string(&OsFamily::ArchLinux).unwrap();
        assert_eq!(json, "\"archlinux\"");
        let parsed: OsFamily = serde_json::from_str("\"centos\"").unwrap();
        assert_eq!(parsed, OsFamily::CentOs);
    }

    #[test]
    fn test_distribution_ids() {
        assert_eq!(OsFamily::from_distribution_id("arch"), Some(OsFamily::ArchLinux));
        assert_eq!(OsFamily::from_distribution_id("rocky"), Some(OsFamily::CentOs));
        assert_eq!(OsFamily::from_distribution_id("ubuntu\n"), Some(OsFamily::Ubuntu));
        assert_eq!(OsFamily::from_distribution_id("nixos"), None);
    }
}
