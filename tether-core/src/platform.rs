//! Platform detection and OS-specific directories.

use std::path::PathBuf;

use crate::constants::APP_NAME;
use crate::error::{TetherError, TetherResult};

/// Detected operating system platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

impl Platform {
    /// Detect the current platform at compile time.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }

    /// Platform-specific data directory, used for logs.
    ///
    /// - Windows: `%APPDATA%/tether`
    /// - macOS: `~/Library/Application Support/tether`
    /// - Linux: `~/.local/share/tether`
    pub fn data_dir() -> TetherResult<PathBuf> {
        let base = dirs::data_dir()
            .ok_or_else(|| TetherError::Config("could not determine data directory".into()))?;
        Ok(base.join(APP_NAME))
    }

    /// Platform-specific configuration directory.
    ///
    /// - Linux: `~/.config/tether`
    pub fn config_dir() -> TetherResult<PathBuf> {
        let base = dirs::config_dir()
            .ok_or_else(|| TetherError::Config("could not determine config directory".into()))?;
        Ok(base.join(APP_NAME))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Platform::Windows => "Windows",
            Platform::MacOs => "macOS",
            Platform::Linux => "Linux",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_name() {
        assert_eq!(Platform::Windows.name(), "Windows");
        assert_eq!(Platform::MacOs.to_string(), "macOS");
        assert!(matches!(
            Platform::current(),
            Platform::Windows | Platform::MacOs | Platform::Linux
        ));
    }
}
