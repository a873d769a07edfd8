//! Configuration file discovery and reading.
//!
//! # File Formats
//!
//! Both JSON5 (`.json5`, with comments and trailing commas) and plain JSON
//! are accepted; the JSON5 parser handles both.
//!
//! # File Locations
//!
//! Configuration is searched in the following order:
//!
//! 1. Path named by the `CONTRIBMATCH_CONFIG` environment variable
//! 2. Local: `./contribmatch.json5` or `./contribmatch.json`
//! 3. User: `~/.config/contribmatch/config.json5` or `~/.config/contribmatch/config.json`

use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV_VAR: &str = "CONTRIBMATCH_CONFIG";

/// Configuration file names to search for, in priority order.
const CONFIG_FILE_NAMES: &[&str] = &["contribmatch.json5", "contribmatch.json"];

/// User config directory name.
const USER_CONFIG_DIR: &str = "contribmatch";

/// User config file names to search for, in priority order.
const USER_CONFIG_FILE_NAMES: &[&str] = &["config.json5", "config.json"];

/// Finds the configuration file path.
///
/// Returns `Some(path)` if a config file is found, `None` otherwise. A path
/// named by `CONTRIBMATCH_CONFIG` is returned even if it does not exist, so
/// that a typo surfaces as a read error instead of silently falling back.
#[must_use]
pub fn find_config_file() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV_VAR).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }

    let local = CONFIG_FILE_NAMES.iter().map(PathBuf::from);
    let user = dirs::config_dir()
        .map(|dir| {
            USER_CONFIG_FILE_NAMES
                .iter()
                .map(|name| dir.join(USER_CONFIG_DIR).join(name))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    first_existing(local.chain(user))
}

fn first_existing(candidates: impl IntoIterator<Item = PathBuf>) -> Option<PathBuf> {
    candidates.into_iter().find(|path| path.exists())
}

/// Reads and parses a configuration file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or its content cannot be
/// parsed into `T`.
///
/// # Examples
///
/// ```no_run
/// use contribmatch_config::ClientConfig;
/// use contribmatch_config::persistence::read_config_file;
///
/// # fn main() -> contribmatch_config::Result<()> {
/// let config: ClientConfig = read_config_file("contribmatch.json5")?;
/// # Ok(())
/// # }
/// ```
pub fn read_config_file<T: serde::de::DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    serde_json5::from_str(&content).map_err(ConfigError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Deserialize)]
    struct TestConfig {
        name: String,
        value: i32,
    }

    #[test]
    fn read_json_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.json");
        std::fs::write(&path, r#"{"name": "test", "value": 42}"#).unwrap();

        let config: TestConfig = read_config_file(&path).unwrap();
        assert_eq!(config.name, "test");
        assert_eq!(config.value, 42);
    }

    #[test]
    fn read_json5_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.json5");
        std::fs::write(
            &path,
            r#"
            {
                // This is a comment
                name: "test",
                value: 42,  // trailing comma
            }
            "#,
        )
        .unwrap();

        let config: TestConfig = read_config_file(&path).unwrap();
        assert_eq!(config.name, "test");
        assert_eq!(config.value, 42);
    }

    #[test]
    fn read_nonexistent_file() {
        let result: Result<TestConfig> = read_config_file("/nonexistent/path.json");
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    fn read_invalid_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("invalid.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result: Result<TestConfig> = read_config_file(&path);
        assert!(matches!(result, Err(ConfigError::ParseJson5(_))));
    }

    #[test]
    fn first_existing_skips_missing_paths() {
        let dir = TempDir::new().unwrap();
        let present = dir.path().join("config.json");
        std::fs::write(&present, "{}").unwrap();

        let found = first_existing([dir.path().join("missing.json5"), present.clone()]);
        assert_eq!(found, Some(present));

        assert!(first_existing([dir.path().join("missing.json5")]).is_none());
    }
}
