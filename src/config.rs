use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub const PATH_VAR: &str = "LISPY_PATH";
pub const HISTORY_VAR: &str = "LISPY_HISTORY";
pub const EDIT_MODE_VAR: &str = "LISPY_EDIT_MODE";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Invalid edit mode '{0}', expected 'vi' or 'emacs'")]
    InvalidEditMode(String),
}

/// Key bindings used by the REPL line editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EditMode {
    #[default]
    Vi,
    Emacs,
}

impl FromStr for EditMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vi" => Ok(EditMode::Vi),
            "emacs" => Ok(EditMode::Emacs),
            _ => Err(ConfigError::InvalidEditMode(s.to_string())),
        }
    }
}

impl fmt::Display for EditMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditMode::Vi => write!(f, "vi"),
            EditMode::Emacs => write!(f, "emacs"),
        }
    }
}

/// Settings shared by the script runner and the REPL.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directories searched, in order, when a module is imported.
    pub load_paths: Vec<PathBuf>,
    pub history_file: PathBuf,
    pub edit_mode: EditMode,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            load_paths: vec![PathBuf::from(".")],
            history_file: PathBuf::from("lispy_history.txt"),
            edit_mode: EditMode::default(),
        }
    }
}

impl Config {
    /// Defaults overridden by `LISPY_PATH`, `LISPY_HISTORY` and `LISPY_EDIT_MODE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var_os(key))
    }

    /// Like `from_env`, reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let mut config = Config::default();
        if let Some(paths) = lookup(PATH_VAR) {
            // Entries from the environment are searched before the defaults.
            let mut load_paths: Vec<PathBuf> = std::env::split_paths(&paths)
                .filter(|path| !path.as_os_str().is_empty())
                .collect();
            load_paths.append(&mut config.load_paths);
            config.load_paths = load_paths;
        }
        if let Some(history) = lookup(HISTORY_VAR)
            && !history.is_empty()
        {
            config.history_file = PathBuf::from(history);
        }
        if let Some(mode) = lookup(EDIT_MODE_VAR) {
            config.edit_mode = mode.to_string_lossy().parse()?;
        }
        Ok(config)
    }

    pub fn with_load_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.load_paths.push(path.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, OsString> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), OsString::from(v)))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.load_paths, vec![PathBuf::from(".")]);
        assert_eq!(config.history_file, PathBuf::from("lispy_history.txt"));
        assert_eq!(config.edit_mode, EditMode::Vi);
        assert_eq!(config_from(&[]).unwrap(), config);
    }

    #[test]
    fn test_load_paths_are_prepended() {
        let joined = std::env::join_paths(["lib", "vendor/lispy"]).unwrap();
        let config = config_from(&[(PATH_VAR, joined.to_str().unwrap())]).unwrap();
        assert_eq!(
            config.load_paths,
            vec![
                PathBuf::from("lib"),
                PathBuf::from("vendor/lispy"),
                PathBuf::from(".")
            ]
        );
    }

    #[test]
    fn test_history_and_edit_mode() {
        let config = config_from(&[(HISTORY_VAR, "/tmp/hist"), (EDIT_MODE_VAR, "Emacs")]).unwrap();
        assert_eq!(config.history_file, PathBuf::from("/tmp/hist"));
        assert_eq!(config.edit_mode, EditMode::Emacs);

        let config = config_from(&[(HISTORY_VAR, "")]).unwrap();
        assert_eq!(config.history_file, PathBuf::from("lispy_history.txt"));
    }

    #[test]
    fn test_invalid_edit_mode() {
        assert_eq!(
            config_from(&[(EDIT_MODE_VAR, "nano")]),
            Err(ConfigError::InvalidEditMode("nano".to_string()))
        );
    }

    #[test]
    fn test_with_load_path() {
        let config = Config::default().with_load_path("modules");
        assert_eq!(
            config.load_paths,
            vec![PathBuf::from("."), PathBuf::from("modules")]
        );
    }
}
