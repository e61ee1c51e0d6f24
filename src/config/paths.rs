//! Hatch root directory resolution and derived file locations.
//!
//! Everything the daemon persists lives under a single root: the config
//! file, the certificate material, the rotated log files and the PID file.

use std::env;
use std::path::{Path, PathBuf};

/// Environment variable overriding the Hatch root directory.
pub const HOME_ENV: &str = "HATCH_HOME";

const ROOT_DIR_NAME: &str = ".hatch";
const CONFIG_FILE_NAME: &str = "config.yml";
const CERTS_DIR_NAME: &str = "certs";
const LOGS_DIR_NAME: &str = "logs";
const LOG_FILE_NAME: &str = "hatch.log";
const PID_FILE_NAME: &str = "hatch.pid";

/// Resolved filesystem layout for one Hatch installation.
#[derive(Debug, Clone)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    /// Resolve the root from the environment: `$HATCH_HOME` when set,
    /// otherwise `$HOME/.hatch`. A relative override is made absolute
    /// against the current working directory.
    pub fn from_env() -> Self {
        let root = match env::var_os(HOME_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => match env::var_os("HOME") {
                Some(home) => Path::new(&home).join(ROOT_DIR_NAME),
                None => PathBuf::from(".").join(ROOT_DIR_NAME),
            },
        };
        Self::at(root)
    }

    /// Use an explicit root directory (CLI flag, tests).
    pub fn at<P: Into<PathBuf>>(root: P) -> Self {
        let root = root.into();
        let root = if root.is_relative() {
            env::current_dir().map(|cwd| cwd.join(&root)).unwrap_or(root)
        } else {
            root
        };
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The main config file, `<root>/config.yml`.
    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    /// The directory containing the config file. The watcher observes this
    /// directory rather than the file itself to survive editor
    /// replace-on-save patterns.
    pub fn config_dir(&self) -> &Path {
        &self.root
    }

    pub fn certs_dir(&self) -> PathBuf {
        self.root.join(CERTS_DIR_NAME)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_DIR_NAME)
    }

    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join(LOG_FILE_NAME)
    }

    pub fn pid_file(&self) -> PathBuf {
        self.root.join(PID_FILE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_root_layout() {
        let paths = Paths::at("/tmp/hatch-test");
        assert_eq!(paths.config_file(), PathBuf::from("/tmp/hatch-test/config.yml"));
        assert_eq!(paths.certs_dir(), PathBuf::from("/tmp/hatch-test/certs"));
        assert_eq!(paths.log_file(), PathBuf::from("/tmp/hatch-test/logs/hatch.log"));
        assert_eq!(paths.pid_file(), PathBuf::from("/tmp/hatch-test/hatch.pid"));
        assert_eq!(paths.config_dir(), Path::new("/tmp/hatch-test"));
    }

    #[test]
    fn test_relative_root_is_absolutized() {
        let paths = Paths::at("relative-root");
        assert!(paths.root().is_absolute());
        assert!(paths.root().ends_with("relative-root"));
    }
}
