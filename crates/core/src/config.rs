//! Client configuration.
//!
//! Settings are resolved from three layers, lowest precedence first:
//! built-in defaults, the JSON file `<config dir>/config`, and explicit
//! overrides (command-line flags or environment variables).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::CoreError;

/// Default salt-api origin.
pub const DEFAULT_SERVER: &str = "https://salt:8000";
/// Default external authentication module.
pub const DEFAULT_EAUTH: &str = "pam";
/// Default upper bound on how long to wait for results.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
/// Default delay between two polls of the same job.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;

/// Name of the optional settings file inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config";
/// Name of the cached session token file inside the config directory.
pub const TOKEN_FILE_NAME: &str = "token";

const APP_DIR_NAME: &str = "saltctl";

/// Contents of `<config dir>/config`.
///
/// Every key is optional and unknown keys are ignored:
///
/// ```json
/// {"server": "https://salt:8000", "user": "ops", "timeout": 30, "eauth": "ldap"}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FileConfig {
    pub server: Option<String>,
    pub user: Option<String>,
    /// Seconds to wait for results. Fractions are accepted.
    pub timeout: Option<f64>,
    pub eauth: Option<String>,
    /// Seconds between job polls. Fractions are accepted.
    pub poll_interval: Option<f64>,
}

impl FileConfig {
    /// Read `<dir>/config` if it exists.
    ///
    /// A missing file is not an error; a file that is not valid JSON (or
    /// has values of the wrong type) is.
    pub fn load(dir: &Path) -> Result<Option<Self>, CoreError> {
        let path = dir.join(CONFIG_FILE_NAME);
        if !path.is_file() {
            return Ok(None);
        }

        let raw = std::fs::read_to_string(&path)?;
        let parsed = serde_json::from_str(&raw)
            .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))?;
        Ok(Some(parsed))
    }
}

/// Values given explicitly on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub server: Option<String>,
    pub user: Option<String>,
    pub eauth: Option<String>,
    pub timeout_secs: Option<f64>,
    pub poll_interval_secs: Option<f64>,
}

/// Fully resolved client settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Directory holding `config` and the cached `token`.
    pub config_dir: PathBuf,
    /// salt-api origin, e.g. `https://salt:8000`.
    pub server: String,
    /// Username sent to `/login`.
    pub user: String,
    /// eauth module name sent to `/login`.
    pub eauth: String,
    /// How long the caller waits for results before giving up.
    pub timeout: Duration,
    /// Delay between polls of one job.
    pub poll_interval: Duration,
}

impl Settings {
    /// Merge overrides over the config file over the built-in defaults.
    ///
    /// | Setting         | Default                         |
    /// |-----------------|---------------------------------|
    /// | `server`        | `https://salt:8000`             |
    /// | `user`          | `$USER`                         |
    /// | `eauth`         | `pam`                           |
    /// | `timeout`       | `60` seconds                    |
    /// | `poll_interval` | `2` seconds                     |
    pub fn resolve(
        config_dir: PathBuf,
        overrides: SettingsOverrides,
        file: Option<FileConfig>,
    ) -> Result<Self, CoreError> {
        let file = file.unwrap_or_default();

        let server = overrides
            .server
            .or(file.server)
            .unwrap_or_else(|| DEFAULT_SERVER.to_string());
        let user = overrides
            .user
            .or(file.user)
            .unwrap_or_else(default_user);
        let eauth = overrides
            .eauth
            .or(file.eauth)
            .unwrap_or_else(|| DEFAULT_EAUTH.to_string());

        let timeout = match overrides.timeout_secs.or(file.timeout) {
            Some(secs) => seconds("timeout", secs)?,
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };
        let poll_interval = match overrides.poll_interval_secs.or(file.poll_interval) {
            Some(secs) => seconds("poll_interval", secs)?,
            None => Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        };
        if poll_interval.is_zero() {
            return Err(CoreError::Validation(
                "poll_interval must be greater than zero".into(),
            ));
        }

        if server.trim().is_empty() {
            return Err(CoreError::Validation("server must not be empty".into()));
        }

        Ok(Self {
            config_dir,
            server,
            user,
            eauth,
            timeout,
            poll_interval,
        })
    }

    /// Path of the cached session token.
    pub fn token_path(&self) -> PathBuf {
        self.config_dir.join(TOKEN_FILE_NAME)
    }
}

/// `<platform config dir>/saltctl`, e.g. `~/.config/saltctl` on Linux.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(".config"))
        .join(APP_DIR_NAME)
}

fn default_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default()
}

fn seconds(name: &str, secs: f64) -> Result<Duration, CoreError> {
    Duration::try_from_secs_f64(secs).map_err(|_| {
        CoreError::Validation(format!(
            "{name} must be a non-negative number of seconds, got {secs}"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn dir() -> PathBuf {
        PathBuf::from("/tmp/saltctl-test")
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let settings = Settings::resolve(dir(), SettingsOverrides::default(), None).unwrap();
        assert_eq!(settings.server, DEFAULT_SERVER);
        assert_eq!(settings.eauth, DEFAULT_EAUTH);
        assert_eq!(settings.timeout, Duration::from_secs(60));
        assert_eq!(settings.poll_interval, Duration::from_secs(2));
        assert_eq!(settings.token_path(), dir().join("token"));
    }

    #[test]
    fn file_values_override_defaults() {
        let file = FileConfig {
            server: Some("https://master:8000".into()),
            user: Some("ops".into()),
            timeout: Some(15.0),
            eauth: Some("ldap".into()),
            poll_interval: None,
        };
        let settings = Settings::resolve(dir(), SettingsOverrides::default(), Some(file)).unwrap();
        assert_eq!(settings.server, "https://master:8000");
        assert_eq!(settings.user, "ops");
        assert_eq!(settings.eauth, "ldap");
        assert_eq!(settings.timeout, Duration::from_secs(15));
    }

    #[test]
    fn explicit_overrides_beat_the_file() {
        let file = FileConfig {
            server: Some("https://from-file:8000".into()),
            timeout: Some(15.0),
            ..Default::default()
        };
        let overrides = SettingsOverrides {
            server: Some("https://from-flag:8000".into()),
            timeout_secs: Some(5.0),
            ..Default::default()
        };
        let settings = Settings::resolve(dir(), overrides, Some(file)).unwrap();
        assert_eq!(settings.server, "https://from-flag:8000");
        assert_eq!(settings.timeout, Duration::from_secs(5));
    }

    #[test]
    fn negative_timeout_is_rejected() {
        let overrides = SettingsOverrides {
            timeout_secs: Some(-1.0),
            ..Default::default()
        };
        let err = Settings::resolve(dir(), overrides, None).unwrap_err();
        assert_matches!(err, CoreError::Validation(_));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let overrides = SettingsOverrides {
            poll_interval_secs: Some(0.0),
            ..Default::default()
        };
        let err = Settings::resolve(dir(), overrides, None).unwrap_err();
        assert_matches!(err, CoreError::Validation(msg) if msg.contains("poll_interval"));
    }

    #[test]
    fn missing_config_file_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(FileConfig::load(tmp.path()).unwrap(), None);
    }

    #[test]
    fn config_file_ignores_unknown_keys() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILE_NAME),
            r#"{"server": "https://salt.example:8000", "timeout": 30, "colour": "always"}"#,
        )
        .unwrap();

        let file = FileConfig::load(tmp.path()).unwrap().unwrap();
        assert_eq!(file.server.as_deref(), Some("https://salt.example:8000"));
        assert_eq!(file.timeout, Some(30.0));
        assert_eq!(file.user, None);
    }

    #[test]
    fn malformed_config_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE_NAME), r#"{"timeout": "soon"}"#).unwrap();

        let err = FileConfig::load(tmp.path()).unwrap_err();
        assert_matches!(err, CoreError::Config(_));
    }
}
