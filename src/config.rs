//! Credential configuration: TOML file plus environment overrides
//!
//! The file lives at `~/.vimeo-client.toml` by default:
//!
//! ```toml
//! [app]
//! consumer_key = "..."
//! consumer_secret = "..."
//!
//! [auth]
//! token = "..."
//! token_secret = "..."
//! ```
//!
//! Each field can be overridden by the matching `VIMEO_*` environment
//! variable, and CLI flags override both.
use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::auth::{Credentials, Token};
use crate::error::{Result, VimeoError};

const DEFAULT_CONFIG_FILE: &str = ".vimeo-client.toml";

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    app: AppSection,
    #[serde(default)]
    auth: AuthSection,
}

#[derive(Debug, Default, Deserialize)]
struct AppSection {
    consumer_key: Option<String>,
    consumer_secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthSection {
    token: Option<String>,
    token_secret: Option<String>,
}

/// The merged credential configuration.
#[derive(Debug, Default, Clone)]
pub struct Config {
    pub consumer_key: Option<String>,
    pub consumer_secret: Option<String>,
    pub token: Option<String>,
    pub token_secret: Option<String>,
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(DEFAULT_CONFIG_FILE))
    }

    /// Loads the file at `path`, or the default path when `None`.  A
    /// missing default file yields an empty config; a missing explicit file
    /// is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default())
            }
            Err(e) => return Err(e.into()),
        };
        let file: ConfigFile = toml::from_str(&raw)
            .map_err(|e| VimeoError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(Self {
            consumer_key: file.app.consumer_key,
            consumer_secret: file.app.consumer_secret,
            token: file.auth.token,
            token_secret: file.auth.token_secret,
        })
    }

    /// Applies `VIMEO_*` environment variable overrides.
    pub fn apply_env(mut self) -> Self {
        if let Ok(v) = env::var("VIMEO_CONSUMER_KEY") {
            self.consumer_key = Some(v);
        }
        if let Ok(v) = env::var("VIMEO_CONSUMER_SECRET") {
            self.consumer_secret = Some(v);
        }
        if let Ok(v) = env::var("VIMEO_TOKEN") {
            self.token = Some(v);
        }
        if let Ok(v) = env::var("VIMEO_TOKEN_SECRET") {
            self.token_secret = Some(v);
        }
        self
    }

    /// The consumer credentials, required for any call at all.
    pub fn credentials(&self) -> Result<Credentials> {
        match (&self.consumer_key, &self.consumer_secret) {
            (Some(key), Some(secret)) => Ok(Credentials::new(key, secret)),
            (None, _) => Err(VimeoError::MissingCredentials("consumer_key")),
            (_, None) => Err(VimeoError::MissingCredentials("consumer_secret")),
        }
    }

    /// The stored access token, when both halves are present.
    pub fn access_token(&self) -> Option<Token> {
        match (&self.token, &self.token_secret) {
            (Some(key), Some(secret)) => Some(Token::new(key, secret)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use all_asserts::assert_true;
    use serial_test::serial;

    use super::*;

    fn clear_env() {
        for var in [
            "VIMEO_CONSUMER_KEY",
            "VIMEO_CONSUMER_SECRET",
            "VIMEO_TOKEN",
            "VIMEO_TOKEN_SECRET",
        ] {
            env::remove_var(var);
        }
    }

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    #[serial]
    fn loads_sections_from_toml() {
        clear_env();
        let file = write_config(
            r#"
[app]
consumer_key = "ck"
consumer_secret = "cs"

[auth]
token = "tk"
token_secret = "ts"
"#,
        );
        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.credentials().unwrap().key(), "ck");
        let token = config.access_token().unwrap();
        assert_eq!(token.key(), "tk");
        assert_eq!(token.secret(), "ts");
    }

    #[test]
    #[serial]
    fn partial_file_leaves_token_absent() {
        clear_env();
        let file = write_config("[app]\nconsumer_key = \"ck\"\nconsumer_secret = \"cs\"\n");
        let config = Config::load(Some(file.path())).unwrap();
        assert_true!(config.access_token().is_none());
    }

    #[test]
    #[serial]
    fn env_overrides_file_values() {
        clear_env();
        let file = write_config("[app]\nconsumer_key = \"from-file\"\nconsumer_secret = \"cs\"\n");
        env::set_var("VIMEO_CONSUMER_KEY", "from-env");
        let config = Config::load(Some(file.path())).unwrap().apply_env();
        assert_eq!(config.consumer_key.as_deref(), Some("from-env"));
        assert_eq!(config.consumer_secret.as_deref(), Some("cs"));
        clear_env();
    }

    #[test]
    #[serial]
    fn missing_consumer_credentials_are_reported() {
        clear_env();
        let config = Config::default();
        let err = config.credentials().unwrap_err();
        assert!(matches!(err, VimeoError::MissingCredentials("consumer_key")));
    }

    #[test]
    #[serial]
    fn missing_explicit_file_is_an_error() {
        clear_env();
        let err = Config::load(Some(Path::new("/nonexistent/vimeo.toml"))).unwrap_err();
        assert!(matches!(err, VimeoError::Io(_)));
    }

    #[test]
    #[serial]
    fn unparsable_file_is_a_config_error() {
        clear_env();
        let file = write_config("not = valid = toml");
        let err = Config::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, VimeoError::Config(_)));
    }
}
