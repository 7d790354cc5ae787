use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use dotenvy::dotenv;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use url::Url;

pub const KEYRING_SERVICE: &str = "cloudfrog-admin-token";
pub const KEYRING_USER: &str = "CloudFrog";

pub const DEFAULT_API_URL: &str = "http://localhost:8080";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct ConfigFile {
    pub api_url: Option<Url>,
    /// humantime duration, e.g. `90s` or `2m`
    pub timeout: Option<String>,
    pub download_dir: Option<PathBuf>,
}

/// Read from `CLOUDFROG_*` environment variables.
#[derive(Deserialize, Default)]
pub struct ConfigEnv {
    pub api_url: Option<Url>,
    pub timeout: Option<String>,
    pub download_dir: Option<PathBuf>,
    pub admin_token: Option<String>,
}

#[derive(Clone)]
pub struct Config {
    pub api_url: Url,
    pub timeout: Duration,
    pub download_dir: PathBuf,
    admin_token: Option<String>,
}

const REDACTED: &str = "<redacted>";

impl fmt::Debug for ConfigEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigEnv")
            .field("api_url", &self.api_url)
            .field("timeout", &self.timeout)
            .field("download_dir", &self.download_dir)
            .field("admin_token", &self.admin_token.as_ref().map(|_| REDACTED))
            .finish()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_url", &self.api_url)
            .field("timeout", &self.timeout)
            .field("download_dir", &self.download_dir)
            .field("admin_token", &self.admin_token.as_ref().map(|_| REDACTED))
            .finish()
    }
}

impl Config {
    /// The token for admin routes, from the environment or else the OS keyring.
    pub fn admin_token(&self) -> Result<String> {
        if let Some(token) = &self.admin_token {
            return Ok(token.clone());
        }

        let entry = Entry::new(KEYRING_SERVICE, KEYRING_USER)?;
        let token = entry.get_secret().context(
            "Admin token not specified via CLOUDFROG_ADMIN_TOKEN nor present in OS keyring",
        )?;
        Ok(String::from_utf8(token)?)
    }
}

fn parse_timeout(raw: &str) -> Result<Duration> {
    humantime::parse_duration(raw.trim())
        .with_context(|| format!("Invalid timeout '{}', expected e.g. '60s' or '2m'", raw))
}

pub fn merge_config(
    base: ConfigFile,
    override_config: ConfigEnv,
    default_download_dir: PathBuf,
) -> Result<Config> {
    let api_url = match override_config.api_url.or(base.api_url) {
        Some(url) => url,
        None => Url::parse(DEFAULT_API_URL)?,
    };

    let timeout = match override_config.timeout.or(base.timeout) {
        Some(raw) => parse_timeout(&raw)?,
        None => DEFAULT_TIMEOUT,
    };

    let download_dir = override_config
        .download_dir
        .or(base.download_dir)
        .unwrap_or(default_download_dir);

    Ok(Config {
        api_url,
        timeout,
        download_dir,
        admin_token: override_config.admin_token,
    })
}

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "cloudfrog", "cloudfrog")
        .ok_or(anyhow!("Unable to determine home directory"))
}

fn config_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join("config.toml"))
}

pub fn read_config() -> Result<Config> {
    let _ = dotenv();
    let env_config = envy::prefixed("CLOUDFROG_")
        .from_env::<ConfigEnv>()
        .context("Invalid CLOUDFROG_* environment variable")?;

    let file_config = if let Ok(config) = fs::read_to_string(config_path()?) {
        toml::from_str(&config).context("Failed to parse config.toml")?
    } else {
        ConfigFile::default()
    };

    let default_download_dir = directories::UserDirs::new()
        .and_then(|dirs| dirs.download_dir().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));

    merge_config(file_config, env_config, default_download_dir)
}

/// Previously stored values are kept unless the new file overrides them.
pub fn write_config(config: ConfigFile) -> Result<PathBuf> {
    let path = config_path()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create config directory")?;
    }

    let previous: ConfigFile = fs::read_to_string(&path)
        .ok()
        .and_then(|content| toml::from_str(&content).ok())
        .unwrap_or_default();

    let merged = ConfigFile {
        api_url: config.api_url.or(previous.api_url),
        timeout: config.timeout.or(previous.timeout),
        download_dir: config.download_dir.or(previous.download_dir),
    };

    fs::write(&path, toml::to_string_pretty(&merged)?).context("Failed to write config.toml")?;
    Ok(path)
}

pub fn set_admin_token_keyring(token: String) -> Result<()> {
    let entry = Entry::new(KEYRING_SERVICE, KEYRING_USER)?;
    entry.set_secret(token.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn downloads() -> PathBuf {
        PathBuf::from("/tmp/downloads")
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = merge_config(ConfigFile::default(), ConfigEnv::default(), downloads()).unwrap();

        assert_eq!(config.api_url.as_str(), "http://localhost:8080/");
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.download_dir, downloads());
    }

    #[test]
    fn environment_beats_config_file() {
        let file = ConfigFile {
            api_url: Some(Url::parse("http://file.example").unwrap()),
            timeout: Some("30s".to_string()),
            download_dir: Some(PathBuf::from("/from/file")),
        };
        let env = ConfigEnv {
            api_url: Some(Url::parse("http://env.example").unwrap()),
            timeout: None,
            download_dir: None,
            admin_token: Some("secret".to_string()),
        };

        let config = merge_config(file, env, downloads()).unwrap();

        assert_eq!(config.api_url.as_str(), "http://env.example/");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.download_dir, PathBuf::from("/from/file"));
        assert_eq!(config.admin_token().unwrap(), "secret");
    }

    #[test]
    fn debug_output_hides_admin_token() {
        let env = ConfigEnv {
            admin_token: Some("hunter2-token".to_string()),
            ..ConfigEnv::default()
        };
        assert!(!format!("{:?}", env).contains("hunter2-token"));

        let config = merge_config(ConfigFile::default(), env, downloads()).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2-token"));
        assert!(debug.contains("<redacted>"));
        assert_eq!(config.admin_token().unwrap(), "hunter2-token");
    }

    #[test]
    fn timeout_accepts_humantime() {
        let env = ConfigEnv {
            timeout: Some("2m 30s".to_string()),
            ..Default::default()
        };
        let config = merge_config(ConfigFile::default(), env, downloads()).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(150));
    }

    #[test]
    fn invalid_timeout_is_rejected() {
        let file = ConfigFile {
            timeout: Some("soon".to_string()),
            ..Default::default()
        };
        let err = merge_config(file, ConfigEnv::default(), downloads()).unwrap_err();
        assert!(err.to_string().contains("Invalid timeout 'soon'"));
    }

    #[test]
    fn config_file_round_trips_through_toml() {
        let content = r#"
            api_url = "https://share.example.com"
            timeout = "90s"
        "#;
        let file: ConfigFile = toml::from_str(content).unwrap();
        let config = merge_config(file, ConfigEnv::default(), downloads()).unwrap();

        assert_eq!(config.api_url.as_str(), "https://share.example.com/");
        assert_eq!(config.timeout, Duration::from_secs(90));
    }
}
