//! Runtime settings.
//!
//! Values come from the process environment. Outside production an env file
//! (`KEY=VALUE` lines, `#` comments, optional double quotes) seeds anything
//! the environment leaves unset.

use std::{
    fmt, fs,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, anyhow, bail};
use url::Url;

use crate::{auth::AllowList, telemetry::LogFormat};

pub const DEFAULT_ENV_FILE: &str = ".env";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_WEBHOOK_PORT: u16 = 8443;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_DOWNLOAD_DIR: &str = "download";
pub const DEFAULT_YTDL_BIN: &str = "yt-dlp";
pub const DEFAULT_AUDIO_FORMAT: &str = "mp3";
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 2;
pub const DEFAULT_EXTRACT_TIMEOUT_SECS: u64 = 1800;
pub const DEFAULT_CHOICE_TTL_SECS: u64 = 3600;

/// Raw, partially filled configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvConfig {
    pub bot_token: Option<String>,
    pub allowed_users: Option<String>,
    pub app_env: Option<String>,
    pub url: Option<String>,
    pub port: Option<u16>,
    pub webhook_port: Option<u16>,
    pub http_host: Option<String>,
    pub download_dir: Option<PathBuf>,
    pub ytdl_bin: Option<PathBuf>,
    pub audio_format: Option<String>,
    pub max_concurrent_downloads: Option<usize>,
    pub extract_timeout_secs: Option<u64>,
    pub choice_ttl_secs: Option<u64>,
    pub log_format: Option<String>,
}

fn parse_number<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("Parsing {key} from {value:?}"))
}

impl EnvConfig {
    /// Builds a config from `(key, value)` pairs, ignoring unknown keys and
    /// empty values.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut cfg = Self::default();
        for (key, value) in pairs {
            let key = key.as_ref();
            let value = value.as_ref().trim();
            if value.is_empty() {
                continue;
            }
            match key {
                "BOT_TOKEN" => cfg.bot_token = Some(value.to_string()),
                "ALLOWED_USERS" => cfg.allowed_users = Some(value.to_string()),
                "APP_ENV" => cfg.app_env = Some(value.to_string()),
                "URL" => cfg.url = Some(value.to_string()),
                "PORT" => cfg.port = Some(parse_number(key, value)?),
                "WEBHOOK_PORT" => cfg.webhook_port = Some(parse_number(key, value)?),
                "HTTP_HOST" => cfg.http_host = Some(value.to_string()),
                "DOWNLOAD_DIR" => cfg.download_dir = Some(PathBuf::from(value)),
                "YTDL_BIN" => cfg.ytdl_bin = Some(PathBuf::from(value)),
                "AUDIO_FORMAT" => cfg.audio_format = Some(value.to_string()),
                "MAX_CONCURRENT_DOWNLOADS" => {
                    cfg.max_concurrent_downloads = Some(parse_number(key, value)?)
                }
                "EXTRACT_TIMEOUT_SECS" => {
                    cfg.extract_timeout_secs = Some(parse_number(key, value)?)
                }
                "CHOICE_TTL_SECS" => cfg.choice_ttl_secs = Some(parse_number(key, value)?),
                "LOG_FORMAT" => cfg.log_format = Some(value.to_string()),
                _ => {}
            }
        }
        Ok(cfg)
    }

    pub fn from_process_env() -> Result<Self> {
        Self::from_pairs(std::env::vars())
    }

    /// Fills every unset field from `fallback`.
    pub fn overlay(self, fallback: EnvConfig) -> Self {
        Self {
            bot_token: self.bot_token.or(fallback.bot_token),
            allowed_users: self.allowed_users.or(fallback.allowed_users),
            app_env: self.app_env.or(fallback.app_env),
            url: self.url.or(fallback.url),
            port: self.port.or(fallback.port),
            webhook_port: self.webhook_port.or(fallback.webhook_port),
            http_host: self.http_host.or(fallback.http_host),
            download_dir: self.download_dir.or(fallback.download_dir),
            ytdl_bin: self.ytdl_bin.or(fallback.ytdl_bin),
            audio_format: self.audio_format.or(fallback.audio_format),
            max_concurrent_downloads: self
                .max_concurrent_downloads
                .or(fallback.max_concurrent_downloads),
            extract_timeout_secs: self.extract_timeout_secs.or(fallback.extract_timeout_secs),
            choice_ttl_secs: self.choice_ttl_secs.or(fallback.choice_ttl_secs),
            log_format: self.log_format.or(fallback.log_format),
        }
    }

    pub fn is_production(&self) -> bool {
        self.app_env
            .as_deref()
            .is_some_and(|env| env.eq_ignore_ascii_case("production"))
    }
}

/// Reads an env file. A missing file is not an error.
pub fn read_env_file(path: &Path) -> Result<Option<EnvConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let pairs = content.lines().filter_map(|line| {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return None;
        }
        let (key, value) = trimmed.split_once('=')?;
        let key = key.trim().trim_start_matches("export ").trim();
        Some((key.to_string(), value.trim().trim_matches('"').to_string()))
    });
    EnvConfig::from_pairs(pairs)
        .with_context(|| format!("Parsing {}", path.display()))
        .map(Some)
}

/// Fully resolved settings.
#[derive(Clone)]
pub struct Settings {
    pub bot_token: String,
    pub allowed_users: AllowList,
    pub production: bool,
    pub public_url: Option<Url>,
    pub http_host: IpAddr,
    pub http_port: u16,
    pub webhook_port: u16,
    pub download_dir: PathBuf,
    pub ytdl_bin: PathBuf,
    pub audio_format: String,
    pub max_concurrent_downloads: usize,
    pub extract_timeout: Duration,
    pub choice_ttl: Duration,
    pub log_format: LogFormat,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("bot_token", &"<redacted>")
            .field("allowed_users", &self.allowed_users.len())
            .field("production", &self.production)
            .field("public_url", &self.public_url.as_ref().map(Url::as_str))
            .field("http_host", &self.http_host)
            .field("http_port", &self.http_port)
            .field("webhook_port", &self.webhook_port)
            .field("download_dir", &self.download_dir)
            .field("ytdl_bin", &self.ytdl_bin)
            .field("audio_format", &self.audio_format)
            .field("max_concurrent_downloads", &self.max_concurrent_downloads)
            .field("extract_timeout", &self.extract_timeout)
            .field("choice_ttl", &self.choice_ttl)
            .field("log_format", &self.log_format)
            .finish()
    }
}

impl Settings {
    pub fn resolve(cfg: EnvConfig) -> Result<Self> {
        let production = cfg.is_production();
        let bot_token = cfg
            .bot_token
            .ok_or_else(|| anyhow!("BOT_TOKEN is not set"))?;

        let public_url = match cfg.url {
            Some(raw) => Some(Url::parse(&raw).with_context(|| format!("Parsing URL {raw:?}"))?),
            None => None,
        };
        if production && public_url.is_none() {
            bail!("URL must be set in production");
        }

        let http_host = cfg.http_host.as_deref().unwrap_or(DEFAULT_HOST);
        let http_host: IpAddr = http_host
            .parse()
            .with_context(|| format!("Parsing HTTP_HOST from {http_host:?}"))?;

        let max_concurrent_downloads = cfg
            .max_concurrent_downloads
            .unwrap_or(DEFAULT_MAX_CONCURRENT_DOWNLOADS);
        if max_concurrent_downloads == 0 {
            bail!("MAX_CONCURRENT_DOWNLOADS must be at least 1");
        }

        let log_format = match cfg.log_format.as_deref() {
            Some(raw) => raw.parse()?,
            None => LogFormat::default(),
        };

        Ok(Self {
            bot_token,
            allowed_users: AllowList::parse(cfg.allowed_users.as_deref().unwrap_or_default()),
            production,
            public_url,
            http_host,
            http_port: cfg.port.unwrap_or(DEFAULT_PORT),
            webhook_port: cfg.webhook_port.unwrap_or(DEFAULT_WEBHOOK_PORT),
            download_dir: cfg
                .download_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOAD_DIR)),
            ytdl_bin: cfg
                .ytdl_bin
                .unwrap_or_else(|| PathBuf::from(DEFAULT_YTDL_BIN)),
            audio_format: cfg
                .audio_format
                .unwrap_or_else(|| DEFAULT_AUDIO_FORMAT.to_string()),
            max_concurrent_downloads,
            extract_timeout: Duration::from_secs(
                cfg.extract_timeout_secs
                    .unwrap_or(DEFAULT_EXTRACT_TIMEOUT_SECS),
            ),
            choice_ttl: Duration::from_secs(cfg.choice_ttl_secs.unwrap_or(DEFAULT_CHOICE_TTL_SECS)),
            log_format,
        })
    }

    /// Process environment first, then `env_file` unless running in
    /// production.
    pub fn load(env_file: &Path) -> Result<Self> {
        let process = EnvConfig::from_process_env()?;
        let cfg = if process.is_production() {
            process
        } else {
            match read_env_file(env_file)? {
                Some(file) => process.overlay(file),
                None => process,
            }
        };
        Self::resolve(cfg)
    }

    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.http_host, self.http_port)
    }

    pub fn webhook_addr(&self) -> SocketAddr {
        SocketAddr::new(self.http_host, self.webhook_port)
    }

    /// `<URL>/bot<token>`, the path Telegram posts updates to.
    pub fn webhook_url(&self) -> Option<Url> {
        let base = self.public_url.as_ref()?;
        let path = format!("{}/bot{}", base.path().trim_end_matches('/'), self.bot_token);
        let mut url = base.clone();
        url.set_path(&path);
        Some(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    #[test]
    fn read_env_file_parses_values() {
        let file = make_config(
            "# bot\nBOT_TOKEN=\"123:abc\"\nALLOWED_USERS=alice,bob\nexport PORT=4242\n\nUNKNOWN=1\n",
        );
        let cfg = read_env_file(file.path()).unwrap().unwrap();
        assert_eq!(cfg.bot_token.as_deref(), Some("123:abc"));
        assert_eq!(cfg.allowed_users.as_deref(), Some("alice,bob"));
        assert_eq!(cfg.port, Some(4242));
    }

    #[test]
    fn read_env_file_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_env_file(&dir.path().join(".env")).unwrap().is_none());
    }

    #[test]
    fn malformed_numbers_name_the_key() {
        let err = EnvConfig::from_pairs([("PORT", "eighty")]).unwrap_err();
        assert!(format!("{err:#}").contains("PORT"));
    }

    #[test]
    fn resolve_applies_defaults() {
        let cfg = EnvConfig::from_pairs([("BOT_TOKEN", "t"), ("ALLOWED_USERS", "alice")]).unwrap();
        let settings = Settings::resolve(cfg).unwrap();
        assert!(!settings.production);
        assert_eq!(settings.http_port, DEFAULT_PORT);
        assert_eq!(settings.http_addr().to_string(), "0.0.0.0:3000");
        assert_eq!(settings.download_dir, PathBuf::from(DEFAULT_DOWNLOAD_DIR));
        assert_eq!(settings.audio_format, "mp3");
        assert_eq!(settings.max_concurrent_downloads, 2);
        assert_eq!(settings.choice_ttl, Duration::from_secs(3600));
        assert!(settings.allowed_users.permits(Some("alice")));
        assert_eq!(settings.webhook_url(), None);
    }

    #[test]
    fn resolve_requires_token() {
        assert!(Settings::resolve(EnvConfig::default()).is_err());
    }

    #[test]
    fn production_requires_public_url() {
        let cfg = EnvConfig::from_pairs([("BOT_TOKEN", "t"), ("APP_ENV", "production")]).unwrap();
        assert!(Settings::resolve(cfg).is_err());
    }

    #[test]
    fn webhook_url_appends_token_path() {
        let cfg = EnvConfig::from_pairs([
            ("BOT_TOKEN", "123:abc"),
            ("APP_ENV", "production"),
            ("URL", "https://bot.example.com/"),
        ])
        .unwrap();
        let settings = Settings::resolve(cfg).unwrap();
        assert!(settings.production);
        assert_eq!(
            settings.webhook_url().unwrap().as_str(),
            "https://bot.example.com/bot123:abc"
        );
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let cfg =
            EnvConfig::from_pairs([("BOT_TOKEN", "t"), ("MAX_CONCURRENT_DOWNLOADS", "0")]).unwrap();
        assert!(Settings::resolve(cfg).is_err());
    }

    #[test]
    fn process_values_win_over_file() {
        let process = EnvConfig::from_pairs([("PORT", "9000")]).unwrap();
        let file = EnvConfig::from_pairs([("PORT", "4000"), ("BOT_TOKEN", "file")]).unwrap();
        let merged = process.overlay(file);
        assert_eq!(merged.port, Some(9000));
        assert_eq!(merged.bot_token.as_deref(), Some("file"));
    }

    #[test]
    fn debug_output_hides_token() {
        let cfg = EnvConfig::from_pairs([("BOT_TOKEN", "secret-token")]).unwrap();
        let settings = Settings::resolve(cfg).unwrap();
        assert!(!format!("{settings:?}").contains("secret-token"));
    }
}
