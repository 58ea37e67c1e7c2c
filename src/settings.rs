//! Settings collaborator and its file-backed implementation.
//!
//! The config file uses a flat `key = value` subset of TOML:
//!
//! ```toml
//! api_key = "tb_live_..."
//! api_base_url = "https://api.torbox.app"
//! download_dir = "/home/me/Videos/torbox"
//! poll_interval_secs = 5
//! sweep_interval_secs = 2
//! max_retries = 3
//! remote_cancel = true
//! max_in_flight = 1
//! ```
//!
//! `TORBOX_API_KEY` in the environment overrides `api_key`.

use std::env;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use crate::torbox::DEFAULT_BASE_URL;

/// Environment variable overriding the configured API key.
pub const API_KEY_ENV: &str = "TORBOX_API_KEY";

const APP_DIR: &str = "torbox-fetch";
const CONFIG_FILE: &str = "config.toml";
const DB_FILE: &str = "queue.db";

/// Settings failures.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// No download directory configured.
    #[error(
        "download directory is not configured\n  Suggestion: Run `torbox-fetch config set-dir <PATH>`"
    )]
    DownloadDirMissing,

    /// A value failed validation.
    #[error("invalid setting: {0}")]
    Validation(String),

    /// Reading or writing the config file failed.
    #[error("config file error at {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl SettingsError {
    fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// What the engine and client need from configuration.
pub trait Settings: Send + Sync {
    /// API key, if configured.
    fn api_key(&self) -> Option<String>;

    /// API host.
    fn api_base_url(&self) -> String;

    /// Directory media is materialized into.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::DownloadDirMissing`] when unset.
    fn require_download_dir(&self) -> Result<PathBuf, SettingsError>;
}

/// Raw values from the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsValues {
    /// Torbox API key.
    pub api_key: Option<String>,
    /// API host override.
    pub api_base_url: Option<String>,
    /// Media output directory.
    pub download_dir: Option<PathBuf>,
    /// Poll tick for each in-flight item.
    pub poll_interval_secs: Option<u64>,
    /// Sweep tick.
    pub sweep_interval_secs: Option<u64>,
    /// Client retries per request.
    pub max_retries: Option<u32>,
    /// Whether cancel also deletes the remote job.
    pub remote_cancel: Option<bool>,
    /// Concurrent in-flight items.
    pub max_in_flight: Option<usize>,
}

impl SettingsValues {
    /// Validates ranges.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Validation`] naming the first bad field.
    pub fn validate(&self) -> Result<(), SettingsError> {
        validate_range("poll_interval_secs", self.poll_interval_secs, 1, 3600)?;
        validate_range("sweep_interval_secs", self.sweep_interval_secs, 1, 3600)?;
        validate_range("max_retries", self.max_retries.map(u64::from), 0, 10)?;
        validate_range(
            "max_in_flight",
            self.max_in_flight.and_then(|n| u64::try_from(n).ok()),
            1,
            8,
        )?;
        if let Some(url) = &self.api_base_url {
            validate_base_url(url)?;
        }
        Ok(())
    }
}

fn validate_range(field: &str, value: Option<u64>, min: u64, max: u64) -> Result<(), SettingsError> {
    match value {
        Some(value) if !(min..=max).contains(&value) => Err(SettingsError::validation(format!(
            "`{field}` = {value} is out of range {min}..={max}"
        ))),
        _ => Ok(()),
    }
}

fn validate_base_url(url: &str) -> Result<(), SettingsError> {
    let parsed = Url::parse(url)
        .map_err(|e| SettingsError::validation(format!("`api_base_url` '{url}': {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(SettingsError::validation(format!(
            "`api_base_url` must use http or https, got '{}'",
            parsed.scheme()
        )));
    }
    Ok(())
}

/// Settings loaded from (and saved to) the config file.
#[derive(Debug, Clone, Default)]
pub struct FileSettings {
    path: Option<PathBuf>,
    values: SettingsValues,
    env_api_key: Option<String>,
}

impl FileSettings {
    /// Loads settings from `path`, or the default location when `None`.
    ///
    /// A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Io`] if the file exists but cannot be read,
    /// or [`SettingsError::Validation`] if it does not parse.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let path = path.map(Path::to_path_buf).or_else(resolve_default_config_path);
        Self::load_from(path, env::var(API_KEY_ENV).ok())
    }

    /// Loads settings with an explicit environment key override.
    ///
    /// # Errors
    ///
    /// Same as [`FileSettings::load`].
    #[instrument(skip(env_api_key))]
    pub fn load_from(path: Option<PathBuf>, env_api_key: Option<String>) -> Result<Self, SettingsError> {
        let values = match path.as_deref() {
            Some(file) if file.exists() => {
                let raw = fs::read_to_string(file).map_err(|e| SettingsError::io(file, e))?;
                debug!(path = %file.display(), "loaded config file");
                parse_settings_str(&raw)?
            }
            _ => SettingsValues::default(),
        };

        Ok(Self {
            path,
            values,
            env_api_key: env_api_key
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty()),
        })
    }

    /// Builds settings directly from values (no backing file).
    #[must_use]
    pub fn from_values(values: SettingsValues) -> Self {
        Self {
            path: None,
            values,
            env_api_key: None,
        }
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the raw file values.
    #[must_use]
    pub fn values(&self) -> &SettingsValues {
        &self.values
    }

    /// Returns true when the API key comes from the environment.
    #[must_use]
    pub fn api_key_from_env(&self) -> bool {
        self.env_api_key.is_some()
    }

    /// Sets the API key.
    ///
    /// # Errors
    ///
    /// Rejects blank keys and keys containing quotes or whitespace.
    pub fn set_api_key(&mut self, key: &str) -> Result<(), SettingsError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(SettingsError::validation("api_key must not be empty"));
        }
        if key.chars().any(|c| c == '"' || c.is_whitespace()) {
            return Err(SettingsError::validation(
                "api_key must not contain quotes or whitespace",
            ));
        }
        self.values.api_key = Some(key.to_string());
        Ok(())
    }

    /// Sets the download directory.
    ///
    /// # Errors
    ///
    /// Rejects empty paths and paths that cannot be written back to the file.
    pub fn set_download_dir(&mut self, dir: &Path) -> Result<(), SettingsError> {
        let rendered = dir.to_string_lossy();
        if rendered.trim().is_empty() {
            return Err(SettingsError::validation("download_dir must not be empty"));
        }
        if rendered.contains('"') || rendered.contains('\n') {
            return Err(SettingsError::validation(
                "download_dir must not contain quotes or newlines",
            ));
        }
        self.values.download_dir = Some(dir.to_path_buf());
        Ok(())
    }

    /// Sets the API base URL.
    ///
    /// # Errors
    ///
    /// Rejects anything that is not an http(s) URL.
    pub fn set_api_base_url(&mut self, url: &str) -> Result<(), SettingsError> {
        let url = url.trim().trim_end_matches('/');
        validate_base_url(url)?;
        self.values.api_base_url = Some(url.to_string());
        Ok(())
    }

    /// Writes the current values back to the config file.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Validation`] when no path is known, or
    /// [`SettingsError::Io`] if the directory or file cannot be written.
    #[instrument(skip(self))]
    pub fn save(&self) -> Result<(), SettingsError> {
        let path = self
            .path
            .as_deref()
            .ok_or_else(|| SettingsError::validation("no config file location (set HOME or --config)"))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| SettingsError::io(parent, e))?;
        }
        fs::write(path, render_settings(&self.values)).map_err(|e| SettingsError::io(path, e))?;
        debug!(path = %path.display(), "saved config file");
        Ok(())
    }
}

impl Settings for FileSettings {
    fn api_key(&self) -> Option<String> {
        self.env_api_key
            .clone()
            .or_else(|| self.values.api_key.clone())
            .filter(|key| !key.trim().is_empty())
    }

    fn api_base_url(&self) -> String {
        self.values
            .api_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    fn require_download_dir(&self) -> Result<PathBuf, SettingsError> {
        self.values
            .download_dir
            .clone()
            .ok_or(SettingsError::DownloadDirMissing)
    }
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/torbox-fetch/config.toml`
/// 2. `$HOME/.config/torbox-fetch/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join(APP_DIR).join(CONFIG_FILE));
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join(CONFIG_FILE),
    )
}

/// Resolves the default queue database path.
///
/// Priority:
/// 1. `$XDG_DATA_HOME/torbox-fetch/queue.db`
/// 2. `$HOME/.local/share/torbox-fetch/queue.db`
#[must_use]
pub fn resolve_default_db_path() -> Option<PathBuf> {
    if let Some(xdg_data_home) = env_var_non_empty_os("XDG_DATA_HOME") {
        return Some(PathBuf::from(xdg_data_home).join(APP_DIR).join(DB_FILE));
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR)
            .join(DB_FILE),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

fn parse_settings_str(raw: &str) -> Result<SettingsValues, SettingsError> {
    let mut values = SettingsValues::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line_no = line_index + 1;
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            return Err(SettingsError::validation(format!(
                "line {line_no}: expected key = value"
            )));
        };
        let key = raw_key.trim();
        let value = raw_value.trim();
        let context = |e: String| SettingsError::validation(format!("line {line_no}: `{key}`: {e}"));

        match key {
            "api_key" => values.api_key = Some(parse_string_literal(value).map_err(context)?),
            "api_base_url" => {
                values.api_base_url = Some(
                    parse_string_literal(value)
                        .map_err(context)?
                        .trim_end_matches('/')
                        .to_string(),
                );
            }
            "download_dir" => {
                values.download_dir = Some(PathBuf::from(parse_string_literal(value).map_err(context)?));
            }
            "poll_interval_secs" => {
                values.poll_interval_secs = Some(parse_integer(value).map_err(context)?);
            }
            "sweep_interval_secs" => {
                values.sweep_interval_secs = Some(parse_integer(value).map_err(context)?);
            }
            "max_retries" => {
                let parsed = parse_integer(value).map_err(context)?;
                values.max_retries = Some(
                    u32::try_from(parsed).map_err(|_| context("out of range".to_string()))?,
                );
            }
            "max_in_flight" => {
                let parsed = parse_integer(value).map_err(context)?;
                values.max_in_flight = Some(
                    usize::try_from(parsed).map_err(|_| context("out of range".to_string()))?,
                );
            }
            "remote_cancel" => values.remote_cancel = Some(parse_boolean(value).map_err(context)?),
            unknown => {
                return Err(SettingsError::validation(format!(
                    "line {line_no}: unknown configuration key '{unknown}'"
                )));
            }
        }
    }
    values.validate()?;
    Ok(values)
}

fn render_settings(values: &SettingsValues) -> String {
    let mut out = String::new();
    if let Some(key) = &values.api_key {
        let _ = writeln!(out, "api_key = \"{key}\"");
    }
    if let Some(url) = &values.api_base_url {
        let _ = writeln!(out, "api_base_url = \"{url}\"");
    }
    if let Some(dir) = &values.download_dir {
        let _ = writeln!(out, "download_dir = \"{}\"", dir.display());
    }
    if let Some(secs) = values.poll_interval_secs {
        let _ = writeln!(out, "poll_interval_secs = {secs}");
    }
    if let Some(secs) = values.sweep_interval_secs {
        let _ = writeln!(out, "sweep_interval_secs = {secs}");
    }
    if let Some(retries) = values.max_retries {
        let _ = writeln!(out, "max_retries = {retries}");
    }
    if let Some(remote_cancel) = values.remote_cancel {
        let _ = writeln!(out, "remote_cancel = {remote_cancel}");
    }
    if let Some(max_in_flight) = values.max_in_flight {
        let _ = writeln!(out, "max_in_flight = {max_in_flight}");
    }
    out
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String, String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        return Err("expected double-quoted string".to_string());
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer(raw_value: &str) -> Result<u64, String> {
    let token = raw_value.trim();
    if token.is_empty() {
        return Err("expected integer value".to_string());
    }
    let value = token.parse::<i128>().map_err(|e| e.to_string())?;
    if value < 0 {
        return Err("expected non-negative integer".to_string());
    }
    u64::try_from(value).map_err(|_| "integer out of range".to_string())
}

fn parse_boolean(raw_value: &str) -> Result<bool, String> {
    match raw_value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err("expected 'true' or 'false'".to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_parse_all_fields() {
        let raw = r#"
            # torbox-fetch settings
            api_key = "abc123"  # inline comment
            api_base_url = "http://localhost:9000/"
            download_dir = "/tmp/videos"
            poll_interval_secs = 5
            sweep_interval_secs = 2
            max_retries = 0
            remote_cancel = false
            max_in_flight = 2
        "#;
        let values = parse_settings_str(raw).unwrap();
        assert_eq!(values.api_key.as_deref(), Some("abc123"));
        assert_eq!(values.api_base_url.as_deref(), Some("http://localhost:9000"));
        assert_eq!(values.download_dir, Some(PathBuf::from("/tmp/videos")));
        assert_eq!(values.poll_interval_secs, Some(5));
        assert_eq!(values.sweep_interval_secs, Some(2));
        assert_eq!(values.max_retries, Some(0));
        assert_eq!(values.remote_cancel, Some(false));
        assert_eq!(values.max_in_flight, Some(2));
    }

    #[test]
    fn test_parse_rejects_unknown_key() {
        let err = parse_settings_str("colour = \"blue\"").unwrap_err();
        assert!(err.to_string().contains("unknown configuration key"));
    }

    #[test]
    fn test_parse_rejects_out_of_range() {
        let err = parse_settings_str("max_in_flight = 9").unwrap_err();
        assert!(err.to_string().contains("max_in_flight"), "{err}");
        assert!(parse_settings_str("poll_interval_secs = 0").is_err());
        assert!(parse_settings_str("max_retries = -1").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_syntax() {
        assert!(parse_settings_str("api_key abc").is_err());
        assert!(parse_settings_str("api_key = abc").is_err());
        assert!(parse_settings_str("remote_cancel = yes").is_err());
        assert!(parse_settings_str("api_base_url = \"ftp://x\"").is_err());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp = TempDir::new().unwrap();
        let settings = FileSettings::load_from(Some(temp.path().join("none.toml")), None).unwrap();
        assert_eq!(settings.api_key(), None);
        assert_eq!(settings.api_base_url(), DEFAULT_BASE_URL);
        assert!(matches!(
            settings.require_download_dir(),
            Err(SettingsError::DownloadDirMissing)
        ));
    }

    #[test]
    fn test_env_key_overrides_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "api_key = \"from-file\"\n").unwrap();

        let settings = FileSettings::load_from(Some(path.clone()), Some("from-env".to_string())).unwrap();
        assert_eq!(settings.api_key().as_deref(), Some("from-env"));
        assert!(settings.api_key_from_env());

        let settings = FileSettings::load_from(Some(path), Some("  ".to_string())).unwrap();
        assert_eq!(settings.api_key().as_deref(), Some("from-file"));
    }

    #[test]
    fn test_setters_validate_and_save_round_trips() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");
        let mut settings = FileSettings::load_from(Some(path.clone()), None).unwrap();

        assert!(settings.set_api_key("   ").is_err());
        assert!(settings.set_api_base_url("not a url").is_err());
        settings.set_api_key("key-123456").unwrap();
        settings.set_api_base_url("https://example.test/").unwrap();
        settings.set_download_dir(temp.path()).unwrap();
        settings.save().unwrap();

        let reloaded = FileSettings::load_from(Some(path), None).unwrap();
        assert_eq!(reloaded.api_key().as_deref(), Some("key-123456"));
        assert_eq!(reloaded.api_base_url(), "https://example.test");
        assert_eq!(reloaded.require_download_dir().unwrap(), temp.path());
    }

    #[test]
    fn test_save_without_path_fails() {
        let settings = FileSettings::from_values(SettingsValues::default());
        assert!(matches!(settings.save(), Err(SettingsError::Validation(_))));
    }
}
