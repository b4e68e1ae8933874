//! Configuration management for the tutor mascot
//!
//! Precedence is env > toml > default.

pub mod file;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::analysis::AnalyserSettings;
use crate::audio::SinkSettings;
use crate::avatar::AvatarSettings;
use crate::lipsync::LipSyncConfig;
use crate::{Error, Result};

/// Default tutor backend address
pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8000";

/// Default backend request timeout
const DEFAULT_BACKEND_TIMEOUT_SECS: u64 = 60;

/// Mascot configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Tutor backend connection
    pub backend: BackendConfig,

    /// Audio sink
    pub audio: SinkSettings,

    /// Analyser attached to the sink
    pub analysis: AnalyserSettings,

    /// Mouth animation tuning
    pub lipsync: LipSyncConfig,

    /// Avatar view
    pub avatar: AvatarSettings,
}

/// Tutor backend connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Base URL without trailing slash
    pub url: String,

    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_BACKEND_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_BACKEND_TIMEOUT_SECS),
        }
    }
}

impl Config {
    /// Load configuration from the environment and the optional config file
    ///
    /// # Errors
    ///
    /// Returns error if an override cannot be parsed or a value is out of range
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::from_parts(fc, |key| std::env::var(key).ok())
    }

    /// Merge env lookups over a parsed config file
    ///
    /// # Errors
    ///
    /// Returns error if an override cannot be parsed or a value is out of range
    pub fn from_parts<F>(fc: file::MascotConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend = BackendConfig {
            url: env("MASCOT_BACKEND_URL")
                .or(fc.backend.url)
                .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            timeout: Duration::from_secs(
                parse_env(&env, "MASCOT_BACKEND_TIMEOUT_SECS")?
                    .or(fc.backend.timeout_secs)
                    .unwrap_or(DEFAULT_BACKEND_TIMEOUT_SECS),
            ),
        };

        let mut audio = fc.audio;
        if let Some(rate) = parse_env(&env, "MASCOT_OUTPUT_RATE")? {
            audio.output_rate = rate;
        }
        if let Some(ms) = parse_env(&env, "MASCOT_READY_TIMEOUT_MS")? {
            audio.ready_timeout = Duration::from_millis(ms);
        }
        if let Some(required) = parse_env(&env, "MASCOT_REQUIRE_GESTURE")? {
            audio.require_gesture = required;
        }

        let mut analysis = fc.analysis;
        if let Some(enabled) = parse_env(&env, "MASCOT_ANALYSIS_ENABLED")? {
            analysis.enabled = enabled;
        }
        if let Some(size) = parse_env(&env, "MASCOT_FFT_SIZE")? {
            analysis.fft_size = size;
        }

        let mut lipsync = fc.lipsync;
        if let Some(sensitivity) = parse_env(&env, "MASCOT_SENSITIVITY")? {
            lipsync.sensitivity = sensitivity;
        }

        let mut avatar = fc.avatar;
        if let Some(fps) = parse_env(&env, "MASCOT_FPS")? {
            avatar.fps = fps;
        }
        if let Some(scene) = env("MASCOT_SCENE") {
            avatar.scene = Some(PathBuf::from(scene));
        }

        let config = Self {
            backend,
            audio,
            analysis,
            lipsync,
            avatar,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges across sections
    ///
    /// # Errors
    ///
    /// Returns error describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        if !self.backend.url.starts_with("http://") && !self.backend.url.starts_with("https://") {
            return Err(Error::Config(format!(
                "backend url must be http(s), got {}",
                self.backend.url
            )));
        }
        if self.audio.output_rate == 0 {
            return Err(Error::Config("audio output_rate must be positive".to_string()));
        }
        if self.avatar.fps == 0 {
            return Err(Error::Config("avatar fps must be positive".to_string()));
        }
        self.analysis.validate()?;
        self.lipsync.validate()
    }
}

fn parse_env<F, T>(env: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| Error::Config(format!("{key}={raw}: {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_file_or_env() {
        let config = Config::from_parts(file::MascotConfigFile::default(), env_of(&[])).unwrap();
        assert_eq!(config.backend.url, DEFAULT_BACKEND_URL);
        assert_eq!(config.analysis.fft_size, 256);
        assert_eq!(config.avatar.fps, 60);
    }

    #[test]
    fn env_overrides_file() {
        let fc = file::parse_config_file(
            "[backend]\nurl = \"http://file:8000\"\n[avatar]\nfps = 30\n",
        )
        .unwrap();
        let config = Config::from_parts(
            fc,
            env_of(&[
                ("MASCOT_BACKEND_URL", "http://env:8000/"),
                ("MASCOT_REQUIRE_GESTURE", "true"),
            ]),
        )
        .unwrap();

        assert_eq!(config.backend.url, "http://env:8000");
        assert_eq!(config.avatar.fps, 30);
        assert!(config.audio.require_gesture);
    }

    #[test]
    fn rejects_bad_override() {
        let result = Config::from_parts(
            file::MascotConfigFile::default(),
            env_of(&[("MASCOT_FFT_SIZE", "lots")]),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn rejects_non_power_of_two_window() {
        let result = Config::from_parts(
            file::MascotConfigFile::default(),
            env_of(&[("MASCOT_FFT_SIZE", "500")]),
        );
        assert!(result.is_err());
    }
}
