//! TOML configuration file loading
//!
//! Supports `~/.config/tutor-mascot/config.toml` as a persistent config
//! source. Every section and field is optional; the file is a partial
//! overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

use crate::Result;
use crate::analysis::AnalyserSettings;
use crate::audio::SinkSettings;
use crate::avatar::AvatarSettings;
use crate::lipsync::LipSyncConfig;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct MascotConfigFile {
    /// Tutor backend connection
    #[serde(default)]
    pub backend: BackendFileConfig,

    /// Audio sink settings
    #[serde(default)]
    pub audio: SinkSettings,

    /// Analyser settings
    #[serde(default)]
    pub analysis: AnalyserSettings,

    /// Mouth animation tuning
    #[serde(default)]
    pub lipsync: LipSyncConfig,

    /// Avatar view settings
    #[serde(default)]
    pub avatar: AvatarSettings,
}

/// Tutor backend configuration
#[derive(Debug, Default, Deserialize)]
pub struct BackendFileConfig {
    /// Base URL (e.g. "http://127.0.0.1:8000")
    pub url: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: Option<u64>,
}

/// Parse a config file body
///
/// # Errors
///
/// Returns error if the body is not valid TOML for this schema
pub fn parse_config_file(content: &str) -> Result<MascotConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Load the TOML config file from the standard path
///
/// Returns `MascotConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> MascotConfigFile {
    let Some(path) = config_file_path() else {
        return MascotConfigFile::default();
    };

    if !path.exists() {
        return MascotConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match parse_config_file(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                MascotConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            MascotConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/tutor-mascot/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("tutor-mascot").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let file = parse_config_file("").unwrap();
        assert!(file.backend.url.is_none());
        assert_eq!(file.audio, SinkSettings::default());
        assert_eq!(file.analysis, AnalyserSettings::default());
        assert_eq!(file.lipsync, LipSyncConfig::default());
        assert_eq!(file.avatar, AvatarSettings::default());
    }

    #[test]
    fn partial_sections_overlay_defaults() {
        let file = parse_config_file(
            r#"
            [backend]
            url = "http://tutor.local:9000"

            [audio]
            ready_timeout_ms = 200
            require_gesture = true

            [analysis]
            fft_size = 1024

            [lipsync]
            sensitivity = 6.5
            smile = false

            [avatar]
            fps = 30
            scene = "/srv/mascot/head.json"
            "#,
        )
        .unwrap();

        assert_eq!(file.backend.url.as_deref(), Some("http://tutor.local:9000"));
        assert_eq!(file.audio.ready_timeout, Duration::from_millis(200));
        assert!(file.audio.require_gesture);
        assert_eq!(file.audio.output_rate, 24000);
        assert_eq!(file.analysis.fft_size, 1024);
        assert!(file.analysis.enabled);
        assert!((file.lipsync.sensitivity - 6.5).abs() < f32::EPSILON);
        assert!(!file.lipsync.smile);
        assert!((file.lipsync.attack - 0.5).abs() < f32::EPSILON);
        assert_eq!(file.avatar.fps, 30);
        assert_eq!(
            file.avatar.scene,
            Some(PathBuf::from("/srv/mascot/head.json"))
        );
    }

    #[test]
    fn rejects_wrong_types() {
        assert!(parse_config_file("[avatar]\nfps = \"fast\"").is_err());
    }
}
