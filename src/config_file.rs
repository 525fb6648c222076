//! Configuration file support
//!
//! Loads pipeline configuration from a sectioned TOML file and maps it onto
//! the flat runtime [`PipelineConfig`]. API keys may come from the file or
//! from the `GEMINI_API_KEY` / `OPENAI_API_KEY` environment variables; the
//! environment is consulted only when the file omits a key.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::{ApiKeys, ChunkFormat, PipelineConfig};
use crate::error::{PipelineError, Result};

/// Configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Input video and reference subtitle
    pub input: InputSettings,
    /// Output locations and styling toggles
    pub output: OutputSettings,
    /// Segmentation settings
    pub chunking: Option<ChunkingSettings>,
    /// Model selection and retry budgets
    pub models: ModelSettings,
    /// Translation validation toggles
    pub validation: Option<ValidationSettings>,
    /// Subtitle color styling
    pub style: Option<StyleSettings>,
    /// Provider API keys
    pub api_keys: Option<ApiKeySettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSettings {
    /// Input video path
    pub video_path: PathBuf,
    /// Optional reference SRT path
    pub srt_path: Option<PathBuf>,
    /// Spoken languages in the source audio
    pub source_languages: Option<Vec<String>>,
    /// Signed offset applied to the reference subtitle on read, seconds
    pub input_offset_seconds: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSettings {
    /// Directory for the final subtitle file
    pub output_dir: PathBuf,
    /// Directory for intermediate artifacts
    pub intermediate_dir: PathBuf,
    /// Target translation language name
    pub target_language: String,
    /// Signed offset applied to every output entry, seconds
    pub output_offset_seconds: Option<f64>,
    /// Prefix fallback english lines with the fallback marker
    pub mark_fallbacks: Option<bool>,
    /// Marker prepended to fallback english lines
    pub fallback_marker: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingSettings {
    /// Segment window length in seconds
    pub chunk_duration: Option<f64>,
    /// Overlap between adjacent windows in seconds
    pub chunk_overlap: Option<f64>,
    /// Media slice form: "audio" or "video"
    pub chunk_format: Option<ChunkFormat>,
    /// Concurrency bound for external work
    pub max_concurrent: Option<usize>,
    /// Redo work even when artifacts exist
    pub force: Option<bool>,
    /// Restrict the run to a single part number
    pub process_only_part: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Multimodal transcription model
    pub transcription_model: String,
    /// Text translation model
    pub translation_model: String,
    /// Translation retry budget
    pub retries: Option<u32>,
    /// Transcription validation retry budget
    pub transcription_retries: Option<u32>,
    /// Per-call timeout for transcription requests, seconds
    pub transcription_timeout_secs: Option<u64>,
    /// Per-call timeout for translation requests, seconds
    pub translation_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSettings {
    /// Skip the timing-consistency check
    pub disable_timing_validation: Option<bool>,
    /// Take output timings from the LLM response instead of the reference
    pub use_response_timings: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleSettings {
    /// Hex color for english lines
    pub color_english: Option<String>,
    /// Hex color for target-language lines
    pub color_target: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeySettings {
    pub gemini: Option<String>,
    pub openai: Option<String>,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: ConfigFile = toml::from_str(&content)
            .map_err(|e| PipelineError::Config(format!("invalid config file: {}", e)))?;
        Ok(config)
    }

    /// Convert to the flat runtime configuration, filling API keys from the
    /// environment when the file omits them.
    pub fn into_pipeline_config(self) -> PipelineConfig {
        let defaults = PipelineConfig::default();
        let chunking = self.chunking.unwrap_or(ChunkingSettings {
            chunk_duration: None,
            chunk_overlap: None,
            chunk_format: None,
            max_concurrent: None,
            force: None,
            process_only_part: None,
        });
        let validation = self.validation.unwrap_or(ValidationSettings {
            disable_timing_validation: None,
            use_response_timings: None,
        });
        let style = self.style.unwrap_or(StyleSettings {
            color_english: None,
            color_target: None,
        });
        let file_keys = self.api_keys.unwrap_or(ApiKeySettings {
            gemini: None,
            openai: None,
        });

        PipelineConfig {
            video_path: self.input.video_path,
            srt_path: self.input.srt_path,
            output_dir: self.output.output_dir,
            intermediate_dir: self.output.intermediate_dir,
            source_languages: self.input.source_languages.unwrap_or_default(),
            target_language: self.output.target_language,
            transcription_model: self.models.transcription_model,
            translation_model: self.models.translation_model,
            chunk_duration: chunking.chunk_duration.unwrap_or(defaults.chunk_duration),
            chunk_overlap: chunking.chunk_overlap.unwrap_or(defaults.chunk_overlap),
            chunk_format: chunking.chunk_format.unwrap_or(defaults.chunk_format),
            max_concurrent: chunking.max_concurrent.unwrap_or(defaults.max_concurrent),
            retries: self.models.retries.unwrap_or(defaults.retries),
            transcription_retries: self
                .models
                .transcription_retries
                .unwrap_or(defaults.transcription_retries),
            force: chunking.force.unwrap_or(false),
            api_keys: ApiKeys {
                gemini: file_keys.gemini.or_else(|| env_key("GEMINI_API_KEY")),
                openai: file_keys.openai.or_else(|| env_key("OPENAI_API_KEY")),
            },
            process_only_part: chunking.process_only_part,
            disable_timing_validation: validation.disable_timing_validation.unwrap_or(false),
            use_response_timings: validation.use_response_timings.unwrap_or(false),
            mark_fallbacks: self.output.mark_fallbacks.unwrap_or(false),
            fallback_marker: self
                .output
                .fallback_marker
                .unwrap_or(defaults.fallback_marker),
            color_english: style.color_english.unwrap_or(defaults.color_english),
            color_target: style.color_target.unwrap_or(defaults.color_target),
            output_offset_seconds: self.output.output_offset_seconds.unwrap_or(0.0),
            input_offset_seconds: self.input.input_offset_seconds.unwrap_or(0.0),
            transcription_timeout_secs: self
                .models
                .transcription_timeout_secs
                .unwrap_or(defaults.transcription_timeout_secs),
            translation_timeout_secs: self
                .models
                .translation_timeout_secs
                .unwrap_or(defaults.translation_timeout_secs),
        }
    }
}

fn env_key(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [input]
        video_path = "/media/movie.mkv"
        srt_path = "/media/movie.srt"

        [output]
        output_dir = "/media/out"
        intermediate_dir = "/media/work"
        target_language = "Korean"

        [models]
        transcription_model = "gemini-2.5-flash"
        translation_model = "gemini-2.5-pro"
    "#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let file: ConfigFile = toml::from_str(MINIMAL).unwrap();
        let config = file.into_pipeline_config();
        assert_eq!(config.video_path, PathBuf::from("/media/movie.mkv"));
        assert_eq!(config.chunk_duration, 1200.0);
        assert_eq!(config.chunk_overlap, 300.0);
        assert_eq!(config.chunk_format, ChunkFormat::Audio);
        assert_eq!(config.target_language_lower(), "korean");
        assert!(!config.force);
        assert!(config.process_only_part.is_none());
        assert_eq!(config.transcription_timeout_secs, 600);
        assert_eq!(config.translation_timeout_secs, 300);
    }

    #[test]
    fn test_full_sections_override_defaults() {
        let toml_str = format!(
            "{}\n{}",
            MINIMAL,
            r##"
            transcription_timeout_secs = 900
            translation_timeout_secs = 120

            [chunking]
            chunk_duration = 600.0
            chunk_overlap = 60.0
            chunk_format = "video"
            max_concurrent = 8
            force = true
            process_only_part = 2

            [validation]
            disable_timing_validation = true
            use_response_timings = true

            [style]
            color_english = "#AAAAAA"
            color_target = "#BBBBBB"

            [api_keys]
            gemini = "g-key"
            openai = "o-key"
            "##
        );
        let file: ConfigFile = toml::from_str(&toml_str).unwrap();
        let config = file.into_pipeline_config();
        assert_eq!(config.chunk_duration, 600.0);
        assert_eq!(config.chunk_format, ChunkFormat::Video);
        assert_eq!(config.max_concurrent, 8);
        assert!(config.force);
        assert_eq!(config.process_only_part, Some(2));
        assert!(config.disable_timing_validation);
        assert!(config.use_response_timings);
        assert_eq!(config.color_english, "#AAAAAA");
        assert_eq!(config.api_keys.gemini.as_deref(), Some("g-key"));
        assert_eq!(config.api_keys.openai.as_deref(), Some("o-key"));
        assert_eq!(config.transcription_timeout_secs, 900);
        assert_eq!(config.translation_timeout_secs, 120);
    }

    #[test]
    fn test_from_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, MINIMAL).unwrap();
        let file = ConfigFile::from_file(&path).unwrap();
        assert_eq!(file.output.target_language, "Korean");
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "not toml at all [").unwrap();
        assert!(ConfigFile::from_file(&path).is_err());
    }
}
