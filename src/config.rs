//! Pipeline configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{PipelineError, Result};

/// Output form of a media slice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkFormat {
    /// Compressed audio (mp3)
    Audio,
    /// Low-resolution 360p video (mp4)
    Video,
}

impl ChunkFormat {
    /// File extension for slices in this format
    pub fn extension(&self) -> &'static str {
        match self {
            ChunkFormat::Audio => "mp3",
            ChunkFormat::Video => "mp4",
        }
    }
}

/// API keys for the two LLM providers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiKeys {
    /// Gemini API key (multimodal transcription, optionally translation)
    pub gemini: Option<String>,

    /// OpenAI API key (translation)
    pub openai: Option<String>,
}

/// Complete runtime configuration for one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Input video path
    pub video_path: PathBuf,

    /// Optional reference subtitle file (SRT)
    pub srt_path: Option<PathBuf>,

    /// Directory for the final subtitle file
    pub output_dir: PathBuf,

    /// Directory for per-segment intermediate artifacts
    pub intermediate_dir: PathBuf,

    /// Spoken languages to transcribe (empty = let the model detect)
    pub source_languages: Vec<String>,

    /// Target translation language name (e.g. "korean")
    pub target_language: String,

    /// Multimodal model used for transcription (must be a Gemini model)
    pub transcription_model: String,

    /// Text model used for translation
    pub translation_model: String,

    /// Segment window length in seconds
    pub chunk_duration: f64,

    /// Overlap between adjacent windows in seconds
    pub chunk_overlap: f64,

    /// Media slice form
    pub chunk_format: ChunkFormat,

    /// Concurrency bound for slicing, transcription and translation
    pub max_concurrent: usize,

    /// Translation retry budget (API errors and validation failures)
    pub retries: u32,

    /// Transcription validation retry budget
    pub transcription_retries: u32,

    /// Redo work even when intermediate artifacts already exist
    pub force: bool,

    /// Provider API keys
    pub api_keys: ApiKeys,

    /// Restrict the run to a single part number
    pub process_only_part: Option<u32>,

    /// Skip the timing-consistency check in translation validation
    pub disable_timing_validation: bool,

    /// Take output timings from the LLM response instead of the reference
    pub use_response_timings: bool,

    /// Prefix fallback english lines with the fallback marker
    pub mark_fallbacks: bool,

    /// Marker prepended to fallback english lines
    pub fallback_marker: String,

    /// Hex color for english lines
    pub color_english: String,

    /// Hex color for target-language lines
    pub color_target: String,

    /// Signed offset applied to every output entry, seconds
    pub output_offset_seconds: f64,

    /// Signed offset applied to the reference subtitle on read, seconds
    pub input_offset_seconds: f64,

    /// Per-call timeout for transcription requests (upload included), seconds
    pub transcription_timeout_secs: u64,

    /// Per-call timeout for translation requests, seconds
    pub translation_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            video_path: PathBuf::new(),
            srt_path: None,
            output_dir: PathBuf::from("."),
            intermediate_dir: PathBuf::from("bisub_work"),
            source_languages: Vec::new(),
            target_language: String::new(),
            transcription_model: "gemini-2.5-flash".to_string(),
            translation_model: "gemini-2.5-pro".to_string(),
            chunk_duration: 1200.0,
            chunk_overlap: 300.0,
            chunk_format: ChunkFormat::Audio,
            max_concurrent: 3,
            retries: 2,
            transcription_retries: 2,
            force: false,
            api_keys: ApiKeys::default(),
            process_only_part: None,
            disable_timing_validation: false,
            use_response_timings: false,
            mark_fallbacks: false,
            fallback_marker: "*".to_string(),
            color_english: "#FFFFFF".to_string(),
            color_target: "#FFFF00".to_string(),
            output_offset_seconds: 0.0,
            input_offset_seconds: 0.0,
            transcription_timeout_secs: 600,
            translation_timeout_secs: 300,
        }
    }
}

impl PipelineConfig {
    /// Validate cross-field constraints before the pipeline starts.
    pub fn validate(&self) -> Result<()> {
        if self.video_path.as_os_str().is_empty() {
            return Err(PipelineError::Config("video_path is required".into()));
        }
        if self.target_language.trim().is_empty() {
            return Err(PipelineError::Config("target_language is required".into()));
        }
        if self.chunk_duration <= 0.0 {
            return Err(PipelineError::Config(format!(
                "chunk_duration must be positive, got {}",
                self.chunk_duration
            )));
        }
        if self.chunk_overlap < 0.0 || self.chunk_overlap >= self.chunk_duration {
            return Err(PipelineError::Config(format!(
                "chunk_overlap must be in [0, chunk_duration), got {}",
                self.chunk_overlap
            )));
        }
        if self.max_concurrent == 0 {
            return Err(PipelineError::Config("max_concurrent must be at least 1".into()));
        }
        // The multimodal transcription contract (file upload, streamed text,
        // deletion) is the Gemini File API.
        if !self.transcription_model.contains("gemini") {
            return Err(PipelineError::Config(format!(
                "transcription_model must be a Gemini model, got '{}'",
                self.transcription_model
            )));
        }
        if self.api_keys.gemini.is_none() {
            return Err(PipelineError::Config(
                "Gemini API key not set (api_keys.gemini or GEMINI_API_KEY)".into(),
            ));
        }
        if !self.translation_model.contains("gemini") && self.api_keys.openai.is_none() {
            return Err(PipelineError::Config(
                "OpenAI API key not set (api_keys.openai or OPENAI_API_KEY)".into(),
            ));
        }
        Ok(())
    }

    /// Lowercased target language, used in tag names and the output filename.
    pub fn target_language_lower(&self) -> String {
        self.target_language.to_lowercase()
    }

    /// Final output path: `{videoBaseName}.bilingual.{targetLangLower}.srt`
    pub fn output_path(&self) -> PathBuf {
        let base = self
            .video_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "output".to_string());
        self.output_dir
            .join(format!("{}.bilingual.{}.srt", base, self.target_language_lower()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> PipelineConfig {
        PipelineConfig {
            video_path: PathBuf::from("/tmp/movie.mkv"),
            target_language: "Korean".to_string(),
            api_keys: ApiKeys {
                gemini: Some("key".to_string()),
                openai: None,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_default_tunables() {
        let config = PipelineConfig::default();
        assert_eq!(config.chunk_duration, 1200.0);
        assert_eq!(config.chunk_overlap, 300.0);
        assert_eq!(config.chunk_format, ChunkFormat::Audio);
        assert_eq!(config.max_concurrent, 3);
        assert!(!config.use_response_timings);
    }

    #[test]
    fn test_validate_accepts_gemini_only() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_overlap() {
        let config = PipelineConfig {
            chunk_overlap: 1200.0,
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_gemini_transcription() {
        let config = PipelineConfig {
            transcription_model: "gpt-4o".to_string(),
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_openai_key_for_gpt_translation() {
        let config = PipelineConfig {
            translation_model: "gpt-4o-mini".to_string(),
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_output_path() {
        let config = valid_config();
        assert_eq!(
            config.output_path(),
            PathBuf::from("./movie.bilingual.korean.srt")
        );
    }

    #[test]
    fn test_chunk_format_extension() {
        assert_eq!(ChunkFormat::Audio.extension(), "mp3");
        assert_eq!(ChunkFormat::Video.extension(), "mp4");
    }
}
