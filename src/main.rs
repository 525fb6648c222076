//! Bilingual Subtitle Pipeline
//!
//! Converts a video plus an optional reference subtitle file into a final
//! bilingual SRT (english + one configured target language) by segmenting
//! the media with ffmpeg, transcribing each segment with a multimodal LLM,
//! translating each segment with a text LLM, and merging the per-segment
//! results into one timing-correct subtitle stream.

mod config;
mod config_file;
mod error;
mod ffmpeg;
mod issue;
mod llm;
mod macros;
mod merge;
mod output;
mod pipeline;
mod segment;
mod srt;
mod transcribe;
mod translate;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config_file::ConfigFile;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
const APP_NAME: &str = "bisub";

#[tokio::main]
async fn main() {
    init_logging();
    tracing::info!("{} v{} starting", APP_NAME, VERSION);

    let config_path = match std::env::args().nth(1) {
        Some(path) => path,
        None => {
            eprintln!("usage: {} <config.toml>", APP_NAME);
            std::process::exit(1);
        }
    };

    let config = match ConfigFile::from_file(&config_path) {
        Ok(file) => file.into_pipeline_config(),
        Err(e) => {
            tracing::error!("failed to load config {}: {}", config_path, e);
            std::process::exit(1);
        }
    };

    match pipeline::run_pipeline(config).await {
        Ok(report) => {
            if report.completed_segments == 0 {
                tracing::error!("no segment completed");
                std::process::exit(1);
            }
        }
        Err(e) => {
            tracing::error!("pipeline failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Initialize logging with tracing
fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bisub=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
