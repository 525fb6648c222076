//! External transcoder contract
//!
//! The pipeline treats ffmpeg/ffprobe as external collaborators with two
//! operations: probe the total duration of the input, and produce one media
//! slice per time window. Both run as subprocesses; a non-zero exit is an
//! error carrying the tool's stderr.

use serde::Deserialize;
use std::path::Path;
use tokio::process::Command;

use crate::config::ChunkFormat;
use crate::error::{PipelineError, Result};

/// Verify that ffmpeg and ffprobe are on PATH.
pub async fn check_available() -> Result<()> {
    for tool in ["ffmpeg", "ffprobe"] {
        let status = Command::new(tool)
            .arg("-version")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await
            .map_err(|e| PipelineError::Probe(format!("{} not available: {}", tool, e)))?;
        if !status.success() {
            return Err(PipelineError::Probe(format!("{} exited with failure", tool)));
        }
    }
    Ok(())
}

/// Probe the input for its total duration in seconds.
///
/// Non-zero exit or unparseable output is fatal: without a duration there is
/// nothing to segment.
pub async fn probe_duration(input: &Path) -> Result<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "json",
        ])
        .arg(input)
        .output()
        .await
        .map_err(|e| PipelineError::Probe(format!("failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        return Err(PipelineError::Probe(format!(
            "ffprobe failed for {}: {}",
            input.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    parse_probe_output(&String::from_utf8_lossy(&output.stdout))
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    format: ProbeFormat,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: String,
}

/// Parse ffprobe's `-of json` output into a duration.
fn parse_probe_output(json: &str) -> Result<f64> {
    let parsed: ProbeOutput = serde_json::from_str(json)
        .map_err(|e| PipelineError::Probe(format!("unparseable ffprobe output: {}", e)))?;
    let duration: f64 = parsed
        .format
        .duration
        .parse()
        .map_err(|_| PipelineError::Probe(format!("bad duration '{}'", parsed.format.duration)))?;
    if duration <= 0.0 {
        return Err(PipelineError::Probe(format!(
            "non-positive duration {}",
            duration
        )));
    }
    Ok(duration)
}

/// Produce a media slice covering `[start_sec, start_sec + dur_sec)`.
///
/// Audio slices are 64k mono mp3; video slices are 360p x264 with the audio
/// track dropped.
pub async fn slice_media(
    input: &Path,
    output: &Path,
    start_sec: f64,
    dur_sec: f64,
    format: ChunkFormat,
) -> Result<()> {
    let args = slice_args(format);

    let mut command = Command::new("ffmpeg");
    command
        .args(["-nostdin", "-hide_banner", "-loglevel", "error", "-y"])
        .args(["-ss", &format_secs(start_sec), "-t", &format_secs(dur_sec)])
        .arg("-i")
        .arg(input)
        .args(&args)
        .arg(output);

    let result = command
        .output()
        .await
        .map_err(|e| PipelineError::Split(format!("failed to run ffmpeg: {}", e)))?;

    if !result.status.success() {
        return Err(PipelineError::Split(format!(
            "ffmpeg slice failed for {}: {}",
            output.display(),
            String::from_utf8_lossy(&result.stderr).trim()
        )));
    }
    Ok(())
}

/// Encoder arguments per slice format. `-ss`/`-t`/`-i` are added by the caller.
fn slice_args(format: ChunkFormat) -> Vec<&'static str> {
    match format {
        ChunkFormat::Audio => vec!["-vn", "-codec:a", "libmp3lame", "-b:a", "64k", "-ac", "1"],
        ChunkFormat::Video => vec![
            "-an",
            "-vf",
            "scale=-2:360",
            "-c:v",
            "libx264",
            "-preset",
            "veryfast",
            "-crf",
            "28",
        ],
    }
}

fn format_secs(secs: f64) -> String {
    format!("{:.3}", secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probe_output() {
        let json = r#"{"format": {"duration": "1800.042000"}}"#;
        let duration = parse_probe_output(json).unwrap();
        assert!((duration - 1800.042).abs() < 1e-9);
    }

    #[test]
    fn test_parse_probe_output_rejects_garbage() {
        assert!(parse_probe_output("not json").is_err());
        assert!(parse_probe_output(r#"{"format": {"duration": "nan?"}}"#).is_err());
        assert!(parse_probe_output(r#"{"format": {"duration": "0"}}"#).is_err());
    }

    #[test]
    fn test_slice_args_audio() {
        let args = slice_args(ChunkFormat::Audio);
        assert!(args.contains(&"-vn"));
        assert!(args.contains(&"libmp3lame"));
    }

    #[test]
    fn test_slice_args_video_drops_audio() {
        let args = slice_args(ChunkFormat::Video);
        assert!(args.contains(&"-an"));
        assert!(args.contains(&"scale=-2:360"));
    }

    #[test]
    fn test_format_secs() {
        assert_eq!(format_secs(900.0), "900.000");
        assert_eq!(format_secs(0.05), "0.050");
    }
}
