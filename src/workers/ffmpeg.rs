//! `ffmpeg` subprocess implementations of [`Encoder`] and [`QualityScorer`].
//!
//! Both stage their inputs as temp files, since ffmpeg needs seekable inputs
//! for mp4 containers.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;

use super::transcoder::{EncodeError, Encoder, MetricError, QualityScorer};
use crate::modules::jobs::model::{EncodeParameters, QualityMetrics};

/// Removes its files when dropped, including when a timeout cancels the
/// future that owns it.
struct TempFiles(Vec<PathBuf>);

impl TempFiles {
    fn new() -> Self {
        Self(Vec::new())
    }

    fn path(&mut self, suffix: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("encode_sweep_{}_{}", Uuid::new_v4().simple(), suffix));
        self.0.push(path.clone());
        path
    }
}

impl Drop for TempFiles {
    fn drop(&mut self) {
        for path in &self.0 {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Last non-empty stderr line, which is where ffmpeg puts the reason it gave up.
fn last_line(stderr: &[u8]) -> Option<String> {
    String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .map(str::to_string)
}

/// Extracts the overall score from the ssim filter summary line, e.g.
/// `SSIM Y:0.981 (17.2) U:0.990 (20.1) V:0.989 (19.8) All:0.984 (17.9)`.
pub fn parse_ssim(stderr: &str) -> Option<f64> {
    let start = stderr.rfind("All:")? + "All:".len();
    stderr[start..]
        .split_whitespace()
        .next()?
        .parse::<f64>()
        .ok()
        .filter(|score| score.is_finite())
}

#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    bin: String,
    preset: String,
}

impl FfmpegEncoder {
    pub fn new(bin: impl Into<String>, preset: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            preset: preset.into(),
        }
    }

    pub fn args(&self, input: &str, output: &str, parameters: &EncodeParameters) -> Vec<String> {
        let crf = parameters.rate_control_factor.to_string();
        let x265_params = format!("qpmax={}", parameters.quantization);

        [
            "-hide_banner",
            "-loglevel",
            "error",
            "-i",
            input,
            "-c:v",
            "libx265",
            "-preset",
            self.preset.as_str(),
            "-crf",
            crf.as_str(),
            "-x265-params",
            x265_params.as_str(),
            "-an",
            "-sn",
            "-y",
            output,
        ]
        .iter()
        .map(|arg| arg.to_string())
        .collect()
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn encode(&self, source: &Bytes, parameters: &EncodeParameters) -> Result<Bytes, EncodeError> {
        let mut files = TempFiles::new();
        let input = files.path("source");
        let output = files.path("encoded.mp4");

        tokio::fs::write(&input, source)
            .await
            .map_err(|e| EncodeError::transient(format!("failed to stage source: {e}")))?;

        let args = self.args(&input.to_string_lossy(), &output.to_string_lossy(), parameters);
        debug!("Running {} {}", self.bin, args.join(" "));

        let result = Command::new(&self.bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| EncodeError::transient(format!("failed to run {}: {e}", self.bin)))?;

        if !result.status.success() {
            return Err(EncodeError::fatal(
                last_line(&result.stderr).unwrap_or_else(|| format!("ffmpeg exited with {}", result.status)),
            ));
        }

        let encoded = tokio::fs::read(&output)
            .await
            .map_err(|e| EncodeError::transient(format!("failed to read encoded output: {e}")))?;
        Ok(Bytes::from(encoded))
    }
}

#[derive(Debug, Clone)]
pub struct FfmpegSsimScorer {
    bin: String,
}

impl FfmpegSsimScorer {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }
}

#[async_trait]
impl QualityScorer for FfmpegSsimScorer {
    async fn score(&self, source: &Bytes, artifact: &Bytes) -> Result<QualityMetrics, MetricError> {
        let mut files = TempFiles::new();
        let reference = files.path("reference");
        let distorted = files.path("distorted.mp4");

        for (path, body) in [(&reference, source), (&distorted, artifact)] {
            tokio::fs::write(path, body)
                .await
                .map_err(|e| MetricError::transient(format!("failed to stage input: {e}")))?;
        }

        let result = Command::new(&self.bin)
            .arg("-hide_banner")
            .arg("-nostats")
            .arg("-i")
            .arg(&distorted)
            .arg("-i")
            .arg(&reference)
            .args(["-lavfi", "ssim", "-f", "null", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| MetricError::transient(format!("failed to run {}: {e}", self.bin)))?;

        let stderr = String::from_utf8_lossy(&result.stderr);
        if !result.status.success() {
            return Err(MetricError::fatal(
                last_line(&result.stderr).unwrap_or_else(|| format!("ffmpeg exited with {}", result.status)),
            ));
        }

        let quality_score = parse_ssim(&stderr)
            .ok_or_else(|| MetricError::fatal("ssim filter produced no overall score"))?;

        Ok(QualityMetrics {
            quality_score,
            source_size: source.len() as u64,
            output_size: artifact.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_arguments() {
        let encoder = FfmpegEncoder::new("ffmpeg", "veryslow");
        let args = encoder.args("in.mkv", "out.mp4", &EncodeParameters::new(30, 20));
        let joined = args.join(" ");
        assert!(joined.contains("-i in.mkv"));
        assert!(joined.contains("-c:v libx265 -preset veryslow -crf 20 -x265-params qpmax=30"));
        assert!(joined.ends_with("-an -sn -y out.mp4"));
    }

    #[test]
    fn test_parse_ssim_summary() {
        let stderr = "frame=  240 fps=0.0\n\
            [Parsed_ssim_0 @ 0x5581] SSIM Y:0.981 (17.2) U:0.990 (20.1) V:0.989 (19.8) All:0.984321 (17.9)\n";
        assert_eq!(parse_ssim(stderr), Some(0.984321));
    }

    #[test]
    fn test_parse_ssim_without_summary() {
        assert_eq!(parse_ssim("Conversion failed!"), None);
        assert_eq!(parse_ssim("All:nan"), None);
    }

    #[test]
    fn test_last_stderr_line() {
        let stderr = b"Input #0, matroska\n  Stream #0:0: Video: foo\nunsupported codec\n\n";
        assert_eq!(last_line(stderr).as_deref(), Some("unsupported codec"));
        assert_eq!(last_line(b"  \n"), None);
    }

    #[test]
    fn test_temp_files_are_removed_on_drop() {
        let path = {
            let mut files = TempFiles::new();
            let path = files.path("probe");
            std::fs::write(&path, b"x").unwrap();
            assert!(path.exists());
            path
        };
        assert!(!path.exists());
    }
}
