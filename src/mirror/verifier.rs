//! Structural integrity verification of mirrored files.
//!
//! Images are verified by a full decode. Videos are verified by probing the
//! container with an external utility (ffprobe) and inspecting its stream
//! metadata; a missing probe binary degrades verification to `unknown`
//! instead of failing the run. Files of category `other` have no structural
//! contract and are `ok` by definition.

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::mirror::models::{MediaCategory, VerificationResult, VerificationStatus};

/// Video-stream codecs that mean the container actually holds a still
/// image, which the platform sometimes serves under a video name.
const IMAGE_CODECS: &[&str] = &["webp", "png", "jpeg", "mjpeg", "gif", "bmp"];

/// Errors from the media probe.
#[derive(Debug, Clone, Error)]
pub enum ProbeError {
    /// The probe binary is not installed on this host.
    #[error("probe utility not available")]
    Unavailable,

    #[error("probe failed: {0}")]
    Failed(String),
}

/// Stream metadata reported by the probe for the first video stream.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub codec: String,
    pub duration_secs: Option<f64>,
    /// Frame count; estimated from duration and frame rate when the
    /// container does not carry an explicit count.
    pub frames: i64,
}

/// Capability interface over the external container-probing utility.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<StreamInfo, ProbeError>;
}

/// ffprobe JSON output structure (video stream subset).
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_name: Option<String>,
    duration: Option<String>,
    nb_frames: Option<String>,
    r_frame_rate: Option<String>,
}

/// Real probe invoking ffprobe as a subprocess.
pub struct FfprobeProbe {
    binary: String,
}

impl FfprobeProbe {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for FfprobeProbe {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

#[async_trait]
impl MediaProbe for FfprobeProbe {
    async fn probe(&self, path: &Path) -> Result<StreamInfo, ProbeError> {
        let output = Command::new(&self.binary)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=duration,r_frame_rate,nb_frames,codec_name",
                "-of",
                "json",
            ])
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ProbeError::Unavailable
                } else {
                    ProbeError::Failed(e.to_string())
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::Failed(stderr.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed: FfprobeOutput = serde_json::from_str(&stdout)
            .map_err(|e| ProbeError::Failed(format!("malformed probe output: {e}")))?;

        let stream = parsed
            .streams
            .into_iter()
            .next()
            .ok_or_else(|| ProbeError::Failed("no video stream found".to_string()))?;

        let codec = stream
            .codec_name
            .unwrap_or_else(|| "unknown".to_string())
            .to_lowercase();

        let duration_secs = stream.duration.as_deref().and_then(|d| d.parse::<f64>().ok());

        let frames = stream
            .nb_frames
            .as_deref()
            .and_then(|n| n.parse::<i64>().ok())
            .unwrap_or_else(|| {
                let fps = stream
                    .r_frame_rate
                    .as_deref()
                    .and_then(parse_frame_rate)
                    .unwrap_or(0.0);
                duration_secs
                    .filter(|_| fps > 0.0)
                    .map(|d| (d * fps) as i64)
                    .unwrap_or(0)
            });

        Ok(StreamInfo {
            codec,
            duration_secs,
            frames,
        })
    }
}

/// Parse an ffprobe frame-rate fraction such as "30000/1001".
fn parse_frame_rate(raw: &str) -> Option<f64> {
    match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            (den != 0.0).then_some(num / den)
        }
        None => raw.parse().ok(),
    }
}

/// Test double returning a fixed probe outcome.
pub struct CannedProbe {
    outcome: Result<StreamInfo, ProbeError>,
}

impl CannedProbe {
    pub fn new(outcome: Result<StreamInfo, ProbeError>) -> Self {
        Self { outcome }
    }
}

#[async_trait]
impl MediaProbe for CannedProbe {
    async fn probe(&self, _path: &Path) -> Result<StreamInfo, ProbeError> {
        self.outcome.clone()
    }
}

/// Verifies structural soundness of files by category.
pub struct IntegrityVerifier {
    probe: Arc<dyn MediaProbe>,
    probe_unavailable_logged: AtomicBool,
}

impl IntegrityVerifier {
    pub fn new(probe: Arc<dyn MediaProbe>) -> Self {
        Self {
            probe,
            probe_unavailable_logged: AtomicBool::new(false),
        }
    }

    /// Verify one file. Never errors: every failure mode maps to a status.
    pub async fn verify(&self, path: &Path, category: MediaCategory) -> VerificationResult {
        let status = match category {
            MediaCategory::Image => self.verify_image(path),
            MediaCategory::Video => self.verify_video(path).await,
            MediaCategory::Other => VerificationStatus::Ok,
        };
        if let VerificationStatus::Corrupt(reason) = &status {
            debug!("Verification failed for {:?}: {}", path, reason);
        }
        VerificationResult {
            local_path: path.to_path_buf(),
            status,
        }
    }

    fn verify_image(&self, path: &Path) -> VerificationStatus {
        let reader = match image::ImageReader::open(path) {
            Ok(reader) => reader,
            Err(e) => return VerificationStatus::Corrupt(format!("unreadable: {e}")),
        };
        let reader = match reader.with_guessed_format() {
            Ok(reader) => reader,
            Err(e) => return VerificationStatus::Corrupt(format!("unreadable: {e}")),
        };
        match reader.decode() {
            Ok(_) => VerificationStatus::Ok,
            Err(e) => VerificationStatus::Corrupt(format!("decode error: {e}")),
        }
    }

    async fn verify_video(&self, path: &Path) -> VerificationStatus {
        let info = match self.probe.probe(path).await {
            Ok(info) => info,
            Err(ProbeError::Unavailable) => {
                // Logged once per run to avoid flooding when every video
                // degrades to unknown.
                if !self.probe_unavailable_logged.swap(true, Ordering::SeqCst) {
                    warn!("Probe utility not found; video verification degraded to 'unknown'");
                }
                return VerificationStatus::Unknown;
            }
            Err(ProbeError::Failed(reason)) => {
                return VerificationStatus::Corrupt(format!("probe failed: {reason}"))
            }
        };

        if IMAGE_CODECS.contains(&info.codec.as_str()) {
            return VerificationStatus::Corrupt(format!(
                "image codec '{}' in video container",
                info.codec
            ));
        }
        // ffprobe often reports no duration for vp9 streams; treat as sound.
        if info.codec == "vp9" {
            return VerificationStatus::Ok;
        }
        match info.duration_secs {
            Some(duration) if duration > 0.0 => {}
            _ => return VerificationStatus::Corrupt("no playable duration".to_string()),
        }
        if info.frames <= 1 {
            return VerificationStatus::Corrupt(format!("{} frame(s)", info.frames));
        }
        VerificationStatus::Ok
    }
}
