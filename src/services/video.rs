//! Video compression through ffprobe/ffmpeg subprocesses.
//!
//! The source is probed for duration and width, an encode plan is derived
//! from the requested target size and width, and ffmpeg runs with
//! `-progress pipe:2` so percent-complete can be reported while it works.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use uuid::Uuid;

use crate::models::job::Artifact;
use crate::models::media::VideoOptions;
use crate::services::transform::{JobInput, Progress, TransformAdapter, TransformError};

/// Floor for the computed video bitrate (bits/s).
pub const MIN_VIDEO_BITRATE: i64 = 100_000;
/// Share of the size budget kept for the audio track (bits/s).
pub const AUDIO_BITRATE_RESERVE: i64 = 128_000;
/// Constant-quality fallback when no target size is requested.
pub const DEFAULT_CRF: u8 = 26;

const STDERR_TAIL_LINES: usize = 20;

/// What ffprobe told us about the source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeInfo {
    pub duration_secs: Option<f64>,
    pub width: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    width: Option<u32>,
}

/// Parse `ffprobe -print_format json -show_format -show_streams` output.
pub fn parse_probe_output(json: &[u8]) -> Result<ProbeInfo, TransformError> {
    let output: FfprobeOutput =
        serde_json::from_slice(json).map_err(|e| TransformError::Probe(e.to_string()))?;

    let duration_secs = output
        .format
        .duration
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0);

    let width = output
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .and_then(|s| s.width);

    Ok(ProbeInfo {
        duration_secs,
        width,
    })
}

/// Video bitrate that lands the output near `target_mb` MiB.
///
/// `max(100000, floor(target_mb * 8 * 1024 * 1024 / duration) - 128000)`
pub fn target_video_bitrate(target_mb: f64, duration_secs: f64) -> u64 {
    let target_bits = target_mb * 8.0 * 1024.0 * 1024.0;
    let total_bitrate = (target_bits / duration_secs).floor() as i64;
    (total_bitrate - AUDIO_BITRATE_RESERVE).max(MIN_VIDEO_BITRATE) as u64
}

/// Encoder settings for one job.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodePlan {
    pub video_bitrate: Option<u64>,
    pub crf: Option<u8>,
    pub scale_width: Option<u32>,
}

impl EncodePlan {
    pub fn derive(options: &VideoOptions, probe: &ProbeInfo) -> Self {
        let video_bitrate = match (options.target_mb, probe.duration_secs) {
            (Some(mb), Some(duration)) => Some(target_video_bitrate(mb, duration)),
            _ => None,
        };

        // Downscale only; never enlarge.
        let scale_width = match (options.width, probe.width) {
            (Some(target), Some(source)) if target < source => Some(target),
            _ => None,
        };

        Self {
            video_bitrate,
            crf: if video_bitrate.is_none() {
                Some(DEFAULT_CRF)
            } else {
                None
            },
            scale_width,
        }
    }

    pub fn output_args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-c:v", "libx264", "-movflags", "+faststart", "-preset", "fast"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        if let Some(bitrate) = self.video_bitrate {
            args.extend([
                "-b:v".to_string(),
                bitrate.to_string(),
                "-maxrate".to_string(),
                (bitrate * 3 / 2).to_string(),
                "-bufsize".to_string(),
                (bitrate * 2).to_string(),
            ]);
        } else if let Some(crf) = self.crf {
            args.extend(["-crf".to_string(), crf.to_string()]);
        }

        if let Some(width) = self.scale_width {
            args.extend(["-vf".to_string(), format!("scale={}:-2", width)]);
        }

        args
    }
}

/// Full ffmpeg argument list for a planned encode.
pub fn build_ffmpeg_args(input: &Path, output: &Path, plan: &EncodePlan) -> Vec<String> {
    let mut args: Vec<String> = ["-y", "-v", "error", "-progress", "pipe:2", "-nostats", "-i"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.push(input.to_string_lossy().into_owned());
    args.extend(plan.output_args());
    args.push(output.to_string_lossy().into_owned());
    args
}

/// Snapshot of ffmpeg's `-progress` key/value block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodeProgress {
    pub out_time_us: i64,
    pub speed: Option<f64>,
    pub is_complete: bool,
}

impl EncodeProgress {
    /// Percent of the source encoded so far, if the duration is known.
    pub fn percent(&self, duration_secs: Option<f64>) -> Option<f64> {
        let duration_us = duration_secs? * 1_000_000.0;
        if duration_us <= 0.0 {
            return None;
        }
        Some(self.out_time_us as f64 / duration_us * 100.0)
    }
}

/// Feed one stderr line; returns a snapshot at the end of each block.
pub fn parse_progress_line(line: &str, current: &mut EncodeProgress) -> Option<EncodeProgress> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        // ffmpeg reports out_time_ms in microseconds as well.
        "out_time_us" | "out_time_ms" => {
            if let Ok(us) = value.parse::<i64>() {
                current.out_time_us = us;
            }
        }
        "speed" => {
            current.speed = value.strip_suffix('x').and_then(|s| s.trim().parse().ok());
        }
        "progress" => {
            current.is_complete = value == "end";
            return Some(current.clone());
        }
        _ => {}
    }
    None
}

fn is_progress_key(line: &str) -> bool {
    matches!(
        line.split_once('=').map(|(k, _)| k),
        Some(
            "frame" | "fps" | "stream_0_0_q" | "bitrate" | "total_size" | "out_time_us"
                | "out_time_ms" | "out_time" | "dup_frames" | "drop_frames" | "speed"
                | "progress"
        )
    )
}

/// Transcode adapter backed by ffmpeg and ffprobe binaries.
pub struct VideoAdapter {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    output_dir: PathBuf,
}

impl VideoAdapter {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            output_dir: output_dir.into(),
        }
    }

    /// Whether both tools resolve on PATH (or as given).
    pub fn tools_available(&self) -> bool {
        which::which(&self.ffmpeg).is_ok() && which::which(&self.ffprobe).is_ok()
    }

    pub async fn probe(&self, input: &Path) -> Result<ProbeInfo, TransformError> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(input)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| tool_spawn_error("ffprobe", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(TransformError::Probe(if stderr.is_empty() {
                format!("ffprobe exited with {}", output.status)
            } else {
                stderr
            }));
        }

        parse_probe_output(&output.stdout)
    }

    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        plan: &EncodePlan,
        duration_secs: Option<f64>,
        progress: &Progress,
    ) -> Result<(), TransformError> {
        let args = build_ffmpeg_args(input, output, plan);
        tracing::debug!(args = %args.join(" "), "Running ffmpeg");

        let mut child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| tool_spawn_error("ffmpeg", e))?;

        let stderr = child.stderr.take().ok_or_else(|| TransformError::Tool {
            tool: "ffmpeg".to_string(),
            message: "stderr was not captured".to_string(),
        })?;
        let mut lines = BufReader::new(stderr).lines();
        let mut current = EncodeProgress::default();
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let cancel = progress.cancellation();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    return Err(TransformError::Cancelled);
                }
                line = lines.next_line() => match line? {
                    Some(line) => {
                        if let Some(snapshot) = parse_progress_line(&line, &mut current) {
                            if let Some(percent) = snapshot.percent(duration_secs) {
                                progress.report(percent);
                            }
                        } else if !is_progress_key(&line) && !line.trim().is_empty() {
                            if tail.len() == STDERR_TAIL_LINES {
                                tail.pop_front();
                            }
                            tail.push_back(line);
                        }
                    }
                    None => break,
                },
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(TransformError::Cancelled);
            }
            status = child.wait() => status?,
        };

        if status.success() {
            Ok(())
        } else {
            let message = if tail.is_empty() {
                format!("exited with {}", status)
            } else {
                tail.into_iter().collect::<Vec<_>>().join("\n")
            };
            Err(TransformError::Tool {
                tool: "ffmpeg".to_string(),
                message,
            })
        }
    }
}

#[async_trait]
impl TransformAdapter for VideoAdapter {
    type Options = VideoOptions;

    fn name(&self) -> &'static str {
        "video"
    }

    async fn run(
        &self,
        input: &JobInput,
        options: &VideoOptions,
        progress: &Progress,
    ) -> Result<Artifact, TransformError> {
        let source = input.local_path().ok_or_else(|| {
            TransformError::UnsupportedInput("video input must be a local file".to_string())
        })?;

        let probe = self.probe(source).await?;
        let plan = EncodePlan::derive(options, &probe);
        tracing::info!(
            duration_secs = ?probe.duration_secs,
            source_width = ?probe.width,
            video_bitrate = ?plan.video_bitrate,
            crf = ?plan.crf,
            scale_width = ?plan.scale_width,
            "Encode plan"
        );

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let id = progress.job_id().unwrap_or_else(Uuid::new_v4);
        let output = self.output_dir.join(format!("compressed_{}.mp4", id));

        if let Err(e) = self
            .transcode(source, &output, &plan, probe.duration_secs, progress)
            .await
        {
            if let Err(rm) = tokio::fs::remove_file(&output).await {
                tracing::debug!(error = %rm, "No partial output to remove");
            }
            return Err(e);
        }

        let size_bytes = tokio::fs::metadata(&output).await?.len();
        Ok(Artifact::file(output, size_bytes, "video/mp4", "mp4"))
    }
}

fn tool_spawn_error(tool: &str, e: std::io::Error) -> TransformError {
    if e.kind() == std::io::ErrorKind::NotFound {
        TransformError::ToolNotFound(tool.to_string())
    } else {
        TransformError::Io(e)
    }
}
