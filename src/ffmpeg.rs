// src/ffmpeg.rs

use crate::error::{Result, VqsweepError};
use log::{debug, error, info};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

#[derive(Debug, Clone)]
pub struct VideoInfo {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub frame_count: u64,
    pub fps: f64,
    pub pix_fmt: String,
}

// ffprobe -of json output, limited to the entries we request.

#[derive(Deserialize, Debug)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: Option<ProbeFormat>,
}

#[derive(Deserialize, Debug)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    pix_fmt: Option<String>,
    nb_frames: Option<String>,
    nb_read_frames: Option<String>,
    r_frame_rate: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct ProbeFormat {
    nb_frames: Option<String>,
}

/// Runs ffprobe to get video metadata.
pub fn probe_video(video_path: &Path) -> Result<VideoInfo> {
    info!("Probing video file: {}", video_path.display());
    if !video_path.exists() {
        return Err(VqsweepError::Input(format!(
            "Input video file not found: {}",
            video_path.display()
        )));
    }

    let path_arg = video_path
        .to_str()
        .ok_or_else(|| VqsweepError::Input("Invalid video path".to_string()))?;
    let stdout = run_capture(
        "ffprobe",
        &[
            "-v",
            "error",
            "-count_frames",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,pix_fmt,nb_frames,nb_read_frames,r_frame_rate:format=nb_frames",
            "-of",
            "json",
            path_arg,
        ],
        "ffprobe",
    )?;
    debug!("ffprobe output for {}: {}", video_path.display(), stdout);

    let info = video_info_from_json(video_path, &stdout)?;
    info!(
        "Detected info for {}: {}x{} @ {} fps, {} frames, pix_fmt {}",
        video_path.display(),
        info.width,
        info.height,
        info.fps,
        info.frame_count,
        info.pix_fmt
    );
    Ok(info)
}

fn video_info_from_json(video_path: &Path, json: &str) -> Result<VideoInfo> {
    let probe: ProbeOutput = serde_json::from_str(json)?;
    let stream = probe
        .streams
        .first()
        .ok_or_else(|| VqsweepError::Parse("No video stream found in ffprobe output".to_string()))?;

    let width = stream
        .width
        .ok_or_else(|| VqsweepError::Parse("Missing width in ffprobe output".to_string()))?;
    let height = stream
        .height
        .ok_or_else(|| VqsweepError::Parse("Missing height in ffprobe output".to_string()))?;

    // nb_frames is absent for some containers; -count_frames guarantees
    // nb_read_frames as the last resort.
    let frame_count_str = stream
        .nb_frames
        .as_deref()
        .or_else(|| probe.format.as_ref().and_then(|f| f.nb_frames.as_deref()))
        .or(stream.nb_read_frames.as_deref())
        .ok_or_else(|| {
            VqsweepError::Parse(format!(
                "ffprobe reported no frame count for {}",
                video_path.display()
            ))
        })?;
    let frame_count = frame_count_str
        .parse::<u64>()
        .map_err(|_| VqsweepError::Parse(format!("Invalid frame count: {frame_count_str}")))?;

    let fps_str = stream
        .r_frame_rate
        .as_deref()
        .ok_or_else(|| VqsweepError::Parse("Missing r_frame_rate in ffprobe output".to_string()))?;
    let fps = parse_frame_rate(fps_str)?;

    Ok(VideoInfo {
        path: video_path.to_path_buf(),
        width,
        height,
        frame_count,
        fps,
        pix_fmt: stream.pix_fmt.clone().unwrap_or_else(|| "unknown".to_string()),
    })
}

/// Parses frame rate string (e.g., "24000/1001") into f64.
fn parse_frame_rate(fps_str: &str) -> Result<f64> {
    if fps_str.contains('/') {
        let parts: Vec<&str> = fps_str.split('/').collect();
        if parts.len() == 2 {
            let num = parts[0]
                .parse::<f64>()
                .map_err(|_| VqsweepError::Parse(format!("Invalid FPS numerator: {}", parts[0])))?;
            let den = parts[1]
                .parse::<f64>()
                .map_err(|_| VqsweepError::Parse(format!("Invalid FPS denominator: {}", parts[1])))?;
            if den == 0.0 {
                Err(VqsweepError::Parse("FPS denominator cannot be zero".to_string()))
            } else {
                Ok(num / den)
            }
        } else {
            Err(VqsweepError::Parse(format!("Invalid FPS format: {fps_str}")))
        }
    } else {
        fps_str
            .parse::<f64>()
            .map_err(|_| VqsweepError::Parse(format!("Invalid FPS format: {fps_str}")))
    }
}

// --- Command Builders ---

/// Arguments to encode one sweep variant. NVENC presets only apply to
/// the AV1 encoder; the others run with their defaults.
pub fn encode_args(input: &Path, output: &Path, codec: &str, bitrate_kbps: u32) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "warning".to_string(),
        "-i".to_string(),
        input.to_string_lossy().to_string(),
        "-c:v".to_string(),
        codec.to_string(),
        "-b:v".to_string(),
        format!("{bitrate_kbps}k"),
    ];
    if codec == "av1_nvenc" {
        args.push("-preset".to_string());
        args.push("p5".to_string());
    }
    args.push("-pix_fmt".to_string());
    args.push("yuv420p".to_string());
    args.push(output.to_string_lossy().to_string());
    args
}

/// Arguments to decode a compressed file to planar YUV 4:2:0.
pub fn decode_args(input: &Path, output: &Path, threads: usize) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "warning".to_string(),
        "-threads".to_string(),
        threads.to_string(),
        "-i".to_string(),
        input.to_string_lossy().to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        output.to_string_lossy().to_string(),
    ]
}

/// Arguments to grab a single frame at `timestamp` as an image file.
pub fn extract_frame_args(input: &Path, timestamp: &str, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "warning".to_string(),
        "-ss".to_string(),
        timestamp.to_string(),
        "-i".to_string(),
        input.to_string_lossy().to_string(),
        "-vframes".to_string(),
        "1".to_string(),
        output.to_string_lossy().to_string(),
    ]
}

pub fn encode_variant(input: &Path, output: &Path, codec: &str, bitrate_kbps: u32) -> Result<()> {
    run_ffmpeg(
        &encode_args(input, output, codec, bitrate_kbps),
        &format!("encode {codec} @ {bitrate_kbps}k"),
    )
}

pub fn decode_to_yuv(input: &Path, output: &Path) -> Result<()> {
    run_ffmpeg(
        &decode_args(input, output, num_cpus::get()),
        &format!("decode {}", input.display()),
    )
}

pub fn extract_frame(input: &Path, timestamp: &str, output: &Path) -> Result<()> {
    run_ffmpeg(
        &extract_frame_args(input, timestamp, output),
        &format!("extract frame at {timestamp}"),
    )
}

// --- Tool Inspection ---

/// Names of all encoders the local ffmpeg build offers.
pub fn list_encoders() -> Result<Vec<String>> {
    let stdout = run_capture("ffmpeg", &["-hide_banner", "-encoders"], "encoder listing")?;
    Ok(parse_encoder_names(&stdout))
}

fn parse_encoder_names(listing: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut in_table = false;
    for line in listing.lines() {
        if !in_table {
            in_table = line.trim().starts_with("------");
            continue;
        }
        let mut tokens = line.split_whitespace();
        let (Some(_flags), Some(name)) = (tokens.next(), tokens.next()) else {
            continue;
        };
        names.push(name.to_string());
    }
    names
}

/// First line of `<tool> -version`, e.g. the ffmpeg build banner.
pub fn tool_version(tool: &str) -> Result<String> {
    let stdout = run_capture(tool, &["-version"], "version check")?;
    stdout
        .lines()
        .next()
        .map(|line| line.trim().to_string())
        .ok_or_else(|| VqsweepError::Parse(format!("{tool} -version produced no output")))
}

// --- Process Execution ---

/// Executes an FFmpeg command.
pub fn run_ffmpeg(args: &[String], description: &str) -> Result<()> {
    info!("Running FFmpeg for {}: ffmpeg {}", description, args.join(" "));

    let mut command = Command::new("ffmpeg");
    command.args(args);
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let start_time = std::time::Instant::now();
    let output = command.output().map_err(VqsweepError::Io)?;
    let duration = start_time.elapsed();

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!(
            "FFmpeg command failed for {} ({}ms): {}",
            description,
            duration.as_millis(),
            stderr
        );
        Err(VqsweepError::Command(format!(
            "FFmpeg {description} failed: {stderr}"
        )))
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(
            "FFmpeg stderr for {} ({}ms): {}",
            description,
            duration.as_millis(),
            stderr
        );
        info!(
            "FFmpeg command successful for {} ({}ms)",
            description,
            duration.as_millis()
        );
        Ok(())
    }
}

/// Runs a command and returns its stdout, failing on a non-zero exit.
fn run_capture(program: &str, args: &[&str], description: &str) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| {
            VqsweepError::Dependency(format!("Failed to launch {program} for {description}: {e}"))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!("{program} failed for {description}: {stderr}");
        return Err(VqsweepError::Command(format!(
            "{program} {description} failed: {stderr}"
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
