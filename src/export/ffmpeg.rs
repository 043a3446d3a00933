//! FFmpeg-backed media engine
//!
//! Probing goes through ffprobe's JSON output. Rendering builds one
//! filter_complex that normalizes every segment onto a common canvas and
//! concatenates them. Filtering pipes raw RGBA frames from a decoder process,
//! through [`ColorFilter`], into an encoder process.

use crate::export::composition::Composition;
use crate::export::engine::{FrameProgress, MediaEngine};
use crate::export::filter::ColorFilter;
use crate::export::types::{ExportError, ExportFormat, ExportOptions, MediaInfo, RgbaFrame};
use crate::utils::process::StderrTail;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

const AUDIO_SAMPLE_RATE: u32 = 48_000;

/// H.264 for both containers
const VIDEO_CODEC: &str = "libx264";

/// Media engine driving the `ffmpeg` and `ffprobe` binaries
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for FfmpegEngine {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl FfmpegEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use binaries outside of `PATH`
    pub fn with_binaries(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    fn run(&self, args: &[String]) -> Result<(), ExportError> {
        tracing::debug!("Running FFmpeg: {:?}", args);
        let output = Command::new(&self.ffmpeg)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ExportError::Ffmpeg(format!("Failed to start FFmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExportError::Ffmpeg(format!("FFmpeg exited with error: {}", stderr)));
        }
        Ok(())
    }
}

impl MediaEngine for FfmpegEngine {
    fn probe(&self, path: &Path) -> Result<MediaInfo, ExportError> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-print_format", "json", "-show_streams", "-show_format"])
            .arg(path)
            .output()
            .map_err(|e| ExportError::Ffmpeg(format!("Failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExportError::Probe(format!("ffprobe failed for {:?}: {}", path, stderr)));
        }

        parse_probe(&String::from_utf8_lossy(&output.stdout))
    }

    fn render(
        &self,
        composition: &Composition,
        options: &ExportOptions,
        output: &Path,
    ) -> Result<(), ExportError> {
        let args = build_render_args(composition, options, output)?;
        tracing::info!(
            "Rendering {} segments ({:.3}s) to {:?}",
            composition.entries().len(),
            composition.duration_secs(),
            output
        );
        self.run(&args)
    }

    fn apply_filter(
        &self,
        input: &Path,
        output: &Path,
        filter: &ColorFilter,
        options: &ExportOptions,
        progress: FrameProgress<'_>,
    ) -> Result<(), ExportError> {
        filter.validate()?;
        let info = self.probe(input)?;
        let mut decoder = VideoDecoder::open(&self.ffmpeg, input, &info)?;
        let (width, height) = decoder.dimensions();
        let total_frames = (info.duration_secs * info.fps).round() as u64;

        let mut encoder = VideoEncoder::new(
            &self.ffmpeg,
            options,
            width,
            height,
            info.fps,
            info.has_audio.then_some(input),
            output,
        )?;

        while let Some(mut frame) = decoder.read_frame()? {
            filter.apply(&mut frame);
            encoder.write_frame(&frame)?;
            if encoder.frame_count() % 30 == 0 {
                progress(encoder.frame_count(), total_frames);
            }
        }

        if encoder.frame_count() == 0 {
            return Err(ExportError::Decoding(format!("No frames decoded from {:?}", input)));
        }
        progress(encoder.frame_count(), total_frames);
        encoder.finish()
    }

    fn thumbnail(&self, path: &Path, max_width: u32) -> Result<RgbaFrame, ExportError> {
        let info = self.probe(path)?;
        let (width, height) = thumbnail_size(&info, max_width);

        let output = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-i"])
            .arg(path)
            .args([
                "-frames:v".to_string(),
                "1".to_string(),
                "-vf".to_string(),
                format!("scale={}:{}", width, height),
                "-f".to_string(),
                "rawvideo".to_string(),
                "-pix_fmt".to_string(),
                "rgba".to_string(),
                "-".to_string(),
            ])
            .output()
            .map_err(|e| ExportError::Ffmpeg(format!("Failed to start FFmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExportError::Decoding(format!("Thumbnail decode failed: {}", stderr)));
        }

        let expected = (width * height * 4) as usize;
        if output.stdout.len() < expected {
            return Err(ExportError::Decoding(format!(
                "Thumbnail frame truncated: {} of {} bytes",
                output.stdout.len(),
                expected
            )));
        }

        let mut data = output.stdout;
        data.truncate(expected);
        Ok(RgbaFrame { width, height, data })
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
    #[serde(default)]
    side_data_list: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Parse `ffprobe -print_format json -show_streams -show_format` output
fn parse_probe(json: &str) -> Result<MediaInfo, ExportError> {
    let probe: ProbeOutput = serde_json::from_str(json)
        .map_err(|e| ExportError::Probe(format!("Unexpected ffprobe output: {}", e)))?;

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| ExportError::Probe("No video stream".to_string()))?;
    let has_audio = probe
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    let (width, height) = match (video.width, video.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(ExportError::Probe("Video stream has no dimensions".to_string())),
    };

    let duration_secs = video
        .duration
        .as_deref()
        .or_else(|| probe.format.as_ref().and_then(|f| f.duration.as_deref()))
        .and_then(|d| d.parse::<f64>().ok())
        .ok_or_else(|| ExportError::Probe("Unknown duration".to_string()))?;

    Ok(MediaInfo {
        width,
        height,
        fps: video.r_frame_rate.as_deref().map(parse_frame_rate).unwrap_or(30.0),
        duration_secs,
        has_audio,
        rotation: stream_rotation(video),
    })
}

/// Parse frame rate (format: "30/1" or "30000/1001")
fn parse_frame_rate(rate: &str) -> f64 {
    let fps = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().unwrap_or(30.0);
            let den: f64 = den.parse().unwrap_or(1.0);
            if den > 0.0 {
                num / den
            } else {
                30.0
            }
        }
        None => rate.parse().unwrap_or(30.0),
    };
    if fps.is_finite() && fps > 0.0 {
        fps
    } else {
        30.0
    }
}

/// Clockwise display rotation from the rotate tag or the display matrix
fn stream_rotation(stream: &ProbeStream) -> u32 {
    let degrees = stream
        .tags
        .get("rotate")
        .and_then(|r| r.parse::<i64>().ok())
        .or_else(|| {
            // The display matrix stores the counter-clockwise angle
            stream
                .side_data_list
                .iter()
                .find_map(|d| d.get("rotation").and_then(|r| r.as_f64()))
                .map(|r| -(r.round() as i64))
        })
        .unwrap_or(0);
    degrees.rem_euclid(360) as u32
}

fn thumbnail_size(info: &MediaInfo, max_width: u32) -> (u32, u32) {
    let (w, h) = info.display_dimensions();
    let width = max_width.min(w).max(2) & !1;
    let height = ((width as f64 * h as f64 / w as f64).round() as u32).max(2) & !1;
    (width, height)
}

fn codec_args(options: &ExportOptions) -> Vec<String> {
    let mut args = vec![
        "-c:v".to_string(),
        VIDEO_CODEC.to_string(),
        "-preset".to_string(),
        options.quality.h264_preset().to_string(),
        "-crf".to_string(),
        options.quality.crf().to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
    ];
    if options.format == ExportFormat::Mp4 {
        args.extend(["-movflags".to_string(), "+faststart".to_string()]);
    }
    args
}

fn audio_codec_args() -> Vec<String> {
    vec![
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
    ]
}

/// Build filter_complex that fits every entry onto the canvas and concatenates them.
///
/// Returns the filter and the number of silence inputs it expects after the
/// segment inputs.
fn build_concat_filter(composition: &Composition, canvas: (u32, u32), fps: f64) -> (String, usize) {
    let (width, height) = canvas;
    let with_audio = composition.has_audio();
    let segment_inputs = composition.entries().len();
    let mut filters = Vec::new();
    let mut concat_inputs = String::new();
    let mut silence_inputs = 0;

    for (i, entry) in composition.entries().iter().enumerate() {
        let duration = entry.source_range.duration_secs;
        filters.push(format!(
            "[{i}:v]scale={width}:{height}:force_original_aspect_ratio=decrease,\
             pad={width}:{height}:(ow-iw)/2:(oh-ih)/2:black,setsar=1,fps={fps},\
             trim=duration={duration},setpts=PTS-STARTPTS[v{i}]"
        ));
        concat_inputs.push_str(&format!("[v{i}]"));

        if with_audio {
            let source = if entry.has_audio() {
                format!("{i}:a")
            } else {
                let index = segment_inputs + silence_inputs;
                silence_inputs += 1;
                format!("{index}:a")
            };
            filters.push(format!(
                "[{source}]atrim=duration={duration},asetpts=PTS-STARTPTS,\
                 aresample={AUDIO_SAMPLE_RATE},aformat=channel_layouts=stereo[a{i}]"
            ));
            concat_inputs.push_str(&format!("[a{i}]"));
        }
    }

    let n = composition.entries().len();
    if with_audio {
        filters.push(format!("{concat_inputs}concat=n={n}:v=1:a=1[vout][aout]"));
    } else {
        filters.push(format!("{concat_inputs}concat=n={n}:v=1:a=0[vout]"));
    }

    (filters.join(";"), silence_inputs)
}

/// Build the full ffmpeg argument list for rendering a composition
fn build_render_args(
    composition: &Composition,
    options: &ExportOptions,
    output: &Path,
) -> Result<Vec<String>, ExportError> {
    let (Some(canvas), Some(source_fps)) = (composition.canvas(), composition.frame_rate()) else {
        return Err(ExportError::NothingToExport);
    };
    let fps = options.fps.map(f64::from).unwrap_or(source_fps);

    let mut args = vec!["-y".to_string()];
    for entry in composition.entries() {
        args.extend(["-i".to_string(), entry.source.to_string_lossy().to_string()]);
    }

    let (filter, silence_inputs) = build_concat_filter(composition, canvas, fps);

    // Silent stand-ins for segments without audio
    let silent = composition.entries().iter().filter(|e| !e.has_audio());
    for entry in silent.take(silence_inputs) {
        args.extend([
            "-f".to_string(),
            "lavfi".to_string(),
            "-t".to_string(),
            entry.source_range.duration_secs.to_string(),
            "-i".to_string(),
            format!("anullsrc=channel_layout=stereo:sample_rate={AUDIO_SAMPLE_RATE}"),
        ]);
    }

    args.extend(["-filter_complex".to_string(), filter]);
    args.extend(["-map".to_string(), "[vout]".to_string()]);
    if composition.has_audio() {
        args.extend(["-map".to_string(), "[aout]".to_string()]);
    }

    args.extend(codec_args(options));
    if composition.has_audio() {
        args.extend(audio_codec_args());
    }

    args.push(output.to_string_lossy().to_string());
    Ok(args)
}

/// Video decoder using FFmpeg to read RGBA frames from a video file
pub struct VideoDecoder {
    process: Child,
    stdout: BufReader<ChildStdout>,
    stderr: Option<StderrTail>,
    width: u32,
    height: u32,
    frame_size: usize,
    frames_read: u64,
}

impl VideoDecoder {
    /// Open a probed video file for decoding at its upright dimensions
    pub fn open(ffmpeg: &Path, video_path: &Path, info: &MediaInfo) -> Result<Self, ExportError> {
        let (width, height) = info.display_dimensions();

        tracing::info!(
            "Opening video decoder for {:?}: {}x{} @ {}fps",
            video_path,
            width,
            height,
            info.fps
        );

        // -s pins the output size so frames arrive without padding
        let mut process = Command::new(ffmpeg)
            .arg("-i")
            .arg(video_path)
            .args([
                "-f".to_string(),
                "rawvideo".to_string(),
                "-pix_fmt".to_string(),
                "rgba".to_string(),
                "-s".to_string(),
                format!("{}x{}", width, height),
                "-".to_string(),
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExportError::Ffmpeg(format!("Failed to start FFmpeg decoder: {}", e)))?;

        let frame_size = (width * height * 4) as usize;

        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| ExportError::Ffmpeg("Failed to capture FFmpeg stdout".to_string()))?;
        let stderr = process.stderr.take().map(StderrTail::spawn);

        Ok(Self {
            process,
            stdout: BufReader::with_capacity(frame_size * 2, stdout),
            stderr,
            width,
            height,
            frame_size,
            frames_read: 0,
        })
    }

    /// Get video dimensions
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Read the next frame as RGBA data.
    ///
    /// Returns None once the decoder has exited cleanly after a whole number
    /// of frames. A crash or a truncated trailing frame is an error.
    pub fn read_frame(&mut self) -> Result<Option<Vec<u8>>, ExportError> {
        let mut buffer = vec![0u8; self.frame_size];
        let mut filled = 0;

        while filled < self.frame_size {
            match self.stdout.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ExportError::Decoding(format!("Failed to read frame: {}", e))),
            }
        }

        if filled == self.frame_size {
            self.frames_read += 1;
            return Ok(Some(buffer));
        }

        self.end_of_stream(filled)?;
        Ok(None)
    }

    fn end_of_stream(&mut self, trailing: usize) -> Result<(), ExportError> {
        let status = self
            .process
            .wait()
            .map_err(|e| ExportError::Decoding(format!("Failed to wait for FFmpeg decoder: {}", e)))?;
        let stderr = self.stderr.take().map(StderrTail::finish).unwrap_or_default();

        if !status.success() {
            return Err(ExportError::Decoding(format!(
                "FFmpeg decoder exited with {} after {} frames: {}",
                status, self.frames_read, stderr
            )));
        }
        if trailing > 0 {
            return Err(ExportError::Decoding(format!(
                "Truncated frame after {} frames ({} of {} bytes)",
                self.frames_read, trailing, self.frame_size
            )));
        }

        tracing::debug!("Decoder finished after {} frames", self.frames_read);
        Ok(())
    }
}

impl Drop for VideoDecoder {
    fn drop(&mut self) {
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}

/// Video encoder using FFmpeg, optionally copying audio from another file
pub struct VideoEncoder {
    process: Child,
    stdin: ChildStdin,
    stderr: Option<StderrTail>,
    frame_count: u64,
}

impl VideoEncoder {
    pub fn new(
        ffmpeg: &Path,
        options: &ExportOptions,
        width: u32,
        height: u32,
        source_fps: f64,
        audio_source: Option<&Path>,
        output: &Path,
    ) -> Result<Self, ExportError> {
        let args = build_encoder_args(options, width, height, source_fps, audio_source, output);
        tracing::info!("Starting FFmpeg encoder: {:?}", args);

        let mut process = Command::new(ffmpeg)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExportError::Ffmpeg(format!("Failed to start FFmpeg encoder: {}", e)))?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| ExportError::Ffmpeg("Failed to capture FFmpeg stdin".to_string()))?;
        let stderr = process.stderr.take().map(StderrTail::spawn);

        Ok(Self {
            process,
            stdin,
            stderr,
            frame_count: 0,
        })
    }

    /// Write a frame to the encoder
    pub fn write_frame(&mut self, rgba_data: &[u8]) -> Result<(), ExportError> {
        self.stdin
            .write_all(rgba_data)
            .map_err(|e| ExportError::Encoding(format!("Failed to write frame: {}", e)))?;
        self.frame_count += 1;
        Ok(())
    }

    /// Get number of frames written
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Finish encoding and wait for FFmpeg to complete
    pub fn finish(mut self) -> Result<(), ExportError> {
        // Closing stdin signals EOF
        drop(self.stdin);

        let status = self
            .process
            .wait()
            .map_err(|e| ExportError::Ffmpeg(format!("Failed to wait for FFmpeg: {}", e)))?;
        let stderr = self.stderr.take().map(StderrTail::finish).unwrap_or_default();

        if !status.success() {
            return Err(ExportError::Ffmpeg(format!("FFmpeg exited with error: {}", stderr)));
        }

        tracing::info!("FFmpeg encoder finished: {} frames written", self.frame_count);
        Ok(())
    }
}

fn build_encoder_args(
    options: &ExportOptions,
    width: u32,
    height: u32,
    source_fps: f64,
    audio_source: Option<&Path>,
    output: &Path,
) -> Vec<String> {
    // -r before -i is the input rate of the raw frames
    let mut args = vec![
        "-y".to_string(),
        "-nostats".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "rgba".to_string(),
        "-s".to_string(),
        format!("{}x{}", width, height),
        "-r".to_string(),
        source_fps.to_string(),
        "-i".to_string(),
        "-".to_string(),
    ];

    if let Some(audio) = audio_source {
        args.extend(["-i".to_string(), audio.to_string_lossy().to_string()]);
        args.extend([
            "-map".to_string(),
            "0:v".to_string(),
            "-map".to_string(),
            "1:a?".to_string(),
            "-c:a".to_string(),
            "copy".to_string(),
        ]);
    }

    args.extend(codec_args(options));
    args.push(output.to_string_lossy().to_string());
    args
}
