//! Media codec adapter over FFmpeg
//!
//! Decode and pixel/sample conversion run in-process through
//! `ffmpeg-next`; encode paths shell out to the `ffmpeg` CLI with raw
//! input piped through temp files, which keeps encoder configuration to
//! plain argument lists and sidesteps unsafe encoder context wiring.
//! All public compression operations report failure inside
//! [`CompressionResult`] instead of returning errors.

pub mod realtime;
pub mod stream;

use std::path::Path;
use std::process::Command;
use std::sync::Mutex;
use std::time::Instant;

use ffmpeg_next as ffmpeg;
use tracing::{debug, warn};

use forgery_detect_common::{
    AudioCodec, CompressionResult, DetectError, EncodingParams, MediaFrame, Result, VideoCodec,
};

pub use realtime::{FrameHandler, RealTimeProcessor};
pub use stream::StreamSource;

/// Initialize the FFmpeg library once per process
pub(crate) fn init_ffmpeg() -> Result<()> {
    static INIT: std::sync::OnceLock<std::result::Result<(), String>> = std::sync::OnceLock::new();
    INIT.get_or_init(|| ffmpeg::init().map_err(|e| e.to_string()))
        .clone()
        .map_err(DetectError::Initialization)
}

fn video_container_ext(codec: VideoCodec) -> &'static str {
    match codec {
        VideoCodec::H264 | VideoCodec::H265 => "mp4",
        VideoCodec::Vp9 => "webm",
    }
}

fn audio_container_ext(codec: AudioCodec) -> &'static str {
    match codec {
        AudioCodec::Aac => "m4a",
        AudioCodec::Opus => "ogg",
        AudioCodec::Mp3 => "mp3",
    }
}

/// Codec adapter bound to one set of encoding targets
///
/// Stateless per call apart from the owned real-time worker; codec and
/// scaler contexts are created inside each operation and released by
/// drop on every exit path.
pub struct MediaCodecAdapter {
    params: EncodingParams,
    realtime: Mutex<Option<RealTimeProcessor>>,
}

impl MediaCodecAdapter {
    /// Create an adapter for the given encoding targets
    ///
    /// # Errors
    ///
    /// Returns `ConfigValidation` if the params are invalid.
    pub fn new(params: EncodingParams) -> Result<Self> {
        params.validate()?;
        init_ffmpeg()?;
        Ok(Self {
            params,
            realtime: Mutex::new(None),
        })
    }

    /// Encoding targets this adapter was built with
    #[must_use]
    pub fn params(&self) -> &EncodingParams {
        &self.params
    }

    /// Encode one raw RGB24 frame to the configured video codec
    ///
    /// The frame is scaled to the target dimensions during encode.
    /// Failures come back as `success = false` with a diagnostic.
    #[must_use]
    pub fn compress_video(&self, data: &[u8], width: u32, height: u32, fps: u32) -> CompressionResult {
        let start = Instant::now();
        let expected = width as usize * height as usize * 3;
        if data.len() != expected || width == 0 || height == 0 {
            return CompressionResult::failed(
                data.len(),
                format!(
                    "video buffer size mismatch: expected {expected} bytes for {width}x{height} RGB24, got {}",
                    data.len()
                ),
            );
        }

        match self.encode_video_cli(data, width, height, fps.max(1)) {
            Ok(encoded) => finish_compression(data.len(), encoded, start),
            Err(e) => {
                warn!(error = %e, "video compression failed");
                CompressionResult::failed(data.len(), e.to_string())
            }
        }
    }

    /// Encode raw PCM s16le audio to the configured audio codec
    #[must_use]
    pub fn compress_audio(&self, data: &[u8], sample_rate: u32, channels: u8) -> CompressionResult {
        let start = Instant::now();
        let frame_bytes = 2 * usize::from(channels.max(1));
        if channels == 0 || sample_rate == 0 || data.len() % frame_bytes != 0 {
            return CompressionResult::failed(
                data.len(),
                format!(
                    "audio buffer not aligned to {channels} s16le channels ({} bytes)",
                    data.len()
                ),
            );
        }

        match self.encode_audio_cli(data, sample_rate, channels) {
            Ok(encoded) => finish_compression(data.len(), encoded, start),
            Err(e) => {
                warn!(error = %e, "audio compression failed");
                CompressionResult::failed(data.len(), e.to_string())
            }
        }
    }

    /// Decode an encoded video buffer back to raw RGB24 frames
    ///
    /// Frames are scaled to the adapter's target dimensions and
    /// concatenated in decode order. Malformed input yields
    /// `success = false`, never a panic.
    #[must_use]
    pub fn decompress_video(&self, encoded: &[u8]) -> CompressionResult {
        let start = Instant::now();
        match self.decode_video_frames(encoded) {
            Ok(frames) => {
                let mut raw = Vec::new();
                for frame in &frames {
                    raw.extend_from_slice(&frame.data);
                }
                let mut result = finish_compression(encoded.len(), raw, start);
                result.ratio = if result.compressed_size > 0 {
                    encoded.len() as f32 / result.compressed_size as f32
                } else {
                    0.0
                };
                result
            }
            Err(e) => CompressionResult::failed(encoded.len(), e.to_string()),
        }
    }

    /// Decode an encoded audio buffer back to raw PCM s16le at the
    /// adapter's target rate and channel count
    #[must_use]
    pub fn decompress_audio(&self, encoded: &[u8]) -> CompressionResult {
        let start = Instant::now();
        match self.decode_audio_cli(encoded) {
            Ok(raw) => {
                let mut result = finish_compression(encoded.len(), raw, start);
                result.ratio = if result.compressed_size > 0 {
                    encoded.len() as f32 / result.compressed_size as f32
                } else {
                    0.0
                };
                result
            }
            Err(e) => CompressionResult::failed(encoded.len(), e.to_string()),
        }
    }

    /// Decode an encoded video buffer into typed frames
    ///
    /// # Errors
    ///
    /// Returns `Decode` on malformed input or a missing video stream.
    pub fn decode_video_frames(&self, encoded: &[u8]) -> Result<Vec<MediaFrame>> {
        init_ffmpeg()?;
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("input.bin");
        std::fs::write(&input, encoded)?;
        decode_video_file(
            &input,
            self.params.video_width,
            self.params.video_height,
        )
    }

    /// Rescale a raw RGB24 buffer to new dimensions via swscale
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` on a size mismatch or `Decode` if the
    /// scaler rejects the conversion.
    pub fn convert_video_format(
        &self,
        data: &[u8],
        src_width: u32,
        src_height: u32,
        dst_width: u32,
        dst_height: u32,
    ) -> Result<Vec<u8>> {
        init_ffmpeg()?;
        let expected = src_width as usize * src_height as usize * 3;
        if data.len() != expected {
            return Err(DetectError::InvalidInput(format!(
                "expected {expected} bytes for {src_width}x{src_height} RGB24, got {}",
                data.len()
            )));
        }
        if dst_width == 0 || dst_height == 0 {
            return Err(DetectError::InvalidInput(
                "target dimensions must be positive".to_string(),
            ));
        }

        let mut src = ffmpeg::util::frame::video::Video::new(
            ffmpeg::format::Pixel::RGB24,
            src_width,
            src_height,
        );
        copy_into_frame(&mut src, data, src_width, src_height);

        let mut scaler = ffmpeg::software::scaling::Context::get(
            ffmpeg::format::Pixel::RGB24,
            src_width,
            src_height,
            ffmpeg::format::Pixel::RGB24,
            dst_width,
            dst_height,
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| DetectError::Decode(format!("failed to create scaler: {e}")))?;

        let mut dst = ffmpeg::util::frame::video::Video::empty();
        scaler
            .run(&src, &mut dst)
            .map_err(|e| DetectError::Decode(format!("failed to rescale frame: {e}")))?;

        Ok(copy_rgb_frame_data(&dst))
    }

    /// Convert raw PCM s16le between sample rates and channel layouts
    ///
    /// Downmix/upmix happens before a linear resample; all in-process,
    /// no FFmpeg involvement.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for zero channels/rates or misaligned
    /// buffers.
    pub fn convert_audio_format(
        &self,
        data: &[u8],
        src_rate: u32,
        src_channels: u8,
        dst_rate: u32,
        dst_channels: u8,
    ) -> Result<Vec<u8>> {
        if src_channels == 0 || dst_channels == 0 || src_rate == 0 || dst_rate == 0 {
            return Err(DetectError::InvalidInput(
                "sample rates and channel counts must be positive".to_string(),
            ));
        }
        let frame_bytes = 2 * usize::from(src_channels);
        if data.len() % frame_bytes != 0 {
            return Err(DetectError::InvalidInput(format!(
                "audio buffer not aligned to {src_channels} s16le channels"
            )));
        }

        let samples: Vec<i16> = data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();

        // Downmix to mono as i32 sums to avoid clipping mid-average
        let mono: Vec<i16> = samples
            .chunks(usize::from(src_channels))
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| i32::from(s)).sum();
                (sum / frame.len() as i32) as i16
            })
            .collect();

        let resampled = if src_rate == dst_rate {
            mono
        } else {
            resample_s16(&mono, src_rate, dst_rate)
        };

        // Duplicate mono into each target channel
        let mut out = Vec::with_capacity(resampled.len() * 2 * usize::from(dst_channels));
        for sample in resampled {
            for _ in 0..dst_channels {
                out.extend_from_slice(&sample.to_le_bytes());
            }
        }
        Ok(out)
    }

    /// Start the push-fed real-time worker
    ///
    /// # Errors
    ///
    /// Returns `Initialization` if a worker is already running.
    pub fn start_real_time_processing<F>(&self, handler: F) -> Result<()>
    where
        F: FnMut(MediaFrame) + Send + 'static,
    {
        let mut slot = self.realtime.lock().unwrap();
        if slot.is_some() {
            return Err(DetectError::Initialization(
                "real-time processing already active".to_string(),
            ));
        }
        *slot = Some(RealTimeProcessor::start(handler));
        Ok(())
    }

    /// Queue a frame for the real-time worker
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the worker is not running or the queue
    /// is full.
    pub fn push_frame(&self, frame: MediaFrame) -> Result<()> {
        let slot = self.realtime.lock().unwrap();
        match slot.as_ref() {
            Some(processor) => processor.push(frame),
            None => Err(DetectError::InvalidInput(
                "real-time processing not active".to_string(),
            )),
        }
    }

    /// Stop the real-time worker; idempotent
    pub fn stop_real_time_processing(&self) {
        if let Some(processor) = self.realtime.lock().unwrap().take() {
            processor.stop();
        }
    }

    /// Whether the real-time worker is running
    #[must_use]
    pub fn is_real_time_active(&self) -> bool {
        self.realtime.lock().unwrap().is_some()
    }

    /// Release owned resources; codec contexts are per-call and already
    /// dropped, so only the worker needs stopping
    pub fn cleanup(&self) {
        self.stop_real_time_processing();
    }

    fn encode_video_cli(&self, data: &[u8], width: u32, height: u32, fps: u32) -> Result<Vec<u8>> {
        let p = &self.params;
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("input.raw");
        let output = dir
            .path()
            .join(format!("output.{}", video_container_ext(p.video_codec)));
        std::fs::write(&input, data)?;

        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-video_size")
            .arg(format!("{width}x{height}"))
            .arg("-framerate")
            .arg(fps.to_string())
            .arg("-i")
            .arg(&input)
            .arg("-vf")
            .arg(format!("scale={}:{}", p.video_width, p.video_height))
            .arg("-c:v")
            .arg(p.video_codec.encoder_name())
            .arg("-b:v")
            .arg(p.video_bitrate.to_string())
            .arg("-g")
            .arg(p.gop_size.to_string())
            .arg("-bf")
            .arg(p.max_b_frames.to_string())
            .arg("-pix_fmt")
            .arg("yuv420p")
            .arg("-y")
            .arg(&output);

        run_ffmpeg(cmd, &output).map_err(|e| DetectError::Encode(e.to_string()))
    }

    fn encode_audio_cli(&self, data: &[u8], sample_rate: u32, channels: u8) -> Result<Vec<u8>> {
        let p = &self.params;
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("input.raw");
        let output = dir
            .path()
            .join(format!("output.{}", audio_container_ext(p.audio_codec)));
        std::fs::write(&input, data)?;

        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-f")
            .arg("s16le")
            .arg("-ar")
            .arg(sample_rate.to_string())
            .arg("-ac")
            .arg(channels.to_string())
            .arg("-i")
            .arg(&input)
            .arg("-c:a")
            .arg(p.audio_codec.encoder_name())
            .arg("-b:a")
            .arg(p.audio_bitrate.to_string())
            .arg("-ar")
            .arg(p.audio_sample_rate.to_string())
            .arg("-ac")
            .arg(p.audio_channels.to_string())
            .arg("-y")
            .arg(&output);

        run_ffmpeg(cmd, &output).map_err(|e| DetectError::Encode(e.to_string()))
    }

    fn decode_audio_cli(&self, encoded: &[u8]) -> Result<Vec<u8>> {
        let p = &self.params;
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("input.bin");
        let output = dir.path().join("output.raw");
        std::fs::write(&input, encoded)?;

        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-i")
            .arg(&input)
            .arg("-vn")
            .arg("-f")
            .arg("s16le")
            .arg("-acodec")
            .arg("pcm_s16le")
            .arg("-ar")
            .arg(p.audio_sample_rate.to_string())
            .arg("-ac")
            .arg(p.audio_channels.to_string())
            .arg("-y")
            .arg(&output);

        run_ffmpeg(cmd, &output).map_err(|e| DetectError::Decode(e.to_string()))
    }
}

impl Drop for MediaCodecAdapter {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Execute an assembled ffmpeg command and read back the output file
fn run_ffmpeg(mut cmd: Command, output_path: &Path) -> std::io::Result<Vec<u8>> {
    debug!(?cmd, "running ffmpeg");
    let output = cmd.output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(std::io::Error::other(format!("ffmpeg failed: {stderr}")));
    }
    std::fs::read(output_path)
}

fn finish_compression(original_size: usize, data: Vec<u8>, start: Instant) -> CompressionResult {
    let compressed_size = data.len();
    let ratio = if original_size > 0 {
        compressed_size as f32 / original_size as f32
    } else {
        0.0
    };
    CompressionResult {
        success: true,
        data,
        original_size,
        compressed_size,
        ratio,
        time_ms: start.elapsed().as_millis() as i64,
        error: None,
    }
}

/// Decode all video frames from a file, scaled to the given dimensions
pub(crate) fn decode_video_file(
    path: &Path,
    target_width: u32,
    target_height: u32,
) -> Result<Vec<MediaFrame>> {
    let mut ictx = ffmpeg::format::input(&path)
        .map_err(|e| DetectError::Decode(format!("failed to open input: {e}")))?;

    let stream = ictx
        .streams()
        .best(ffmpeg::media::Type::Video)
        .ok_or_else(|| DetectError::Decode("no video stream found".to_string()))?;
    let stream_index = stream.index();
    let time_base = stream.time_base();

    let mut decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
        .map_err(|e| DetectError::Decode(format!("failed to create codec context: {e}")))?
        .decoder()
        .video()
        .map_err(|e| DetectError::Decode(format!("failed to create decoder: {e}")))?;

    let mut scaler = ffmpeg::software::scaling::Context::get(
        decoder.format(),
        decoder.width(),
        decoder.height(),
        ffmpeg::format::Pixel::RGB24,
        target_width,
        target_height,
        ffmpeg::software::scaling::Flags::BILINEAR,
    )
    .map_err(|e| DetectError::Decode(format!("failed to create scaler: {e}")))?;

    let mut frames = Vec::new();
    let mut decoded = ffmpeg::util::frame::video::Video::empty();
    let mut converted = ffmpeg::util::frame::video::Video::empty();

    let collect =
        |decoded: &ffmpeg::util::frame::video::Video,
         converted: &mut ffmpeg::util::frame::video::Video,
         scaler: &mut ffmpeg::software::scaling::Context,
         frames: &mut Vec<MediaFrame>|
         -> Result<()> {
            scaler
                .run(decoded, converted)
                .map_err(|e| DetectError::Decode(format!("failed to convert frame: {e}")))?;
            frames.push(MediaFrame {
                kind: forgery_detect_common::FrameKind::Video {
                    width: target_width,
                    height: target_height,
                },
                data: copy_rgb_frame_data(converted),
                timestamp_ms: pts_to_ms(decoded.timestamp(), time_base),
                is_keyframe: decoded.is_key(),
            });
            Ok(())
        };

    for (stream, packet) in ictx.packets() {
        if stream.index() != stream_index {
            continue;
        }
        if decoder.send_packet(&packet).is_ok() {
            while decoder.receive_frame(&mut decoded).is_ok() {
                collect(&decoded, &mut converted, &mut scaler, &mut frames)?;
            }
        }
    }

    decoder.send_eof().ok();
    while decoder.receive_frame(&mut decoded).is_ok() {
        collect(&decoded, &mut converted, &mut scaler, &mut frames)?;
    }

    if frames.is_empty() {
        return Err(DetectError::Decode("no decodable video frames".to_string()));
    }
    Ok(frames)
}

/// Copy an RGB24 frame into a contiguous buffer, dropping row padding
pub(crate) fn copy_rgb_frame_data(frame: &ffmpeg::util::frame::video::Video) -> Vec<u8> {
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let stride = frame.stride(0);
    let plane = frame.data(0);

    let mut data = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        let row_start = y * stride;
        data.extend_from_slice(&plane[row_start..row_start + width * 3]);
    }
    data
}

/// Copy a contiguous RGB24 buffer into a frame, honoring its stride
fn copy_into_frame(frame: &mut ffmpeg::util::frame::video::Video, data: &[u8], width: u32, height: u32) {
    let width = width as usize;
    let height = height as usize;
    let stride = frame.stride(0);
    let plane = frame.data_mut(0);
    for y in 0..height {
        let src_start = y * width * 3;
        let dst_start = y * stride;
        plane[dst_start..dst_start + width * 3]
            .copy_from_slice(&data[src_start..src_start + width * 3]);
    }
}

pub(crate) fn pts_to_ms(pts: Option<i64>, time_base: ffmpeg::Rational) -> i64 {
    let pts = pts.unwrap_or(0);
    if time_base.1 == 0 {
        return 0;
    }
    pts * 1000 * i64::from(time_base.0) / i64::from(time_base.1)
}

/// Linear s16 resampler shared by the audio conversion path
fn resample_s16(input: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if input.is_empty() {
        return Vec::new();
    }
    let ratio = f64::from(from_rate) / f64::from(to_rate);
    let out_len = (input.len() as f64 / ratio).round() as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let pos = i as f64 * ratio;
        let idx = pos as usize;
        let frac = pos - idx as f64;
        let a = f64::from(input[idx.min(input.len() - 1)]);
        let b = f64::from(input[(idx + 1).min(input.len() - 1)]);
        out.push((a + (b - a) * frac).round() as i16);
    }
    out
}
