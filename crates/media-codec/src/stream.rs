//! Pull-based decode from a stream URL
//!
//! Opens a named source (file path, RTSP/HTTP URL, anything the linked
//! FFmpeg can demux), decodes the best video stream, and yields RGB24
//! frames one at a time. Codec and scaler contexts are owned by the
//! source and released on drop.

use ffmpeg_next as ffmpeg;
use tracing::debug;

use forgery_detect_common::{DetectError, FrameKind, MediaFrame, Result};

use crate::{copy_rgb_frame_data, init_ffmpeg, pts_to_ms};

/// Open decode session over one video stream
pub struct StreamSource {
    ictx: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    stream_index: usize,
    time_base: ffmpeg::Rational,
    target_width: u32,
    target_height: u32,
    eof_sent: bool,
}

// SAFETY: the scaler's `SwsContext` carries no thread affinity; the source
// is moved wholly into one worker thread and never shared.
unsafe impl Send for StreamSource {}

impl std::fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSource")
            .field("stream_index", &self.stream_index)
            .field("target_width", &self.target_width)
            .field("target_height", &self.target_height)
            .field("eof_sent", &self.eof_sent)
            .finish_non_exhaustive()
    }
}

impl StreamSource {
    /// Open a stream URL and prepare decode to RGB24 at the given
    /// dimensions
    ///
    /// # Errors
    ///
    /// Returns `Decode` when the URL cannot be opened, has no video
    /// stream, or the decoder/scaler cannot be created.
    pub fn open(url: &str, target_width: u32, target_height: u32) -> Result<Self> {
        init_ffmpeg()?;
        if target_width == 0 || target_height == 0 {
            return Err(DetectError::InvalidInput(
                "target dimensions must be positive".to_string(),
            ));
        }

        let ictx = ffmpeg::format::input(&url)
            .map_err(|e| DetectError::Decode(format!("failed to open stream {url}: {e}")))?;

        let stream = ictx
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| DetectError::Decode(format!("no video stream in {url}")))?;
        let stream_index = stream.index();
        let time_base = stream.time_base();

        let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| DetectError::Decode(format!("failed to create codec context: {e}")))?
            .decoder()
            .video()
            .map_err(|e| DetectError::Decode(format!("failed to create decoder: {e}")))?;

        let scaler = ffmpeg::software::scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::format::Pixel::RGB24,
            target_width,
            target_height,
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| DetectError::Decode(format!("failed to create scaler: {e}")))?;

        debug!(url, stream_index, "stream source opened");

        Ok(Self {
            ictx,
            decoder,
            scaler,
            stream_index,
            time_base,
            target_width,
            target_height,
            eof_sent: false,
        })
    }

    /// Pull the next decoded frame; `None` once the stream is drained
    pub fn read_frame(&mut self) -> Option<MediaFrame> {
        let mut decoded = ffmpeg::util::frame::video::Video::empty();

        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.convert(&decoded);
            }
            if self.eof_sent {
                return None;
            }

            // Packet iteration resumes where the previous call stopped
            let mut sent_any = false;
            for (stream, packet) in self.ictx.packets() {
                if stream.index() != self.stream_index {
                    continue;
                }
                self.decoder.send_packet(&packet).ok();
                sent_any = true;
                break;
            }
            if !sent_any {
                self.decoder.send_eof().ok();
                self.eof_sent = true;
            }
        }
    }

    fn convert(&mut self, decoded: &ffmpeg::util::frame::video::Video) -> Option<MediaFrame> {
        let mut converted = ffmpeg::util::frame::video::Video::empty();
        if self.scaler.run(decoded, &mut converted).is_err() {
            return None;
        }
        Some(MediaFrame {
            kind: FrameKind::Video {
                width: self.target_width,
                height: self.target_height,
            },
            data: copy_rgb_frame_data(&converted),
            timestamp_ms: pts_to_ms(decoded.timestamp(), self.time_base),
            is_keyframe: decoded.is_key(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_source_fails() {
        let err = StreamSource::open("/nonexistent/stream.mp4", 224, 224).unwrap_err();
        assert!(matches!(err, DetectError::Decode(_)));
    }

    #[test]
    fn test_open_rejects_zero_dimensions() {
        let err = StreamSource::open("/nonexistent/stream.mp4", 0, 224).unwrap_err();
        assert!(matches!(err, DetectError::InvalidInput(_)));
    }
}
