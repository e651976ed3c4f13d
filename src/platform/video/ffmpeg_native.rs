//! In-process video decoder over the FFmpeg C libraries
//!
//! This module encapsulates all unsafe FFmpeg operations and exposes them as a
//! [`FrameSource`] yielding RGB24 frames.

use super::{FrameSource, FrameSourceOpener};
use crate::models::frame::{Frame, SourceError, SourceResult, StreamInfo};
use image::RgbImage;
use std::ffi::CString;
use std::os::raw::c_char;
use std::path::{Path, PathBuf};
use std::ptr;

// Import FFmpeg C bindings
use ffmpeg_sys_next::*;

const SWS_BILINEAR_FLAG: i32 = 2;

/// Human-readable message for an FFmpeg error code
fn av_error_string(code: i32) -> String {
    let mut buf = [0 as c_char; 256];
    unsafe {
        if av_strerror(code, buf.as_mut_ptr(), buf.len()) < 0 {
            return format!("error code {}", code);
        }
        std::ffi::CStr::from_ptr(buf.as_ptr())
            .to_string_lossy()
            .into_owned()
    }
}

/// Opens videos with libavformat/libavcodec
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeFrameOpener;

impl FrameSourceOpener for NativeFrameOpener {
    fn open(&self, path: &Path) -> SourceResult<Box<dyn FrameSource>> {
        Ok(Box::new(NativeFrameSource::open(path)?))
    }
}

/// Safe wrapper around an FFmpeg demuxer + decoder pair
pub struct NativeFrameSource {
    format_context: *mut AVFormatContext,
    codec_context: *mut AVCodecContext,
    frame: *mut AVFrame,
    packet: *mut AVPacket,
    sws_context: *mut SwsContext,
    stream_index: i32,
    time_base: AVRational,
    info: StreamInfo,
    next_index: u64,
    draining: bool,
    finished: bool,
}

unsafe impl Send for NativeFrameSource {}

impl NativeFrameSource {
    /// Open a video file and prepare its best video stream for decoding
    pub fn open(path: &Path) -> SourceResult<Self> {
        let unreadable = |reason: String| SourceError::Unreadable {
            path: PathBuf::from(path),
            reason,
        };

        let path_c = CString::new(path.to_string_lossy().as_bytes())
            .map_err(|_| unreadable("path contains a NUL byte".to_string()))?;

        unsafe {
            let mut format_context: *mut AVFormatContext = ptr::null_mut();
            let ret = avformat_open_input(
                &mut format_context,
                path_c.as_ptr(),
                ptr::null(),
                ptr::null_mut(),
            );
            if ret < 0 {
                return Err(unreadable(av_error_string(ret)));
            }

            // From here on Drop releases whatever has been allocated
            let mut source = Self {
                format_context,
                codec_context: ptr::null_mut(),
                frame: ptr::null_mut(),
                packet: ptr::null_mut(),
                sws_context: ptr::null_mut(),
                stream_index: -1,
                time_base: AVRational { num: 0, den: 1 },
                info: StreamInfo {
                    width: 0,
                    height: 0,
                    fps: None,
                },
                next_index: 0,
                draining: false,
                finished: false,
            };

            let ret = avformat_find_stream_info(format_context, ptr::null_mut());
            if ret < 0 {
                return Err(unreadable(av_error_string(ret)));
            }

            let mut decoder: *const AVCodec = ptr::null();
            let stream_index = av_find_best_stream(
                format_context,
                AVMediaType::AVMEDIA_TYPE_VIDEO,
                -1,
                -1,
                &mut decoder,
                0,
            );
            if stream_index < 0 || decoder.is_null() {
                return Err(unreadable("no decodable video stream".to_string()));
            }
            source.stream_index = stream_index;

            let stream = *(*format_context).streams.offset(stream_index as isize);
            source.time_base = (*stream).time_base;

            source.codec_context = avcodec_alloc_context3(decoder);
            if source.codec_context.is_null() {
                return Err(unreadable("failed to allocate codec context".to_string()));
            }

            let ret = avcodec_parameters_to_context(source.codec_context, (*stream).codecpar);
            if ret < 0 {
                return Err(unreadable(av_error_string(ret)));
            }

            let ret = avcodec_open2(source.codec_context, decoder, ptr::null_mut());
            if ret < 0 {
                return Err(unreadable(av_error_string(ret)));
            }

            source.frame = av_frame_alloc();
            source.packet = av_packet_alloc();
            if source.frame.is_null() || source.packet.is_null() {
                return Err(unreadable("failed to allocate frame buffers".to_string()));
            }

            let rate = av_guess_frame_rate(format_context, stream, ptr::null_mut());
            source.info = StreamInfo {
                width: (*source.codec_context).width.max(0) as u32,
                height: (*source.codec_context).height.max(0) as u32,
                fps: if rate.num > 0 && rate.den > 0 {
                    Some(rate.num as f64 / rate.den as f64)
                } else {
                    None
                },
            };

            Ok(source)
        }
    }

    pub fn info(&self) -> StreamInfo {
        self.info
    }

    fn decode_error(&self, reason: String) -> SourceError {
        SourceError::Decode {
            frame: self.next_index,
            reason,
        }
    }

    /// Convert the decoded frame to RGB24
    fn convert_frame(&mut self) -> SourceResult<Frame> {
        unsafe {
            let width = (*self.frame).width;
            let height = (*self.frame).height;
            if width <= 0 || height <= 0 {
                return Err(self.decode_error("decoded frame has no dimensions".to_string()));
            }

            // Re-created only when the source geometry or format changes
            self.sws_context = sws_getCachedContext(
                self.sws_context,
                width,
                height,
                (*self.codec_context).pix_fmt,
                width,
                height,
                AVPixelFormat::AV_PIX_FMT_RGB24,
                SWS_BILINEAR_FLAG,
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null(),
            );
            if self.sws_context.is_null() {
                return Err(self.decode_error("failed to initialize swscale context".to_string()));
            }

            let mut image = RgbImage::new(width as u32, height as u32);
            let dst_data = [
                image.as_mut_ptr(),
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
            ];
            let dst_linesize = [width * 3, 0, 0, 0];

            let ret = sws_scale(
                self.sws_context,
                (*self.frame).data.as_ptr() as *const *const u8,
                (*self.frame).linesize.as_ptr(),
                0,
                height,
                dst_data.as_ptr(),
                dst_linesize.as_ptr(),
            );
            if ret < 0 {
                return Err(self.decode_error("color conversion failed".to_string()));
            }

            let index = self.next_index;
            let pts = (*self.frame).best_effort_timestamp;
            let timestamp_ms = if pts != AV_NOPTS_VALUE && self.time_base.den > 0 {
                Some(pts * 1000 * self.time_base.num as i64 / self.time_base.den as i64)
            } else {
                self.info.timestamp_ms(index)
            };

            self.next_index += 1;
            Ok(Frame::new(index, timestamp_ms, image))
        }
    }
}

impl FrameSource for NativeFrameSource {
    fn next_frame(&mut self) -> SourceResult<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }

        unsafe {
            loop {
                let ret = avcodec_receive_frame(self.codec_context, self.frame);
                if ret == 0 {
                    return self.convert_frame().map(Some);
                }
                if ret == AVERROR_EOF {
                    self.finished = true;
                    return Ok(None);
                }
                if ret != AVERROR(EAGAIN) {
                    return Err(self.decode_error(av_error_string(ret)));
                }
                if self.draining {
                    self.finished = true;
                    return Ok(None);
                }

                // Decoder needs more input
                let ret = av_read_frame(self.format_context, self.packet);
                if ret == AVERROR_EOF {
                    self.draining = true;
                    let ret = avcodec_send_packet(self.codec_context, ptr::null());
                    if ret < 0 && ret != AVERROR_EOF {
                        return Err(self.decode_error(av_error_string(ret)));
                    }
                    continue;
                }
                if ret < 0 {
                    return Err(self.decode_error(av_error_string(ret)));
                }

                let ret = if (*self.packet).stream_index == self.stream_index {
                    avcodec_send_packet(self.codec_context, self.packet)
                } else {
                    0
                };
                av_packet_unref(self.packet);

                if ret < 0 && ret != AVERROR(EAGAIN) {
                    return Err(self.decode_error(av_error_string(ret)));
                }
            }
        }
    }
}

impl Drop for NativeFrameSource {
    fn drop(&mut self) {
        unsafe {
            // Clean up resources in reverse order
            if !self.sws_context.is_null() {
                sws_freeContext(self.sws_context);
            }

            if !self.packet.is_null() {
                av_packet_free(&mut self.packet);
            }

            if !self.frame.is_null() {
                av_frame_free(&mut self.frame);
            }

            if !self.codec_context.is_null() {
                avcodec_free_context(&mut self.codec_context);
            }

            if !self.format_context.is_null() {
                avformat_close_input(&mut self.format_context);
            }
        }
    }
}
