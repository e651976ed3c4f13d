//! FFmpeg command-line frame source
//!
//! Probes the stream with `ffprobe`, then reads raw `rgb24` frames from an
//! `ffmpeg` child process's stdout.

use super::{FrameSource, FrameSourceOpener};
use crate::models::frame::{Frame, SourceError, SourceResult, StreamInfo};
use image::RgbImage;
use serde::Deserialize;
use std::collections::VecDeque;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;
use tracing::{debug, warn};

/// Bytes of ffmpeg's stderr kept for decode error messages
const STDERR_TAIL_BYTES: usize = 4096;

/// ffprobe JSON output (`-of json -show_entries stream=...`)
#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
    #[serde(default)]
    tags: ProbeTags,
}

#[derive(Debug, Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeTags {
    rotate: Option<String>,
}

impl ProbeStream {
    /// Display rotation in degrees; the display matrix wins over the legacy `rotate` tag
    fn rotation(&self) -> Option<f64> {
        self.side_data_list
            .iter()
            .find_map(|side| side.rotation)
            .or_else(|| self.tags.rotate.as_deref().and_then(|r| r.trim().parse().ok()))
    }
}

/// Parse an ffprobe rational such as `30000/1001`; `0/0` means unknown
fn parse_frame_rate(rate: &str) -> Option<f64> {
    let (num, den) = rate.split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    if num > 0.0 && den > 0.0 {
        Some(num / den)
    } else {
        None
    }
}

fn parse_probe(json: &str) -> Result<StreamInfo, String> {
    let output: ProbeOutput =
        serde_json::from_str(json).map_err(|e| format!("invalid ffprobe output: {}", e))?;
    let stream = output
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| "no video stream".to_string())?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err("video stream has no dimensions".to_string()),
    };

    // ffmpeg autorotates, so quarter turns come out transposed
    let quarter_turns = stream
        .rotation()
        .map(|deg| (deg / 90.0).round() as i64)
        .unwrap_or(0);
    let (width, height) = if quarter_turns.rem_euclid(2) == 1 {
        (height, width)
    } else {
        (width, height)
    };

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate));

    Ok(StreamInfo { width, height, fps })
}

/// Opens videos through external `ffmpeg`/`ffprobe` binaries
#[derive(Debug, Clone)]
pub struct FfmpegCliOpener {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
}

impl FfmpegCliOpener {
    pub fn new(ffmpeg_path: PathBuf, ffprobe_path: PathBuf) -> Self {
        Self {
            ffmpeg_path,
            ffprobe_path,
        }
    }

    fn probe(&self, path: &Path) -> SourceResult<StreamInfo> {
        let unreadable = |reason: String| SourceError::Unreadable {
            path: path.to_path_buf(),
            reason,
        };

        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,avg_frame_rate,r_frame_rate:stream_side_data=rotation:stream_tags=rotate",
                "-of",
                "json",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| unreadable(format!("failed to run {}: {}", self.ffprobe_path.display(), e)))?;

        if !output.status.success() {
            return Err(unreadable(String::from_utf8_lossy(&output.stderr).trim().to_string()));
        }

        parse_probe(&String::from_utf8_lossy(&output.stdout)).map_err(unreadable)
    }
}

impl Default for FfmpegCliOpener {
    fn default() -> Self {
        Self::new(PathBuf::from("ffmpeg"), PathBuf::from("ffprobe"))
    }
}

impl FrameSourceOpener for FfmpegCliOpener {
    fn open(&self, path: &Path) -> SourceResult<Box<dyn FrameSource>> {
        if !path.is_file() {
            return Err(SourceError::Unreadable {
                path: path.to_path_buf(),
                reason: "file does not exist".to_string(),
            });
        }

        let info = self.probe(path)?;
        debug!(
            path = %path.display(),
            width = info.width,
            height = info.height,
            fps = ?info.fps,
            "Probed video stream"
        );

        let mut child = Command::new(&self.ffmpeg_path)
            .args(["-nostdin", "-v", "error", "-i"])
            .arg(path)
            .args(["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SourceError::Unreadable {
                path: path.to_path_buf(),
                reason: format!("failed to run {}: {}", self.ffmpeg_path.display(), e),
            })?;

        let pipes = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => std::thread::Builder::new()
                .name("ffmpeg-stderr".to_string())
                .spawn(move || drain_tail(stderr))
                .map(|reader| (stdout, reader))
                .map_err(|e| format!("failed to start stderr reader: {}", e)),
            _ => Err("ffmpeg pipes unavailable".to_string()),
        };

        let (stdout, stderr_reader) = match pipes {
            Ok(pipes) => pipes,
            Err(reason) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(SourceError::Unreadable {
                    path: path.to_path_buf(),
                    reason,
                });
            }
        };

        Ok(Box::new(FfmpegCliSource {
            child,
            stdout,
            stderr_reader: Some(stderr_reader),
            info,
            next_index: 0,
            finished: false,
        }))
    }
}

/// Read `pipe` to EOF, keeping only the last `STDERR_TAIL_BYTES`
fn drain_tail(mut pipe: ChildStderr) -> String {
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_BYTES);
    let mut buf = [0u8; 4096];
    loop {
        match pipe.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                tail.extend(&buf[..n]);
                let excess = tail.len().saturating_sub(STDERR_TAIL_BYTES);
                tail.drain(..excess);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    String::from_utf8_lossy(tail.make_contiguous()).trim().to_string()
}

/// Raw frames streamed from an `ffmpeg` child process
///
/// stderr is drained on a helper thread so a chatty decoder never stalls
/// stdout. The child is killed and reaped when the source is dropped early.
pub struct FfmpegCliSource {
    child: Child,
    stdout: ChildStdout,
    stderr_reader: Option<JoinHandle<String>>,
    info: StreamInfo,
    next_index: u64,
    finished: bool,
}

impl FfmpegCliSource {
    pub fn info(&self) -> StreamInfo {
        self.info
    }

    fn frame_len(&self) -> usize {
        self.info.width as usize * self.info.height as usize * 3
    }

    /// Fill `buf` until full or EOF, returning the number of bytes read
    fn read_full(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.stdout.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    /// Reap the child at end of stream, surfacing a failed decode
    fn finish(&mut self) -> SourceResult<()> {
        self.finished = true;
        let status = self.child.wait()?;
        if status.success() {
            self.stderr_tail();
            return Ok(());
        }

        let stderr = self.stderr_tail();
        Err(SourceError::Decode {
            frame: self.next_index,
            reason: format!("ffmpeg exited with {}: {}", status, stderr),
        })
    }

    /// Join the stderr reader; returns once the child has closed the pipe
    fn stderr_tail(&mut self) -> String {
        self.stderr_reader
            .take()
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default()
    }
}

impl FrameSource for FfmpegCliSource {
    fn next_frame(&mut self) -> SourceResult<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }

        let mut buf = vec![0u8; self.frame_len()];
        let read = self.read_full(&mut buf)?;

        if read == 0 {
            self.finish()?;
            return Ok(None);
        }
        if read < buf.len() {
            self.finish()?;
            return Err(SourceError::Decode {
                frame: self.next_index,
                reason: format!("truncated frame ({} of {} bytes)", read, buf.len()),
            });
        }

        let image = RgbImage::from_raw(self.info.width, self.info.height, buf).ok_or_else(|| {
            SourceError::Decode {
                frame: self.next_index,
                reason: "frame buffer does not match stream dimensions".to_string(),
            }
        })?;

        let index = self.next_index;
        self.next_index += 1;
        Ok(Some(Frame::new(index, self.info.timestamp_ms(index), image)))
    }
}

impl Drop for FfmpegCliSource {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.child.kill() {
            // Already exited is fine
            if e.kind() != ErrorKind::InvalidInput {
                warn!("Failed to stop ffmpeg: {}", e);
            }
        }
        let _ = self.child.wait();
        self.stderr_tail();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("garbage"), None);
    }

    #[test]
    fn test_parse_probe() {
        let json = r#"{
            "programs": [],
            "streams": [
                {"width": 1280, "height": 720, "r_frame_rate": "30/1", "avg_frame_rate": "0/0"}
            ]
        }"#;
        let info = parse_probe(json).unwrap();
        assert_eq!(info.width, 1280);
        assert_eq!(info.height, 720);
        assert_eq!(info.fps, Some(30.0));
    }

    #[test]
    fn test_parse_probe_portrait_display_matrix() {
        let json = r#"{
            "streams": [{
                "width": 1920,
                "height": 1080,
                "avg_frame_rate": "30/1",
                "side_data_list": [
                    {"side_data_type": "Display Matrix", "displaymatrix": "", "rotation": -90}
                ]
            }]
        }"#;
        let info = parse_probe(json).unwrap();
        assert_eq!((info.width, info.height), (1080, 1920));
    }

    #[test]
    fn test_parse_probe_rotate_tag() {
        let json = r#"{"streams": [{"width": 640, "height": 480, "tags": {"rotate": "90"}}]}"#;
        let info = parse_probe(json).unwrap();
        assert_eq!((info.width, info.height), (480, 640));

        let json = r#"{"streams": [{"width": 640, "height": 480, "tags": {"rotate": "180"}}]}"#;
        let info = parse_probe(json).unwrap();
        assert_eq!((info.width, info.height), (640, 480));
    }

    #[test]
    fn test_parse_probe_without_video() {
        assert!(parse_probe(r#"{"streams": []}"#).is_err());
        assert!(parse_probe(r#"{}"#).is_err());
        assert!(parse_probe(r#"{"streams": [{"width": 0, "height": 0}]}"#).is_err());
    }

    #[test]
    fn test_missing_file_is_unreadable() {
        let opener = FfmpegCliOpener::default();
        let result = opener.open(Path::new("/definitely/not/here.mp4"));
        assert!(matches!(result, Err(SourceError::Unreadable { .. })));
    }

    #[cfg(unix)]
    mod fake_tools {
        use super::*;
        use image::Rgb;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        const FAKE_FFPROBE: &str =
            r#"echo '{"streams": [{"width": 2, "height": 2, "avg_frame_rate": "30/1"}]}'"#;

        /// Writes 4000 decoder complaints to stderr, well past a pipe buffer
        const NOISY_STDERR: &str = r#"i=0
while [ $i -lt 4000 ]; do
  echo "[h264 @ 0x5581] error while decoding MB $i 17, bytestream -7" >&2
  i=$((i + 1))
done"#;

        fn write_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn open_with(ffmpeg_body: &str) -> (TempDir, Box<dyn FrameSource>) {
            let dir = TempDir::new().unwrap();
            let ffprobe = write_tool(dir.path(), "ffprobe", FAKE_FFPROBE);
            let ffmpeg = write_tool(dir.path(), "ffmpeg", ffmpeg_body);
            let video = dir.path().join("set.mp4");
            std::fs::write(&video, b"not really a video").unwrap();

            let source = FfmpegCliOpener::new(ffmpeg, ffprobe).open(&video).unwrap();
            (dir, source)
        }

        #[test]
        fn test_noisy_stderr_does_not_stall_frames() {
            let (_dir, mut source) = open_with(&format!("{}\nprintf 'abcdefghijkl'", NOISY_STDERR));

            let frame = source.next_frame().unwrap().unwrap();
            assert_eq!(frame.index, 0);
            assert_eq!(frame.image.dimensions(), (2, 2));
            assert_eq!(*frame.image.get_pixel(0, 0), Rgb([b'a', b'b', b'c']));
            assert!(source.next_frame().unwrap().is_none());
            assert!(source.next_frame().unwrap().is_none());
        }

        #[test]
        fn test_failed_decode_reports_stderr_tail() {
            let (_dir, mut source) = open_with(&format!("{}\nexit 1", NOISY_STDERR));

            match source.next_frame() {
                Err(SourceError::Decode { frame, reason }) => {
                    assert_eq!(frame, 0);
                    assert!(reason.contains("MB 3999"), "{}", reason);
                    assert!(!reason.contains("MB 0 17"));
                }
                other => panic!("expected decode error, got {:?}", other.map(|f| f.is_some())),
            }
        }

        #[test]
        fn test_drop_mid_stream_stops_decoder() {
            let (_dir, mut source) =
                open_with(&format!("{}\nprintf 'abcdefghijkl'\nexec sleep 30", NOISY_STDERR));
            assert!(source.next_frame().unwrap().is_some());
            drop(source);
        }
    }
}
