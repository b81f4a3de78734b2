use std::ffi::OsStr;
use std::io::{ErrorKind, Read, Write};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::{Frame, FrameSource, VisionError};

/// Bytes of ffmpeg diagnostics kept for error messages.
const STDERR_TAIL_BYTES: usize = 4096;

/// Decodes a video by piping it through `ffmpeg` as raw RGB24 frames scaled to
/// a fixed size. The counting line and association distance are expressed in
/// that frame space.
#[derive(Debug)]
pub struct FfmpegFrameSource {
    child: Child,
    stdout: ChildStdout,
    width: u32,
    height: u32,
    frames_read: u64,
    finished: bool,
    // Drains stderr so ffmpeg never blocks on a full pipe; yields the tail.
    stderr: Option<JoinHandle<String>>,
    // Keeps the input file alive until ffmpeg exits.
    _input: NamedTempFile,
}

impl FfmpegFrameSource {
    pub fn spawn(video: &[u8], width: u32, height: u32) -> Result<Self, VisionError> {
        Self::spawn_program("ffmpeg", video, width, height)
    }

    fn spawn_program(
        program: impl AsRef<OsStr>,
        video: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Self, VisionError> {
        let mut input = NamedTempFile::new().map_err(VisionError::Spawn)?;
        input.write_all(video).map_err(VisionError::Spawn)?;
        input.flush().map_err(VisionError::Spawn)?;

        let scale_arg = format!("scale={width}:{height}");
        let mut cmd = Command::new(program);
        cmd.arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(input.path())
            .arg("-an")
            .arg("-vf")
            .arg(&scale_arg)
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-f")
            .arg("rawvideo")
            .arg("-");
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(VisionError::Spawn)?;
        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                return Err(VisionError::Open("failed to capture ffmpeg stdout".into()));
            }
        };

        let stderr = match child.stderr.take().map(drain_stderr).transpose() {
            Ok(handle) => handle,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(VisionError::Spawn(e));
            }
        };

        debug!(bytes = video.len(), width, height, "Spawned ffmpeg decoder");

        Ok(Self {
            child,
            stdout,
            width,
            height,
            frames_read: 0,
            finished: false,
            stderr,
            _input: input,
        })
    }

    fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    /// Reap ffmpeg after stdout closed. A failing exit before any frame means
    /// the input could not be decoded at all.
    fn finish(&mut self) -> Result<(), VisionError> {
        self.finished = true;
        let status = self.child.wait().map_err(VisionError::Read)?;
        let stderr = self.join_stderr();

        if !status.success() {
            let message = stderr.trim().to_string();
            if self.frames_read == 0 {
                return Err(VisionError::Open(if message.is_empty() {
                    format!("ffmpeg exited with {status}")
                } else {
                    message
                }));
            }
            warn!(frames = self.frames_read, %status, stderr = %message, "ffmpeg exited early");
        }
        Ok(())
    }

    fn join_stderr(&mut self) -> String {
        self.stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default()
    }
}

/// Read stderr to EOF on its own thread, keeping only the last
/// `STDERR_TAIL_BYTES`.
fn drain_stderr(mut pipe: ChildStderr) -> std::io::Result<JoinHandle<String>> {
    std::thread::Builder::new()
        .name("ffmpeg-stderr".into())
        .spawn(move || {
            let mut tail: Vec<u8> = Vec::with_capacity(STDERR_TAIL_BYTES);
            let mut buf = [0u8; 8192];
            loop {
                match pipe.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        tail.extend_from_slice(&buf[..n]);
                        if tail.len() > STDERR_TAIL_BYTES {
                            tail.drain(..tail.len() - STDERR_TAIL_BYTES);
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
            String::from_utf8_lossy(&tail).into_owned()
        })
}

impl FrameSource for FfmpegFrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, VisionError> {
        if self.finished {
            return Ok(None);
        }

        let mut pixels = vec![0u8; self.frame_bytes()];
        let mut filled = 0;
        while filled < pixels.len() {
            match self.stdout.read(&mut pixels[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(VisionError::Read(e)),
            }
        }

        if filled < pixels.len() {
            if filled > 0 {
                warn!(bytes = filled, "Discarding truncated trailing frame");
            }
            self.finish()?;
            return Ok(None);
        }

        self.frames_read += 1;
        Ok(Some(Frame {
            index: self.frames_read,
            width: self.width,
            height: self.height,
            pixels,
        }))
    }
}

impl Drop for FfmpegFrameSource {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
            self.join_stderr();
        }
    }
}
