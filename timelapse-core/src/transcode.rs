//! GIF to video transcoding through an external encoder process.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;

use crate::assemble::AnimatedArtifact;
use crate::{Error, Result};

/// The pipeline's final product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoArtifact {
    pub path: PathBuf,
}

/// Converts an animation into a playable video.
///
/// A call resolves exactly once, with either the finished video or a
/// [`Error::Transcode`] describing why the encoder failed.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(&self, input: &AnimatedArtifact, output: &Path) -> Result<VideoArtifact>;
}

/// Number of trailing stderr lines kept in error messages
const STDERR_TAIL_LINES: usize = 20;

/// Transcoder backed by the `ffmpeg` binary.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    program: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }

    fn args(input: &Path, output: &Path) -> Vec<std::ffi::OsString> {
        let mut args: Vec<std::ffi::OsString> = ["-y", "-hide_banner", "-loglevel", "error", "-i"]
            .into_iter()
            .map(Into::into)
            .collect();
        args.push(input.as_os_str().to_owned());
        args.extend(
            [
                // x264 requires even dimensions
                "-vf", "scale=trunc(iw/2)*2:trunc(ih/2)*2",
                "-pix_fmt", "yuv420p",
                "-movflags", "+faststart",
            ]
            .into_iter()
            .map(Into::into),
        );
        args.push(output.as_os_str().to_owned());
        args
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, input: &AnimatedArtifact, output: &Path) -> Result<VideoArtifact> {
        let args = Self::args(&input.path, output);
        debug!(program = %self.program.display(), ?args, "spawning encoder");

        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group: a terminal Ctrl+C must reach the pipeline's
        // interrupt flag, not kill the encoder mid-file.
        #[cfg(unix)]
        command.process_group(0);

        let result = command
            .output()
            .await
            .map_err(|err| Error::Transcode {
                message: format!("failed to spawn {}: {err}", self.program.display()),
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let lines: Vec<&str> = stderr.lines().collect();
            let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
            return Err(Error::Transcode {
                message: format!("{} exited with {}: {}", self.program.display(), result.status, tail.trim()),
            });
        }

        info!(path = %output.display(), frames = input.frame_count, "video created");
        Ok(VideoArtifact { path: output.to_path_buf() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(path: &str) -> AnimatedArtifact {
        AnimatedArtifact {
            path: PathBuf::from(path),
            frame_count: 2,
            frame_delay_ms: 800,
            loop_forever: true,
            canvas_size: 512,
        }
    }

    #[test]
    fn test_args_order() {
        let args = FfmpegTranscoder::args(Path::new("in.gif"), Path::new("out.mp4"));
        let args: Vec<_> = args.iter().map(|a| a.to_str().unwrap()).collect();
        assert_eq!(args[0], "-y");
        let input_idx = args.iter().position(|a| *a == "-i").unwrap();
        assert_eq!(args[input_idx + 1], "in.gif");
        assert_eq!(*args.last().unwrap(), "out.mp4");
    }

    #[tokio::test]
    async fn test_missing_program() {
        let transcoder = FfmpegTranscoder::new("/nonexistent/ffmpeg-binary");
        let err = transcoder
            .transcode(&artifact("in.gif"), Path::new("out.mp4"))
            .await
            .unwrap_err();
        match err {
            Error::Transcode { message } => assert!(message.contains("failed to spawn")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    fn ffmpeg_available() -> bool {
        std::process::Command::new("ffmpeg")
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success())
    }

    #[tokio::test]
    async fn test_transcode_assembled_gif() {
        if !ffmpeg_available() {
            eprintln!("ffmpeg not on PATH, skipping");
            return;
        }

        let dir = tempfile::tempdir().unwrap();
        let frames = [(2023, [200, 30, 30, 255]), (2024, [30, 200, 30, 255])].map(|(year, color)| {
            let path = dir.path().join(format!("modis_{year}.png"));
            image::RgbaImage::from_pixel(48, 40, image::Rgba(color)).save(&path).unwrap();
            (year, path)
        });

        let config = crate::AnimationConfig { canvas_size: 64, ..Default::default() };
        let gif = crate::assemble(&crate::FrameSet::new(frames), &config, &dir.path().join("in.gif")).unwrap();
        assert_eq!(gif.frame_count, 2);

        let output = dir.path().join("out.mp4");
        let video = FfmpegTranscoder::default().transcode(&gif, &output).await.unwrap();

        assert_eq!(video.path, output);
        assert!(std::fs::metadata(&output).unwrap().len() > 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_surfaces_stderr() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-ffmpeg");
        std::fs::write(&script, "#!/bin/sh\necho 'Invalid data found when processing input' >&2\nexit 1\n")
            .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let transcoder = FfmpegTranscoder::new(&script);
        let err = transcoder
            .transcode(&artifact("in.gif"), &dir.path().join("out.mp4"))
            .await
            .unwrap_err();
        match err {
            Error::Transcode { message } => {
                assert!(message.contains("Invalid data found when processing input"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
