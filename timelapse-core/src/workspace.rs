//! Run-scoped working storage.
//!
//! Frames and outputs of concurrent runs never share a path: every run owns
//! `frames/<run_id>/` and `output/<run_id>/` under the configured work dir.

use std::fmt;
use std::path::{Path, PathBuf};

/// Identifier of one pipeline run, 16 lowercase hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunId(u64);

impl RunId {
    pub fn random() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Directories owned by a single run.
#[derive(Debug, Clone)]
pub struct RunWorkspace {
    run_id: RunId,
    frames_dir: PathBuf,
    output_dir: PathBuf,
}

impl RunWorkspace {
    pub fn new(work_dir: &Path, run_id: RunId) -> Self {
        let id = run_id.to_string();
        Self {
            run_id,
            frames_dir: work_dir.join("frames").join(&id),
            output_dir: work_dir.join("output").join(&id),
        }
    }

    /// Create the run directories.
    pub async fn create(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.frames_dir).await?;
        tokio::fs::create_dir_all(&self.output_dir).await
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn frames_dir(&self) -> &Path {
        &self.frames_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn frame_path(&self, year: i32) -> PathBuf {
        self.frames_dir.join(format!("modis_{year}.png"))
    }

    /// Where a non-image response for `year` is preserved.
    pub fn diagnostic_path(&self, year: i32, extension: &str) -> PathBuf {
        self.frames_dir.join("diagnostics").join(format!("{year}.{extension}"))
    }

    pub fn animation_path(&self) -> PathBuf {
        self.output_dir.join("forest_loss.gif")
    }

    pub fn video_path(&self, file_name: &str) -> PathBuf {
        self.output_dir.join(file_name)
    }

    /// Remove both run directories. Missing directories are not an error.
    pub async fn cleanup(&self) -> std::io::Result<()> {
        for dir in [&self.frames_dir, &self.output_dir] {
            match tokio::fs::remove_dir_all(dir).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_format() {
        let id = RunId(0xab);
        assert_eq!(id.to_string(), "00000000000000ab");
    }

    #[test]
    fn test_paths_are_run_scoped() {
        let root = Path::new("/work");
        let a = RunWorkspace::new(root, RunId(1));
        let b = RunWorkspace::new(root, RunId(2));

        assert_ne!(a.frame_path(2024), b.frame_path(2024));
        assert_ne!(a.animation_path(), b.animation_path());
        assert_ne!(a.video_path("out.mp4"), b.video_path("out.mp4"));
        assert_eq!(
            a.frame_path(2024),
            PathBuf::from("/work/frames/0000000000000001/modis_2024.png")
        );
    }

    #[test]
    fn test_diagnostics_keyed_by_year() {
        let ws = RunWorkspace::new(Path::new("/work"), RunId(7));
        assert_ne!(ws.diagnostic_path(2023, "xml"), ws.diagnostic_path(2024, "xml"));
    }

    #[tokio::test]
    async fn test_create_and_cleanup() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = RunWorkspace::new(tmp.path(), RunId::random());
        ws.create().await.unwrap();
        assert!(ws.frames_dir().is_dir());
        assert!(ws.output_dir().is_dir());

        ws.cleanup().await.unwrap();
        assert!(!ws.frames_dir().exists());
        assert!(!ws.output_dir().exists());

        // second cleanup is a no-op
        ws.cleanup().await.unwrap();
    }
}
