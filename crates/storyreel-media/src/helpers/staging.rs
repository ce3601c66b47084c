// crates/storyreel-media/src/helpers/staging.rs
//
// Write-then-rename for pipeline outputs.
//
// The muxer writes into a temp file in the destination directory (same
// filesystem, so the final rename is atomic) carrying the same extension so
// FFmpeg picks the same container. Dropping a `StagedOutput` without calling
// `commit` deletes the temp file: errors, cancellation and panics all leave
// the destination path untouched.

use std::path::{Path, PathBuf};

use tempfile::TempPath;

pub struct StagedOutput {
    tmp:    TempPath,
    target: PathBuf,
}

impl StagedOutput {
    pub fn new(target: &Path) -> Result<Self, String> {
        let dir = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)
            .map_err(|e| format!("create output dir '{}': {e}", dir.display()))?;

        let stem = target.file_stem().unwrap_or_default().to_string_lossy().into_owned();
        let suffix = target.extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let tmp = tempfile::Builder::new()
            .prefix(&format!(".{stem}."))
            .suffix(&suffix)
            .tempfile_in(&dir)
            .map_err(|e| format!("create staging file in '{}': {e}", dir.display()))?
            .into_temp_path();

        Ok(Self { tmp, target: target.to_path_buf() })
    }

    /// Where the muxer should write.
    pub fn path(&self) -> &Path { &self.tmp }

    /// Atomically move the finished file onto the target path.
    pub fn commit(self) -> Result<PathBuf, String> {
        let target = self.target;
        self.tmp.persist(&target)
            .map_err(|e| format!("move output into place at '{}': {}", target.display(), e.error))?;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_stage_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.mp4");
        let staged = StagedOutput::new(&target).unwrap();
        let tmp = staged.path().to_path_buf();
        assert!(tmp.exists());
        assert_eq!(tmp.extension().unwrap(), "mp4");
        drop(staged);
        assert!(!tmp.exists());
        assert!(!target.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn commit_moves_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("out.mp4");
        let staged = StagedOutput::new(&target).unwrap();
        std::fs::write(staged.path(), b"data").unwrap();
        let out = staged.commit().unwrap();
        assert_eq!(out, target);
        assert_eq!(std::fs::read(&target).unwrap(), b"data");
        assert_eq!(std::fs::read_dir(target.parent().unwrap()).unwrap().count(), 1);
    }
}
