use std::fs;
use std::path::PathBuf;

use anyhow::Context;

use crate::error::{AppError, AppResult};

/// File-backed marker of the last fully processed message id.
///
/// Written only after a row has landed in the sheet, so a crash in
/// between produces at most one duplicate row on the next run, never a
/// lost message.
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `Ok(None)` when no checkpoint has ever been written. Any other
    /// read failure is fatal for startup.
    pub fn load(&self) -> AppResult<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => {
                let id = content.trim().to_string();
                if id.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(id))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Checkpoint(
                anyhow::Error::new(e)
                    .context(format!("failed to read checkpoint {}", self.path.display())),
            )),
        }
    }

    /// Write-then-rename so a crash mid-save leaves the old value
    /// intact rather than a torn file.
    pub fn save(&self, message_id: &str) -> AppResult<()> {
        let tmp = self.path.with_extension("tmp");
        let write = || -> anyhow::Result<()> {
            fs::write(&tmp, message_id)
                .with_context(|| format!("failed to write {}", tmp.display()))?;
            fs::rename(&tmp, &self.path)
                .with_context(|| format!("failed to replace {}", self.path.display()))?;
            Ok(())
        };

        write().map_err(AppError::Checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_absent_checkpoint_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("last_processed.txt"));

        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("last_processed.txt"));

        store.save("msg_1").unwrap();
        assert_eq!(store.load().unwrap(), Some("msg_1".to_string()));
    }

    #[test]
    fn test_save_overwrites_previous_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("last_processed.txt"));

        store.save("msg_1").unwrap();
        store.save("msg_2").unwrap();
        assert_eq!(store.load().unwrap(), Some("msg_2".to_string()));
    }

    #[test]
    fn test_surrounding_whitespace_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_processed.txt");
        fs::write(&path, "msg_3\n").unwrap();

        let store = CheckpointStore::new(path);
        assert_eq!(store.load().unwrap(), Some("msg_3".to_string()));
    }

    #[test]
    fn test_unreadable_checkpoint_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory at the checkpoint path is not NotFound, so it must
        // surface as a startup error instead of being treated as empty.
        let store = CheckpointStore::new(dir.path());

        assert!(matches!(
            store.load().unwrap_err(),
            AppError::Checkpoint(_)
        ));
    }
}
