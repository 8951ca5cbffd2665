//! Atomic JSON state files — the single persistence pattern shared by
//! working memory, outbox, DLQ, reminders, patterns, and the attention log.
//!
//! Writes go to a temp file in the same directory followed by a rename, so a
//! crash mid-write never leaves a truncated file. Reads tolerate absent or
//! corrupt content and fall back to the type's `Default`.

use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

/// Load a JSON state file, returning `T::default()` when the file is absent
/// or unreadable. A corrupt file is logged, never fatal.
pub fn load_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match std::fs::read_to_string(path) {
        Ok(text) => match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt state file, using defaults");
                T::default()
            }
        },
        Err(_) => T::default(),
    }
}

/// Persist a value as pretty JSON via temp-file + atomic rename.
pub fn save_atomic<T: Serialize>(path: &Path, value: &T) -> crate::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let json = serde_json::to_string_pretty(value)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(json.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| crate::StewardError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Doc {
        count: u32,
        items: Vec<String>,
    }

    #[test]
    fn roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");

        let doc = Doc {
            count: 3,
            items: vec!["a".into(), "b".into()],
        };
        save_atomic(&path, &doc).unwrap();
        let loaded: Doc = load_or_default(&path);
        assert_eq!(loaded, doc);
    }

    #[test]
    fn missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Doc = load_or_default(&dir.path().join("nope.json"));
        assert_eq!(loaded, Doc::default());
    }

    #[test]
    fn corrupt_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, "{not json").unwrap();
        let loaded: Doc = load_or_default(&path);
        assert_eq!(loaded, Doc::default());
    }

    #[test]
    fn save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/doc.json");
        save_atomic(&path, &Doc::default()).unwrap();
        assert!(path.exists());
    }
}
