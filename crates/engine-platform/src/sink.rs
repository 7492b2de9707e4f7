use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::{SystemTime, UNIX_EPOCH},
};

use thiserror::Error;

/// Errors produced by document sinks and the stores built on them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("document not found")]
    NotFound,
    #[error("i/o failure: {0}")]
    Io(String),
    #[error("serialization failure: {0}")]
    Serialization(String),
}

/// Keyed string-document storage.
///
/// Writes must be atomic from the perspective of a reader: a crash mid-write
/// leaves either the old document or the new one, never a torn file.
pub trait DocumentSink: Send + Sync {
    fn read(&self, key: &str) -> Result<String, StoreError>;
    fn write(&self, key: &str, contents: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

impl<T: DocumentSink + ?Sized> DocumentSink for std::sync::Arc<T> {
    fn read(&self, key: &str) -> Result<String, StoreError> {
        (**self).read(key)
    }

    fn write(&self, key: &str, contents: &str) -> Result<(), StoreError> {
        (**self).write(key, contents)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        (**self).remove(key)
    }
}

/// File-backed sink storing one `<key>.json` file per document.
#[derive(Debug, Clone)]
pub struct FileSink {
    root: PathBuf,
}

impl FileSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    fn temp_path_for(&self, path: &Path) -> PathBuf {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or("document.json");
        let now_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_nanos())
            .unwrap_or(0);
        parent.join(format!(".{file_name}.{now_nanos}.tmp"))
    }
}

impl DocumentSink for FileSink {
    fn read(&self, key: &str) -> Result<String, StoreError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(raw) => Ok(raw),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(err) => Err(StoreError::Io(err.to_string())),
        }
    }

    fn write(&self, key: &str, contents: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| StoreError::Io(err.to_string()))?;
        }

        let temp_path = self.temp_path_for(&path);
        fs::write(&temp_path, contents).map_err(|err| StoreError::Io(err.to_string()))?;

        if let Err(rename_err) = fs::rename(&temp_path, &path) {
            // Windows does not allow replacing existing files via rename.
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    let _ = fs::remove_file(&temp_path);
                    return Err(StoreError::Io(format!(
                        "replace after rename error ({rename_err}): {err}"
                    )));
                }
            }
            fs::rename(&temp_path, &path).map_err(|err| {
                let _ = fs::remove_file(&temp_path);
                StoreError::Io(err.to_string())
            })?;
        }

        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(err) => Err(StoreError::Io(err.to_string())),
        }
    }
}

/// In-memory sink for tests and throwaway sessions.
#[derive(Clone, Default)]
pub struct InMemorySink {
    data: Arc<RwLock<HashMap<String, String>>>,
}

impl DocumentSink for InMemorySink {
    fn read(&self, key: &str) -> Result<String, StoreError> {
        let data = self
            .data
            .read()
            .map_err(|_| StoreError::Io("poisoned lock".to_owned()))?;
        data.get(key).cloned().ok_or(StoreError::NotFound)
    }

    fn write(&self, key: &str, contents: &str) -> Result<(), StoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| StoreError::Io("poisoned lock".to_owned()))?;
        data.insert(key.to_owned(), contents.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| StoreError::Io("poisoned lock".to_owned()))?;
        if data.remove(key).is_none() {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn unique_temp_root(label: &str) -> PathBuf {
        let now_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        env::temp_dir().join(format!("engine-sink-{label}-{now_nanos}"))
    }

    #[test]
    fn in_memory_round_trip() {
        let sink = InMemorySink::default();
        sink.write("prefs", "{}").expect("write should work");
        assert_eq!(sink.read("prefs").expect("read should work"), "{}");
        sink.remove("prefs").expect("remove should work");
        assert_eq!(sink.read("prefs"), Err(StoreError::NotFound));
    }

    #[test]
    fn file_sink_round_trip_and_replace() {
        let root = unique_temp_root("roundtrip");
        let sink = FileSink::new(&root);

        sink.write("prefs", "{\"a\":1}").expect("write should work");
        sink.write("prefs", "{\"a\":2}").expect("replace should work");
        assert_eq!(sink.read("prefs").expect("read should work"), "{\"a\":2}");

        // Atomic replace leaves no temp file behind.
        let leftovers = fs::read_dir(&root)
            .expect("root should exist")
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .ends_with(".tmp")
            })
            .count();
        assert_eq!(leftovers, 0);

        sink.remove("prefs").expect("remove should work");
        assert_eq!(sink.read("prefs"), Err(StoreError::NotFound));
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn file_sink_read_of_missing_key_is_not_found() {
        let sink = FileSink::new(unique_temp_root("missing"));
        assert_eq!(sink.read("absent"), Err(StoreError::NotFound));
    }
}
