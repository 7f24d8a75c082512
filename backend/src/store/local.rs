// src/store/local.rs

//! Device-local key-value store for in-progress exam state.
//!
//! Writes are synchronous and best-effort: they must finish before the next
//! countdown tick but are not expected to survive power loss.

use std::{
    collections::HashMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::AppError;

pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, AppError>;

    fn set(&self, key: &str, value: Value) -> Result<(), AppError>;

    fn remove(&self, key: &str) -> Result<(), AppError>;
}

/// Key of the exam + questions blob cached for one student's sitting.
/// Scoped per student so a later sitting picks up a rescheduled exam.
pub fn exam_blob_key(exam_id: i64, student_id: i64) -> String {
    format!("cbt_exam_{}_{}", exam_id, student_id)
}

/// Key of a student's answers mapping for one exam.
pub fn answers_key(exam_id: i64, student_id: i64) -> String {
    format!("exam_{}_{}", exam_id, student_id)
}

/// Key of the fixed end timestamp of a student's sitting.
pub fn deadline_key(exam_id: i64, student_id: i64) -> String {
    format!("exam_{}_{}_ends_at", exam_id, student_id)
}

/// Key of the "just completed" marker. The store is shared by every student
/// of this service, so the marker is scoped per student.
pub fn just_completed_key(student_id: i64) -> String {
    format!("justCompletedExams_{}", student_id)
}

/// Key of the queue of submissions whose remote writes failed.
pub const PENDING_SUBMISSIONS_KEY: &str = "pendingSubmissions";

/// Reads and decodes a typed value. A value that no longer decodes is treated as absent.
pub fn get_json<T: DeserializeOwned>(store: &dyn LocalStore, key: &str) -> Result<Option<T>, AppError> {
    match store.get(key)? {
        Some(value) => match serde_json::from_value(value) {
            Ok(decoded) => Ok(Some(decoded)),
            Err(e) => {
                tracing::warn!(%key, error = %e, "Discarding undecodable local value");
                Ok(None)
            }
        },
        None => Ok(None),
    }
}

pub fn set_json<T: Serialize>(store: &dyn LocalStore, key: &str, value: &T) -> Result<(), AppError> {
    let value = serde_json::to_value(value)
        .map_err(|e| AppError::InternalServerError(e.to_string()))?;
    store.set(key, value)
}

#[derive(Default)]
pub struct MemoryLocalStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Value>>, AppError> {
        self.entries
            .lock()
            .map_err(|_| AppError::InternalServerError("local store lock poisoned".to_string()))
    }
}

impl LocalStore for MemoryLocalStore {
    fn get(&self, key: &str) -> Result<Option<Value>, AppError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), AppError> {
        self.lock()?.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), AppError> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// One JSON file per key under `dir`.
pub struct FileLocalStore {
    dir: PathBuf,
}

impl FileLocalStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, AppError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| {
            AppError::InternalServerError(format!("cannot create {}: {}", dir.display(), e))
        })?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", file))
    }
}

impl LocalStore for FileLocalStore {
    fn get(&self, key: &str) -> Result<Option<Value>, AppError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(|e| {
                AppError::InternalServerError(format!("corrupt local value '{}': {}", key, e))
            })?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::InternalServerError(e.to_string())),
        }
    }

    fn set(&self, key: &str, value: Value) -> Result<(), AppError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(&value)
            .map_err(|e| AppError::InternalServerError(e.to_string()))?;
        fs::write(&tmp, bytes).map_err(|e| AppError::InternalServerError(e.to_string()))?;
        fs::rename(&tmp, &path).map_err(|e| AppError::InternalServerError(e.to_string()))
    }

    fn remove(&self, key: &str) -> Result<(), AppError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::InternalServerError(e.to_string())),
        }
    }
}
