//! Job-scoped blob storage for media staged before upload.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use chrono_tz::Tz;
use tracing::debug;

use crate::BoxFuture;
use crate::error::{TransferError, TransferResult};
use crate::http::UploadSource;

/// Temporary storage for blobs belonging to one transfer job.
pub trait JobStore: Send + Sync {
    /// Opens the blob stored under `handle`.
    fn get_stream<'a>(
        &'a self,
        job_id: &'a str,
        handle: &'a str,
    ) -> BoxFuture<'a, TransferResult<Box<dyn UploadSource>>>;

    /// Deletes the blob stored under `handle`.
    fn remove_data<'a>(&'a self, job_id: &'a str, handle: &'a str)
    -> BoxFuture<'a, TransferResult<()>>;

    /// Time zone of the user who started the job, if they gave one.
    fn user_time_zone(&self, _job_id: &str) -> Option<Tz> {
        None
    }
}

/// Per-job user time zones, shared by clones of a store.
#[derive(Debug, Clone, Default)]
struct JobTimeZones(Arc<RwLock<HashMap<String, Tz>>>);

impl JobTimeZones {
    fn set(&self, job_id: &str, zone: Tz) {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id.to_string(), zone);
    }

    fn get(&self, job_id: &str) -> Option<Tz> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .copied()
    }
}

/// Blob store kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    blobs: RwLock<HashMap<(String, String), Vec<u8>>>,
    time_zones: JobTimeZones,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `data` under `handle`, replacing any previous blob.
    pub fn put(&self, job_id: &str, handle: &str, data: Vec<u8>) {
        self.blobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((job_id.to_string(), handle.to_string()), data);
    }

    /// Records the time zone photo titles of `job_id` are dated in.
    pub fn set_user_time_zone(&self, job_id: &str, zone: Tz) {
        self.time_zones.set(job_id, zone);
    }

    pub fn contains(&self, job_id: &str, handle: &str) -> bool {
        self.blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&(job_id.to_string(), handle.to_string()))
    }
}

impl JobStore for InMemoryJobStore {
    fn get_stream<'a>(
        &'a self,
        job_id: &'a str,
        handle: &'a str,
    ) -> BoxFuture<'a, TransferResult<Box<dyn UploadSource>>> {
        Box::pin(async move {
            let blobs = self.blobs.read().unwrap_or_else(PoisonError::into_inner);
            let data = blobs
                .get(&(job_id.to_string(), handle.to_string()))
                .cloned()
                .ok_or_else(|| missing_blob(job_id, handle))?;
            Ok(Box::new(Cursor::new(data)) as Box<dyn UploadSource>)
        })
    }

    fn remove_data<'a>(
        &'a self,
        job_id: &'a str,
        handle: &'a str,
    ) -> BoxFuture<'a, TransferResult<()>> {
        Box::pin(async move {
            self.blobs
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&(job_id.to_string(), handle.to_string()));
            Ok(())
        })
    }

    fn user_time_zone(&self, job_id: &str) -> Option<Tz> {
        self.time_zones.get(job_id)
    }
}

/// Blob store backed by a directory, one subdirectory per job.
#[derive(Debug, Clone)]
pub struct FileJobStore {
    root: PathBuf,
    time_zones: JobTimeZones,
}

impl FileJobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            time_zones: JobTimeZones::default(),
        }
    }

    /// Records the time zone photo titles of `job_id` are dated in.
    pub fn set_user_time_zone(&self, job_id: &str, zone: Tz) {
        self.time_zones.set(job_id, zone);
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes `data` under `handle`.
    pub async fn put(&self, job_id: &str, handle: &str, data: &[u8]) -> TransferResult<()> {
        let path = self.blob_path(job_id, handle)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                TransferError::internal(format!("failed to create {}", parent.display()))
                    .with_source(e)
            })?;
        }
        tokio::fs::write(&path, data).await.map_err(|e| {
            TransferError::internal(format!("failed to write {}", path.display())).with_source(e)
        })?;
        debug!(path = %path.display(), bytes = data.len(), "stored job blob");
        Ok(())
    }

    fn blob_path(&self, job_id: &str, handle: &str) -> TransferResult<PathBuf> {
        Ok(self
            .root
            .join(path_component(job_id)?)
            .join(path_component(handle)?))
    }
}

impl JobStore for FileJobStore {
    fn get_stream<'a>(
        &'a self,
        job_id: &'a str,
        handle: &'a str,
    ) -> BoxFuture<'a, TransferResult<Box<dyn UploadSource>>> {
        Box::pin(async move {
            let path = self.blob_path(job_id, handle)?;
            match tokio::fs::File::open(&path).await {
                Ok(file) => Ok(Box::new(file) as Box<dyn UploadSource>),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(missing_blob(job_id, handle))
                }
                Err(e) => Err(TransferError::internal(format!(
                    "failed to open {}",
                    path.display()
                ))
                .with_source(e)),
            }
        })
    }

    fn remove_data<'a>(
        &'a self,
        job_id: &'a str,
        handle: &'a str,
    ) -> BoxFuture<'a, TransferResult<()>> {
        Box::pin(async move {
            let path = self.blob_path(job_id, handle)?;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(TransferError::internal(format!(
                    "failed to remove {}",
                    path.display()
                ))
                .with_source(e)),
            }
        })
    }

    fn user_time_zone(&self, job_id: &str) -> Option<Tz> {
        self.time_zones.get(job_id)
    }
}

/// Encodes an id or handle as a single path component.
fn path_component(raw: &str) -> TransferResult<String> {
    if raw.is_empty() || raw == "." || raw == ".." {
        return Err(TransferError::internal(format!(
            "invalid blob store key '{}'",
            raw
        )));
    }
    Ok(urlencoding::encode(raw).into_owned())
}

fn missing_blob(job_id: &str, handle: &str) -> TransferError {
    TransferError::internal(format!("no stored data for {} in job {}", handle, job_id))
}
