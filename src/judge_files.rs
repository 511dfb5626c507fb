//! Materializes task and submission files on disk before judging.
//!
//! Three roots exist per run: the task root (scripts and test data, kept around and reused by
//! later runs of the same task), the output root (scratch space for produced outputs) and the
//! submission root (the contestant's files). The last two are removed after every run.

use crate::models::submission::Submission;
use crate::models::task::{Task, TaskData};
use async_trait::async_trait;
use dashmap::DashMap;
use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StagingError {
    #[error("refusing unsafe file name {0:?}")]
    UnsafeFileName(String),
    #[error("refusing malformed file hash {0:?}")]
    MalformedHash(String),
    #[error("blob {0} not found in file store")]
    BlobNotFound(String),
    #[error("couldn't stage {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StagingError + '_ {
    move |source| StagingError::Io {
        path: path.into(),
        source,
    }
}

lazy_static! {
    static ref SAFE_FILE_NAME: Regex = Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9._-]*$").unwrap();
    static ref FILE_HASH: Regex = Regex::new(r"^[0-9A-Za-z]+$").unwrap();
}

pub fn check_file_name(file_name: &str) -> Result<&str, StagingError> {
    if SAFE_FILE_NAME.is_match(file_name) {
        Ok(file_name)
    } else {
        Err(StagingError::UnsafeFileName(file_name.into()))
    }
}

pub fn check_hash(hash: &str) -> Result<&str, StagingError> {
    if FILE_HASH.is_match(hash) {
        Ok(hash)
    } else {
        Err(StagingError::MalformedHash(hash.into()))
    }
}

/// Content addressed blob storage.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn download(&self, hash: &str, dest: &Path) -> Result<(), StagingError>;
}

/// Blobs kept as plain files named after their hash.
pub struct DirectoryFileStore {
    root: PathBuf,
}

impl DirectoryFileStore {
    pub fn new(root: PathBuf) -> Self {
        DirectoryFileStore { root }
    }
}

#[async_trait]
impl FileStore for DirectoryFileStore {
    async fn download(&self, hash: &str, dest: &Path) -> Result<(), StagingError> {
        let source = self.root.join(check_hash(hash)?);
        match tokio::fs::copy(&source, dest).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound && !source.exists() => {
                Err(StagingError::BlobNotFound(hash.into()))
            }
            Err(e) => Err(io_error(dest)(e)),
        }
    }
}

/// A transient directory, removed by [`StagedRoot::remove`] or at the latest when dropped.
#[derive(Debug)]
pub struct StagedRoot {
    path: PathBuf,
    armed: bool,
}

impl StagedRoot {
    fn new(path: PathBuf) -> Self {
        StagedRoot { path, armed: true }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn remove(mut self) {
        self.armed = false;
        clean_directory(&self.path).await;
    }
}

impl Drop for StagedRoot {
    fn drop(&mut self) {
        if self.armed {
            match std::fs::remove_dir_all(&self.path) {
                Ok(()) => debug!("Removed {:?} on drop", self.path),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Couldn't remove {:?}: {}", self.path, e),
            }
        }
    }
}

pub async fn clean_directory(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => debug!("Removed {:?}", path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Couldn't remove {:?}: {}", path, e),
    }
}

const MANIFEST: &str = ".staged.json";

pub struct JudgeFiles<F> {
    store: F,
    tasks_dir: PathBuf,
    outputs_dir: PathBuf,
    submissions_dir: PathBuf,
    task_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl<F: FileStore> JudgeFiles<F> {
    pub fn new(store: F, tasks_dir: PathBuf, outputs_dir: PathBuf, submissions_dir: PathBuf) -> Self {
        JudgeFiles {
            store,
            tasks_dir,
            outputs_dir,
            submissions_dir,
            task_locks: DashMap::new(),
        }
    }

    pub fn task_root(&self, task_id: &str) -> Result<PathBuf, StagingError> {
        Ok(self.tasks_dir.join(check_file_name(task_id)?))
    }

    /// Makes sure every script and test file of `task` is present in its task root.
    ///
    /// Files already staged with the same hash are kept, files whose hash changed since are
    /// downloaded again.
    pub async fn setup_task(&self, task: &Task) -> Result<PathBuf, StagingError> {
        let root = self.task_root(&task.id)?;
        let lock = self
            .task_locks
            .entry(task.id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        tokio::fs::create_dir_all(&root).await.map_err(io_error(&root))?;

        let manifest_path = root.join(MANIFEST);
        let mut manifest: BTreeMap<String, String> = match tokio::fs::read(&manifest_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!("Discarding unreadable manifest {:?}: {}", manifest_path, e);
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };

        let mut wanted: BTreeMap<&str, &str> = BTreeMap::new();
        for script in &task.scripts {
            wanted.insert(&script.file_name, &script.file_hash);
        }
        for datum in task.subtasks.iter().flat_map(|s| s.data.iter()) {
            let TaskData {
                input_file,
                judge_file,
                ..
            } = datum;
            if let Some(input_file) = input_file {
                wanted.insert(&input_file.file_name, &input_file.hash);
            }
            wanted.insert(&judge_file.file_name, &judge_file.hash);
        }

        let mut downloaded = 0;
        for (file_name, hash) in wanted {
            let dest = root.join(check_file_name(file_name)?);
            if manifest.get(file_name).map(String::as_str) == Some(hash) && dest.exists() {
                continue;
            }
            self.store.download(hash, &dest).await?;
            manifest.insert(file_name.into(), hash.into());
            downloaded += 1;
        }

        if downloaded > 0 {
            let bytes = serde_json::to_vec(&manifest)
                .map_err(|e| io_error(&manifest_path)(io::Error::new(io::ErrorKind::Other, e)))?;
            tokio::fs::write(&manifest_path, bytes)
                .await
                .map_err(io_error(&manifest_path))?;
        }
        info!("Task root {:?} ready, {} files downloaded", root, downloaded);
        Ok(root)
    }

    /// Creates an empty, world writable directory for outputs produced inside boxes.
    pub async fn setup_output(&self, submission: &Submission) -> Result<StagedRoot, StagingError> {
        let root = self.fresh_root(&self.outputs_dir, &submission.id)?;
        tokio::fs::create_dir_all(root.path())
            .await
            .map_err(io_error(root.path()))?;
        make_world_writable(root.path()).await?;
        Ok(root)
    }

    pub async fn setup_submission(&self, submission: &Submission) -> Result<StagedRoot, StagingError> {
        let root = self.fresh_root(&self.submissions_dir, &submission.id)?;
        tokio::fs::create_dir_all(root.path())
            .await
            .map_err(io_error(root.path()))?;
        for file in &submission.files {
            let file_name = check_file_name(Submission::staged_file_name(file))?;
            self.store.download(&file.hash, &root.path().join(file_name)).await?;
        }
        Ok(root)
    }

    fn fresh_root(&self, parent: &Path, submission_id: &str) -> Result<StagedRoot, StagingError> {
        let name = format!("{}-{}", check_file_name(submission_id)?, Uuid::new_v4());
        Ok(StagedRoot::new(parent.join(name)))
    }
}

#[cfg(unix)]
async fn make_world_writable(path: &Path) -> Result<(), StagingError> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o777))
        .await
        .map_err(io_error(path))
}

#[cfg(not(unix))]
async fn make_world_writable(_path: &Path) -> Result<(), StagingError> {
    Ok(())
}
