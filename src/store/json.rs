use super::{JudgeStore, StoreError, SubmissionRow, TaskRow};
use crate::judge_files::check_file_name;
use crate::models::verdict::VerdictRecord;
use async_trait::async_trait;
use log::info;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Store kept as JSON documents under `tasks/`, `submissions/` and `verdicts/`.
///
/// Writes go to a temporary file first and are renamed into place; the verdict document is
/// written before the submission is repointed at it, so a crash in between leaves the previous
/// official verdict in effect.
pub struct JsonStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonStore {
    pub fn new(root: PathBuf) -> Self {
        JsonStore {
            root,
            write_lock: Mutex::new(()),
        }
    }

    fn document_path(&self, table: &str, id: &str) -> Result<PathBuf, StoreError> {
        let id = check_file_name(id).map_err(|_| StoreError::UnsafeId(id.into()))?;
        Ok(self.root.join(table).join(format!("{}.json", id)))
    }

    fn task_path(&self, task_id: &str) -> Result<PathBuf, StoreError> {
        self.document_path("tasks", task_id)
    }

    fn submission_path(&self, submission_id: &str) -> Result<PathBuf, StoreError> {
        self.document_path("submissions", submission_id)
    }

    fn verdict_path(&self, verdict_id: &str) -> Result<PathBuf, StoreError> {
        self.document_path("verdicts", verdict_id)
    }

    pub async fn read_verdict(&self, verdict_id: &str) -> Result<Option<VerdictRecord>, StoreError> {
        read_document(&self.verdict_path(verdict_id)?).await
    }
}

async fn read_document<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.into(),
                source,
            })
        }
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|source| StoreError::Decode {
            path: path.into(),
            source,
        })
}

async fn write_document<T: Serialize>(path: &Path, document: &T) -> Result<(), StoreError> {
    let io_error = |source| StoreError::Io {
        path: path.into(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
    }
    let bytes = serde_json::to_vec_pretty(document)?;
    let temporary = path.with_extension("json.tmp");
    tokio::fs::write(&temporary, bytes).await.map_err(io_error)?;
    tokio::fs::rename(&temporary, path).await.map_err(io_error)?;
    Ok(())
}

#[async_trait]
impl JudgeStore for JsonStore {
    async fn load_snapshot(&self, submission_id: &str) -> Result<(SubmissionRow, TaskRow), StoreError> {
        // Holding the write lock keeps a concurrent save from landing between the two reads
        let _guard = self.write_lock.lock().await;
        let submission: SubmissionRow = read_document(&self.submission_path(submission_id)?)
            .await?
            .ok_or_else(|| StoreError::SubmissionNotFound(submission_id.into()))?;
        let task: TaskRow = read_document(&self.task_path(&submission.task_id)?)
            .await?
            .ok_or_else(|| StoreError::TaskNotFound(submission.task_id.clone()))?;
        Ok((submission, task))
    }

    async fn save_verdict(&self, verdict: &VerdictRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let submission_path = self.submission_path(&verdict.submission_id)?;
        let mut submission: SubmissionRow = read_document(&submission_path)
            .await?
            .ok_or_else(|| StoreError::SubmissionNotFound(verdict.submission_id.clone()))?;

        write_document(&self.verdict_path(&verdict.id)?, verdict).await?;

        let superseded = submission.official_verdict_id.replace(verdict.id.clone());
        write_document(&submission_path, &submission).await?;

        if let Some(previous_id) = superseded {
            let previous_path = self.verdict_path(&previous_id)?;
            if let Some(mut previous) = read_document::<VerdictRecord>(&previous_path).await? {
                previous.is_official = false;
                write_document(&previous_path, &previous).await?;
            }
        }

        info!(
            "Saved verdict {} for submission {}",
            verdict.id, verdict.submission_id
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::Language;
    use crate::models::submission::SubmissionFile;
    use crate::models::verdict::Verdict;
    use crate::store::{CheckerKind, TaskKindRow};
    use chrono::Utc;

    fn verdict(id: &str) -> VerdictRecord {
        VerdictRecord {
            id: id.into(),
            submission_id: "s1".into(),
            created_at: Utc::now(),
            is_official: true,
            verdict: Verdict::Accepted,
            score_raw: 100.0,
            score_max: 100.0,
            running_time_ms: 10,
            running_memory_byte: 1024,
            compile_time_ms: None,
            compile_memory_byte: None,
            subtasks: vec![],
        }
    }

    #[tokio::test]
    async fn saving_repoints_the_official_verdict() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path().into());

        write_document(
            &store.task_path("t1").unwrap(),
            &TaskRow {
                id: "t1".into(),
                kind: TaskKindRow::OutputOnly,
                flavor: None,
                checker_kind: CheckerKind::LenientDiff,
                checker_id: None,
                communicator_id: None,
                time_limit_ms: None,
                memory_limit_byte: None,
                compile_time_limit_ms: None,
                compile_memory_limit_byte: None,
                submission_size_limit_byte: None,
                scripts: vec![],
                subtasks: vec![],
            },
        )
        .await
        .unwrap();
        write_document(
            &store.submission_path("s1").unwrap(),
            &SubmissionRow {
                id: "s1".into(),
                task_id: "t1".into(),
                user_id: "u1".into(),
                contest_id: None,
                language: Language::PlainText,
                files: vec![SubmissionFile {
                    file_name: Some("1.out".into()),
                    hash: "ff".into(),
                }],
                exe_name: None,
                compile: None,
                official_verdict_id: None,
            },
        )
        .await
        .unwrap();

        store.save_verdict(&verdict("v1")).await.unwrap();
        store.save_verdict(&verdict("v2")).await.unwrap();

        let (submission, task) = store.load_snapshot("s1").await.unwrap();
        assert_eq!(task.id, "t1");
        assert_eq!(submission.official_verdict_id.as_deref(), Some("v2"));
        assert!(!store.read_verdict("v1").await.unwrap().unwrap().is_official);
        assert!(store.read_verdict("v2").await.unwrap().unwrap().is_official);
    }

    #[tokio::test]
    async fn missing_submission() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path().into());
        assert!(matches!(
            store.load_snapshot("nope").await,
            Err(StoreError::SubmissionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn ids_never_leave_the_store_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path().join("data"));
        for id in &["../escape", "a/b", ""] {
            assert!(matches!(
                store.load_snapshot(id).await,
                Err(StoreError::UnsafeId(_))
            ));
        }
    }
}
