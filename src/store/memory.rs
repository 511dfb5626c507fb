use super::{JudgeStore, StoreError, SubmissionRow, TaskRow};
use crate::models::verdict::VerdictRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    tasks: HashMap<String, TaskRow>,
    submissions: HashMap<String, SubmissionRow>,
    verdicts: HashMap<String, VerdictRecord>,
}

/// In-process store, a single lock over all tables plays the role of a transaction.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_task(&self, task: TaskRow) {
        self.tables.write().await.tasks.insert(task.id.clone(), task);
    }

    pub async fn insert_submission(&self, submission: SubmissionRow) {
        self.tables
            .write()
            .await
            .submissions
            .insert(submission.id.clone(), submission);
    }

    pub async fn submission(&self, submission_id: &str) -> Option<SubmissionRow> {
        self.tables.read().await.submissions.get(submission_id).cloned()
    }

    pub async fn verdict(&self, verdict_id: &str) -> Option<VerdictRecord> {
        self.tables.read().await.verdicts.get(verdict_id).cloned()
    }

    pub async fn official_verdict(&self, submission_id: &str) -> Option<VerdictRecord> {
        let tables = self.tables.read().await;
        let verdict_id = tables.submissions.get(submission_id)?.official_verdict_id.as_ref()?;
        tables.verdicts.get(verdict_id).cloned()
    }
}

#[async_trait]
impl JudgeStore for MemoryStore {
    async fn load_snapshot(&self, submission_id: &str) -> Result<(SubmissionRow, TaskRow), StoreError> {
        let tables = self.tables.read().await;
        let submission = tables
            .submissions
            .get(submission_id)
            .cloned()
            .ok_or_else(|| StoreError::SubmissionNotFound(submission_id.into()))?;
        let task = tables
            .tasks
            .get(&submission.task_id)
            .cloned()
            .ok_or_else(|| StoreError::TaskNotFound(submission.task_id.clone()))?;
        Ok((submission, task))
    }

    async fn save_verdict(&self, verdict: &VerdictRecord) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let submission = tables
            .submissions
            .get_mut(&verdict.submission_id)
            .ok_or_else(|| StoreError::SubmissionNotFound(verdict.submission_id.clone()))?;
        let superseded = submission.official_verdict_id.replace(verdict.id.clone());
        if let Some(previous) = superseded.and_then(|id| tables.verdicts.get_mut(&id)) {
            previous.is_official = false;
        }
        tables.verdicts.insert(verdict.id.clone(), verdict.clone());
        Ok(())
    }
}
