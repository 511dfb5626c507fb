use crate::box_pool::BoxPool;
use crate::config::JudgeConfig;
use crate::evaluation::EvaluationContext;
use crate::isolate::Isolate;
use crate::judge_files::{FileStore, JudgeFiles, StagingError};
use crate::judge_runner::{aggregate_task, evaluate_task};
use crate::models::submission::Submission;
use crate::models::task::{Task, TaskConfigurationError};
use crate::models::verdict::VerdictRecord;
use crate::store::{JudgeStore, StoreError};
use chrono::Utc;
use log::{debug, error, info};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum JudgeStage {
    Loading,
    Staging,
    Evaluating,
    Aggregating,
    Persisted,
    Failed,
}

impl fmt::Display for JudgeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JudgeStage::Loading => "loading",
            JudgeStage::Staging => "staging",
            JudgeStage::Evaluating => "evaluating",
            JudgeStage::Aggregating => "aggregating",
            JudgeStage::Persisted => "persisted",
            JudgeStage::Failed => "failed",
        })
    }
}

#[derive(Error, Debug)]
pub enum JudgeError {
    #[error("couldn't load the submission")]
    Load(#[source] StoreError),
    #[error(transparent)]
    Configuration(#[from] TaskConfigurationError),
    #[error(transparent)]
    Staging(#[from] StagingError),
    #[error("couldn't persist the verdict")]
    Persist(#[source] StoreError),
}

/// Judges submissions on this host, one call to [`Judge::judge`] per run.
///
/// Runs may overlap; sandbox boxes are shared between them through one [`BoxPool`].
pub struct Judge<S, F> {
    store: S,
    files: JudgeFiles<F>,
    isolate: Isolate,
    config: Arc<JudgeConfig>,
}

impl<S: JudgeStore, F: FileStore> Judge<S, F> {
    pub fn new(config: JudgeConfig, store: S, file_store: F) -> Self {
        let pool = BoxPool::new(config.box_id_start..config.box_id_start + config.box_count);
        debug!("Judging with {} boxes from id {}", pool.size(), config.box_id_start);
        let isolate = Isolate::new(
            config.isolate_executable_path.clone(),
            config.meta_dir(),
            config.wall_time_multiplier,
            pool,
        );
        let files = JudgeFiles::new(
            file_store,
            config.tasks_dir(),
            config.outputs_dir(),
            config.submissions_dir(),
        );
        Judge {
            store,
            files,
            isolate,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &JudgeConfig {
        &self.config
    }

    pub fn isolate(&self) -> &Isolate {
        &self.isolate
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Creates the directories the sandbox writes meta files into.
    pub async fn prepare(&self) -> Result<(), StagingError> {
        let meta_dir = self.config.meta_dir();
        tokio::fs::create_dir_all(&meta_dir)
            .await
            .map_err(|source| StagingError::Io { path: meta_dir, source })
    }

    /// Judges `submission_id` and stores the result as its official verdict.
    ///
    /// Re-judging recomputes the whole tree and supersedes the previous verdict.
    pub async fn judge(&self, submission_id: &str) -> Result<VerdictRecord, JudgeError> {
        let result = self.run(submission_id).await;
        match &result {
            Ok(record) => info!(
                "Submission {}: {} {}/{}",
                submission_id, record.verdict, record.score_raw, record.score_max
            ),
            Err(e) => error!("Submission {} {}: {}", submission_id, JudgeStage::Failed, e),
        }
        result
    }

    fn enter(&self, submission_id: &str, stage: JudgeStage) {
        info!("Submission {} {}", submission_id, stage);
    }

    async fn run(&self, submission_id: &str) -> Result<VerdictRecord, JudgeError> {
        self.enter(submission_id, JudgeStage::Loading);
        let (submission_row, task_row) = self
            .store
            .load_snapshot(submission_id)
            .await
            .map_err(JudgeError::Load)?;
        let task = Task::from_row(task_row)?;
        task.validate_executables()?;
        debug!(
            "Task {} has {} subtasks worth {}",
            task.id,
            task.subtasks.len(),
            task.score_max()
        );
        let submission = Submission::from_row(submission_row);
        let contestant = submission.contestant(&task)?;

        self.enter(submission_id, JudgeStage::Staging);
        self.prepare().await?;
        // Roots staged before a failing sibling are removed when dropped
        let (task_root, output_root, submission_root) = tokio::try_join!(
            self.files.setup_task(&task),
            self.files.setup_output(&submission),
            self.files.setup_submission(&submission),
        )?;

        self.enter(submission_id, JudgeStage::Evaluating);
        let evaluated = {
            let context = EvaluationContext {
                isolate: &self.isolate,
                config: &self.config,
                task_root: &task_root,
                output_root: output_root.path(),
                submission_root: submission_root.path(),
                contestant: contestant.as_ref(),
            };
            evaluate_task(&task, &context, self.config.data_concurrency).await
        };
        futures::join!(output_root.remove(), submission_root.remove());
        let subtasks = evaluated?;

        self.enter(submission_id, JudgeStage::Aggregating);
        let totals = aggregate_task(&subtasks);
        let record = VerdictRecord {
            id: Uuid::new_v4().to_string(),
            submission_id: submission.id.clone(),
            created_at: Utc::now(),
            is_official: true,
            verdict: totals.verdict,
            score_raw: totals.score_raw,
            score_max: totals.score_max,
            running_time_ms: totals.running_time_ms,
            running_memory_byte: totals.running_memory_byte,
            compile_time_ms: submission.compile.map(|c| c.time_ms),
            compile_memory_byte: submission.compile.map(|c| c.memory_byte),
            subtasks,
        };

        self.store.save_verdict(&record).await.map_err(JudgeError::Persist)?;
        self.enter(submission_id, JudgeStage::Persisted);
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_read_as_lowercase_words() {
        assert_eq!(JudgeStage::Loading.to_string(), "loading");
        assert_eq!(JudgeStage::Failed.to_string(), "failed");
    }
}
