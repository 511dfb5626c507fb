//! Persistence seam for tasks, submissions and verdicts.
//!
//! The judge reads one consistent snapshot per run and writes one verdict tree per run, each
//! call on [`JudgeStore`] is one transaction.

mod json;
mod memory;

pub use json::JsonStore;
pub use memory::MemoryStore;

use crate::language::Language;
use crate::models::submission::{CompileStats, SubmissionFile};
use crate::models::task::TaskFlavor;
use crate::models::verdict::VerdictRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("submission {0} not found")]
    SubmissionNotFound(String),
    #[error("task {0} not found")]
    TaskNotFound(String),
    #[error("{0:?} can't be used as a document name")]
    UnsafeId(String),
    #[error("couldn't access {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("couldn't decode {path:?}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Encode(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum TaskKindRow {
    #[serde(rename = "batch")]
    Batch,
    #[serde(rename = "output")]
    OutputOnly,
    #[serde(rename = "communication")]
    Communication,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum CheckerKind {
    #[serde(rename = "ld")]
    LenientDiff,
    #[serde(rename = "xx")]
    Custom,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScriptRow {
    pub id: String,
    pub language: Language,
    pub file_name: String,
    pub file_hash: String,
    #[serde(default)]
    pub argv: Option<Vec<String>>,
    #[serde(default)]
    pub exe_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskDataRow {
    pub id: String,
    #[serde(default)]
    pub input_file_name: Option<String>,
    #[serde(default)]
    pub input_file_hash: Option<String>,
    pub judge_file_name: String,
    pub judge_file_hash: String,
}

/// Subtasks and data are kept in their stored order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubtaskRow {
    pub id: String,
    pub score_max: f64,
    pub data: Vec<TaskDataRow>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskRow {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TaskKindRow,
    #[serde(default)]
    pub flavor: Option<TaskFlavor>,
    pub checker_kind: CheckerKind,
    #[serde(default)]
    pub checker_id: Option<String>,
    #[serde(default)]
    pub communicator_id: Option<String>,
    #[serde(default)]
    pub time_limit_ms: Option<u64>,
    #[serde(default)]
    pub memory_limit_byte: Option<u64>,
    #[serde(default)]
    pub compile_time_limit_ms: Option<u64>,
    #[serde(default)]
    pub compile_memory_limit_byte: Option<u64>,
    #[serde(default)]
    pub submission_size_limit_byte: Option<u64>,
    #[serde(default)]
    pub scripts: Vec<ScriptRow>,
    #[serde(default)]
    pub subtasks: Vec<SubtaskRow>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRow {
    pub id: String,
    pub task_id: String,
    pub user_id: String,
    #[serde(default)]
    pub contest_id: Option<String>,
    pub language: Language,
    pub files: Vec<SubmissionFile>,
    #[serde(default)]
    pub exe_name: Option<String>,
    #[serde(default)]
    pub compile: Option<CompileStats>,
    #[serde(default)]
    pub official_verdict_id: Option<String>,
}

#[async_trait]
pub trait JudgeStore: Send + Sync {
    /// Loads a submission together with its task, as of one point in time.
    async fn load_snapshot(&self, submission_id: &str) -> Result<(SubmissionRow, TaskRow), StoreError>;

    /// Stores the verdict tree and makes it the submission's official verdict.
    async fn save_verdict(&self, verdict: &VerdictRecord) -> Result<(), StoreError>;
}
