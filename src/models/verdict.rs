use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(rename = "ac")]
    Accepted,
    #[serde(rename = "pa")]
    Partial,
    #[serde(rename = "wa")]
    WrongAnswer,
    #[serde(rename = "re")]
    RuntimeError,
    #[serde(rename = "tle")]
    TimeLimitExceeded,
    #[serde(rename = "mle")]
    MemoryLimitExceeded,
    #[serde(rename = "ce")]
    CompileError,
    #[serde(rename = "jf")]
    JudgeFailed,
    #[serde(rename = "skip")]
    Skipped,
}

impl Verdict {
    /// Rank used when folding many verdicts into one, higher is worse.
    pub fn severity(self) -> u8 {
        match self {
            Verdict::Accepted => 0,
            Verdict::Skipped => 1,
            Verdict::Partial => 2,
            Verdict::WrongAnswer
            | Verdict::RuntimeError
            | Verdict::TimeLimitExceeded
            | Verdict::MemoryLimitExceeded
            | Verdict::CompileError => 3,
            Verdict::JudgeFailed => 4,
        }
    }

    /// The worst verdict of `verdicts`, the first one wins among equally severe verdicts.
    pub fn worst<I: IntoIterator<Item = Verdict>>(verdicts: I) -> Option<Verdict> {
        verdicts.into_iter().fold(None, |worst, verdict| match worst {
            Some(w) if w.severity() >= verdict.severity() => Some(w),
            _ => Some(verdict),
        })
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Accepted => "Accepted",
            Verdict::Partial => "Partial",
            Verdict::WrongAnswer => "Wrong Answer",
            Verdict::RuntimeError => "Runtime Error",
            Verdict::TimeLimitExceeded => "Time Limit Exceeded",
            Verdict::MemoryLimitExceeded => "Memory Limit Exceeded",
            Verdict::CompileError => "Compile Error",
            Verdict::JudgeFailed => "Judge Failed",
            Verdict::Skipped => "Skipped",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VerdictRecord {
    pub id: String,
    pub submission_id: String,
    pub created_at: DateTime<Utc>,
    pub is_official: bool,
    pub verdict: Verdict,
    pub score_raw: f64,
    pub score_max: f64,
    pub running_time_ms: u64,
    pub running_memory_byte: u64,
    pub compile_time_ms: Option<u64>,
    pub compile_memory_byte: Option<u64>,
    pub subtasks: Vec<SubtaskVerdict>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubtaskVerdict {
    pub subtask_id: String,
    pub verdict: Verdict,
    pub score_raw: f64,
    pub score_max: f64,
    pub running_time_ms: u64,
    pub running_memory_byte: u64,
    pub data: Vec<DataVerdict>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataVerdict {
    pub task_data_id: String,
    pub verdict: Verdict,
    pub score_raw: f64,
    pub running_time_ms: u64,
    pub running_memory_byte: u64,
}
