use crate::language::Language;
use crate::models::task::{Task, TaskConfigurationError, TaskKind};
use crate::store::SubmissionRow;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubmissionFile {
    pub file_name: Option<String>,
    pub hash: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompileStats {
    pub time_ms: u64,
    pub memory_byte: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Submission {
    pub id: String,
    pub task_id: String,
    pub user_id: String,
    pub contest_id: Option<String>,
    pub language: Language,
    pub files: Vec<SubmissionFile>,
    pub exe_name: Option<String>,
    pub compile: Option<CompileStats>,
    pub official_verdict_id: Option<String>,
}

/// The contestant's compiled program, as found in the submission root.
#[derive(Clone, Debug, PartialEq)]
pub struct ContestantScript {
    pub language: Language,
    pub exe_name: String,
}

impl Submission {
    pub fn from_row(row: SubmissionRow) -> Submission {
        Submission {
            id: row.id,
            task_id: row.task_id,
            user_id: row.user_id,
            contest_id: row.contest_id,
            language: row.language,
            files: row.files,
            exe_name: row.exe_name,
            compile: row.compile,
            official_verdict_id: row.official_verdict_id,
        }
    }

    /// Name the file gets inside the submission root.
    pub fn staged_file_name(file: &SubmissionFile) -> &str {
        file.file_name.as_deref().unwrap_or(&file.hash)
    }

    /// The program to run, `None` for tasks where nothing of the contestant's is executed.
    pub fn contestant(&self, task: &Task) -> Result<Option<ContestantScript>, TaskConfigurationError> {
        match task.kind {
            TaskKind::OutputOnly { .. } => Ok(None),
            TaskKind::Batch { .. } | TaskKind::Communication { .. } => {
                if !self.language.is_runnable() {
                    return Err(TaskConfigurationError::UnrunnableLanguage {
                        task_id: task.id.clone(),
                        language: self.language,
                    });
                }
                let exe_name = self.exe_name.clone().ok_or_else(|| {
                    TaskConfigurationError::MissingExecutable {
                        task_id: task.id.clone(),
                        script_id: format!("submission {}", self.id),
                    }
                })?;
                Ok(Some(ContestantScript {
                    language: self.language,
                    exe_name,
                }))
            }
        }
    }
}
