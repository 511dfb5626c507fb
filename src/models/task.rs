use crate::language::Language;
use crate::store::{CheckerKind, ScriptRow, TaskKindRow, TaskRow};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A broken task definition. Judging stops before any sandbox is touched.
#[derive(Error, Debug, PartialEq)]
pub enum TaskConfigurationError {
    #[error("task {task_id}: missing {what} script")]
    MissingScript { task_id: String, what: &'static str },
    #[error("task {task_id}: script {script_id} has no compiled executable")]
    MissingExecutable { task_id: String, script_id: String },
    #[error("task {task_id}: language {language:?} cannot be executed")]
    UnrunnableLanguage { task_id: String, language: Language },
    #[error("task {task_id}: {reason}")]
    Invalid { task_id: String, reason: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileRef {
    pub file_name: String,
    pub hash: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub id: String,
    pub language: Language,
    pub file_name: String,
    pub file_hash: String,
    #[serde(default)]
    pub argv: Vec<String>,
    /// Name of the compiled artifact inside the task root, set by the compile step
    #[serde(default)]
    pub exe_name: Option<String>,
}

impl Script {
    pub fn exe_name(&self, task_id: &str) -> Result<&str, TaskConfigurationError> {
        self.exe_name
            .as_deref()
            .ok_or_else(|| TaskConfigurationError::MissingExecutable {
                task_id: task_id.into(),
                script_id: self.id.clone(),
            })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Checker {
    /// Lenient diff, ignores whitespace amounts and blank lines
    Standard,
    Custom(Script),
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum TaskFlavor {
    #[serde(rename = "text")]
    OutputText,
    #[serde(rename = "file")]
    OutputFile,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunLimits {
    pub time_limit_ms: Option<u64>,
    pub memory_limit_byte: Option<u64>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TaskKind {
    Batch { limits: RunLimits },
    OutputOnly { flavor: TaskFlavor },
    Communication { limits: RunLimits, communicator: Script },
}

#[derive(Clone, Debug, PartialEq)]
pub struct TaskData {
    pub id: String,
    pub input_file: Option<FileRef>,
    pub judge_file: FileRef,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Subtask {
    pub id: String,
    pub score_max: f64,
    pub data: Vec<TaskData>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Task {
    pub id: String,
    pub kind: TaskKind,
    pub checker: Checker,
    pub scripts: Vec<Script>,
    pub subtasks: Vec<Subtask>,
    pub compile_time_limit_ms: Option<u64>,
    pub compile_memory_limit_byte: Option<u64>,
    pub submission_size_limit_byte: Option<u64>,
}

fn find_script(
    task_id: &str,
    script_id: Option<&str>,
    scripts: &[ScriptRow],
    what: &'static str,
) -> Result<Script, TaskConfigurationError> {
    scripts
        .iter()
        .find(|s| Some(s.id.as_str()) == script_id)
        .map(|s| s.clone().into())
        .ok_or_else(|| TaskConfigurationError::MissingScript {
            task_id: task_id.into(),
            what,
        })
}

impl Task {
    /// Assembles a typed task out of its stored rows, resolving script references.
    pub fn from_row(row: TaskRow) -> Result<Task, TaskConfigurationError> {
        let checker = match row.checker_kind {
            CheckerKind::LenientDiff => Checker::Standard,
            CheckerKind::Custom => Checker::Custom(find_script(
                &row.id,
                row.checker_id.as_deref(),
                &row.scripts,
                "checker",
            )?),
        };

        let limits = RunLimits {
            time_limit_ms: row.time_limit_ms,
            memory_limit_byte: row.memory_limit_byte,
        };
        let kind = match row.kind {
            TaskKindRow::Batch => TaskKind::Batch { limits },
            TaskKindRow::OutputOnly => TaskKind::OutputOnly {
                flavor: row.flavor.unwrap_or(TaskFlavor::OutputText),
            },
            TaskKindRow::Communication => TaskKind::Communication {
                limits,
                communicator: find_script(
                    &row.id,
                    row.communicator_id.as_deref(),
                    &row.scripts,
                    "communicator",
                )?,
            },
        };

        let mut subtasks = Vec::with_capacity(row.subtasks.len());
        for subtask in row.subtasks {
            if !(subtask.score_max >= 0.0) {
                return Err(TaskConfigurationError::Invalid {
                    task_id: row.id.clone(),
                    reason: format!("subtask {} has a negative score_max", subtask.id),
                });
            }
            let mut data = Vec::with_capacity(subtask.data.len());
            for datum in subtask.data {
                let input_file = match (datum.input_file_name, datum.input_file_hash) {
                    (Some(file_name), Some(hash)) => Some(FileRef { file_name, hash }),
                    _ => None,
                };
                if input_file.is_none() && !matches!(kind, TaskKind::OutputOnly { .. }) {
                    return Err(TaskConfigurationError::Invalid {
                        task_id: row.id.clone(),
                        reason: format!("task data {} has no input file", datum.id),
                    });
                }
                data.push(TaskData {
                    id: datum.id,
                    input_file,
                    judge_file: FileRef {
                        file_name: datum.judge_file_name,
                        hash: datum.judge_file_hash,
                    },
                });
            }
            subtasks.push(Subtask {
                id: subtask.id,
                score_max: subtask.score_max,
                data,
            });
        }

        Ok(Task {
            id: row.id,
            kind,
            checker,
            scripts: row.scripts.into_iter().map(Script::from).collect(),
            subtasks,
            compile_time_limit_ms: row.compile_time_limit_ms,
            compile_memory_limit_byte: row.compile_memory_limit_byte,
            submission_size_limit_byte: row.submission_size_limit_byte,
        })
    }

    pub fn score_max(&self) -> f64 {
        self.subtasks.iter().map(|s| s.score_max).sum()
    }

    /// Checks that every script the judge will launch has been compiled.
    pub fn validate_executables(&self) -> Result<(), TaskConfigurationError> {
        if let Checker::Custom(script) = &self.checker {
            check_launchable(&self.id, script)?;
        }
        if let TaskKind::Communication { communicator, .. } = &self.kind {
            check_launchable(&self.id, communicator)?;
        }
        Ok(())
    }
}

fn check_launchable(task_id: &str, script: &Script) -> Result<(), TaskConfigurationError> {
    script.exe_name(task_id)?;
    if !script.language.is_runnable() {
        return Err(TaskConfigurationError::UnrunnableLanguage {
            task_id: task_id.into(),
            language: script.language,
        });
    }
    Ok(())
}

impl From<ScriptRow> for Script {
    fn from(row: ScriptRow) -> Self {
        Script {
            id: row.id,
            language: row.language,
            file_name: row.file_name,
            file_hash: row.file_hash,
            argv: row.argv.unwrap_or_default(),
            exe_name: row.exe_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{SubtaskRow, TaskDataRow};

    fn script_row(id: &str, exe_name: Option<&str>) -> ScriptRow {
        ScriptRow {
            id: id.into(),
            language: Language::Cpp,
            file_name: format!("{}.cpp", id),
            file_hash: "abc123".into(),
            argv: None,
            exe_name: exe_name.map(String::from),
        }
    }

    fn task_row(kind: TaskKindRow) -> TaskRow {
        TaskRow {
            id: "task-1".into(),
            kind,
            flavor: None,
            checker_kind: CheckerKind::LenientDiff,
            checker_id: None,
            communicator_id: None,
            time_limit_ms: Some(1000),
            memory_limit_byte: Some(64 << 20),
            compile_time_limit_ms: None,
            compile_memory_limit_byte: None,
            submission_size_limit_byte: None,
            scripts: vec![],
            subtasks: vec![SubtaskRow {
                id: "sub-1".into(),
                score_max: 40.0,
                data: vec![TaskDataRow {
                    id: "data-1".into(),
                    input_file_name: Some("1.in".into()),
                    input_file_hash: Some("aa".into()),
                    judge_file_name: "1.ans".into(),
                    judge_file_hash: "bb".into(),
                }],
            }],
        }
    }

    #[test]
    fn custom_checker_without_script_is_a_configuration_error() {
        let mut row = task_row(TaskKindRow::Batch);
        row.checker_kind = CheckerKind::Custom;
        row.checker_id = Some("checker".into());
        assert_eq!(
            Task::from_row(row),
            Err(TaskConfigurationError::MissingScript {
                task_id: "task-1".into(),
                what: "checker"
            })
        );
    }

    #[test]
    fn communication_task_resolves_communicator() {
        let mut row = task_row(TaskKindRow::Communication);
        row.communicator_id = Some("comm".into());
        row.scripts = vec![script_row("comm", Some("comm.exe"))];
        let task = Task::from_row(row).unwrap();
        match &task.kind {
            TaskKind::Communication { communicator, limits } => {
                assert_eq!(communicator.exe_name.as_deref(), Some("comm.exe"));
                assert_eq!(limits.time_limit_ms, Some(1000));
            }
            other => panic!("unexpected kind {:?}", other),
        }
        assert!(task.validate_executables().is_ok());
        assert_eq!(task.score_max(), 40.0);
    }

    #[test]
    fn uncompiled_checker_fails_validation() {
        let mut row = task_row(TaskKindRow::Batch);
        row.checker_kind = CheckerKind::Custom;
        row.checker_id = Some("checker".into());
        row.scripts = vec![script_row("checker", None)];
        let task = Task::from_row(row).unwrap();
        assert!(matches!(
            task.validate_executables(),
            Err(TaskConfigurationError::MissingExecutable { .. })
        ));
    }

    #[test]
    fn output_only_data_may_lack_input() {
        let mut row = task_row(TaskKindRow::OutputOnly);
        row.subtasks[0].data[0].input_file_name = None;
        row.subtasks[0].data[0].input_file_hash = None;
        let task = Task::from_row(row).unwrap();
        assert!(matches!(task.kind, TaskKind::OutputOnly { flavor: TaskFlavor::OutputText }));
        assert!(task.subtasks[0].data[0].input_file.is_none());
    }

    #[test]
    fn batch_data_must_have_input() {
        let mut row = task_row(TaskKindRow::Batch);
        row.subtasks[0].data[0].input_file_name = None;
        assert!(matches!(Task::from_row(row), Err(TaskConfigurationError::Invalid { .. })));
    }

    #[test]
    fn negative_score_max_is_rejected() {
        let mut row = task_row(TaskKindRow::Batch);
        row.subtasks[0].score_max = -1.0;
        assert!(matches!(Task::from_row(row), Err(TaskConfigurationError::Invalid { .. })));
    }
}
