pub mod communication;
pub mod output;

use crate::checker::{CheckerEnv, CheckerResult};
use crate::config::JudgeConfig;
use crate::isolate::{CommandTuple, DirBinding, Isolate, IsolateResult, RunParams};
use crate::models::submission::ContestantScript;
use crate::models::task::{RunLimits, Task, TaskConfigurationError, TaskData, TaskKind};
use crate::models::verdict::Verdict;
use std::path::Path;

#[derive(Clone, Debug, PartialEq)]
pub struct EvaluationResult {
    pub verdict: Verdict,
    pub score_raw: f64,
    pub running_time_ms: u64,
    pub running_memory_byte: u64,
}

impl EvaluationResult {
    /// A run that is reported as is, without grading its output.
    pub fn ungraded(verdict: Verdict, run: Option<&IsolateResult>) -> Self {
        EvaluationResult {
            verdict,
            score_raw: 0.0,
            running_time_ms: run.map_or(0, |r| r.running_time_ms),
            running_memory_byte: run.map_or(0, |r| r.running_memory_byte),
        }
    }

    pub fn graded(checker_result: CheckerResult, run: Option<&IsolateResult>) -> Self {
        EvaluationResult {
            verdict: checker_result.verdict,
            score_raw: checker_result.score_raw,
            running_time_ms: run.map_or(0, |r| r.running_time_ms),
            running_memory_byte: run.map_or(0, |r| r.running_memory_byte),
        }
    }
}

/// Everything an evaluator needs besides the datum itself.
pub struct EvaluationContext<'a> {
    pub isolate: &'a Isolate,
    pub config: &'a JudgeConfig,
    pub task_root: &'a Path,
    pub output_root: &'a Path,
    pub submission_root: &'a Path,
    pub contestant: Option<&'a ContestantScript>,
}

impl<'a> EvaluationContext<'a> {
    pub fn checker_env<'b>(&'b self, task: &'b Task) -> CheckerEnv<'b> {
        CheckerEnv {
            isolate: self.isolate,
            config: self.config,
            task_id: &task.id,
        }
    }

    /// Time and memory for the contestant, falling back to the configured defaults.
    pub fn contestant_limits(&self, limits: &RunLimits) -> (u64, u64) {
        (
            limits.time_limit_ms.unwrap_or(self.config.default_time_limit_ms),
            limits
                .memory_limit_byte
                .unwrap_or(self.config.default_memory_limit_byte),
        )
    }

    pub fn contestant(&self, task: &Task) -> Result<&'a ContestantScript, TaskConfigurationError> {
        self.contestant.ok_or_else(|| TaskConfigurationError::Invalid {
            task_id: task.id.clone(),
            reason: "no contestant program to run".into(),
        })
    }
}

pub async fn evaluate_data(
    task: &Task,
    context: &EvaluationContext<'_>,
    data: &TaskData,
) -> Result<EvaluationResult, TaskConfigurationError> {
    match &task.kind {
        TaskKind::Batch { limits } => output::evaluate_batch(task, limits, context, data).await,
        TaskKind::OutputOnly { .. } => output::evaluate_output(task, context, data).await,
        TaskKind::Communication {
            limits,
            communicator,
        } => communication::evaluate_communication(task, limits, communicator, context, data).await,
    }
}

/// How the contestant's program is launched for one task.
pub struct ContestantRun {
    pub command: CommandTuple,
    pub dirs: Vec<DirBinding>,
    pub time_limit_ms: u64,
    pub memory_limit_byte: u64,
    pub process_limit: u32,
}

impl ContestantRun {
    pub fn new(
        task: &Task,
        limits: &RunLimits,
        context: &EvaluationContext<'_>,
    ) -> Result<ContestantRun, TaskConfigurationError> {
        let contestant = context.contestant(task)?;
        let (time_limit_ms, memory_limit_byte) = context.contestant_limits(limits);
        let spec = contestant.language.spec();
        let command = contestant
            .language
            .launch_command(&format!("/submission/{}", contestant.exe_name), memory_limit_byte)
            .ok_or_else(|| TaskConfigurationError::UnrunnableLanguage {
                task_id: task.id.clone(),
                language: contestant.language,
            })?;

        let mut dirs = Vec::new();
        if let Some(language_dir) = &context.config.language_dir {
            dirs.push(DirBinding::read_only(&language_dir.to_string_lossy(), language_dir));
        }
        dirs.push(DirBinding::read_only("/submission", context.submission_root));

        Ok(ContestantRun {
            command,
            dirs,
            time_limit_ms,
            memory_limit_byte: memory_limit_byte + spec.runtime_bonus_memory_byte,
            process_limit: contestant.language.process_limit(),
        })
    }

    pub fn params(&self) -> RunParams<'_> {
        RunParams {
            command: &self.command,
            dirs: self.dirs.clone(),
            chdir: None,
            time_limit_ms: self.time_limit_ms,
            memory_limit_byte: self.memory_limit_byte,
            process_limit: self.process_limit,
        }
    }
}
