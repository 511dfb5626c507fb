//! Evaluators whose contestant output is a plain file: batch runs and output-only uploads.

use super::{ContestantRun, EvaluationContext, EvaluationResult};
use crate::checker::{check_submission_output, CheckerFiles};
use crate::isolate::{log_isolate_status, CommandError, IsolateBox, IsolateResult};
use crate::models::task::{RunLimits, Task, TaskConfigurationError, TaskData};
use crate::models::verdict::Verdict;
use log::{error, info};
use std::fs::File;
use std::io;
use std::path::Path;
use std::process::Stdio;

/// The uploaded file named after the datum's answer is graded as is.
pub async fn evaluate_output(
    task: &Task,
    context: &EvaluationContext<'_>,
    data: &TaskData,
) -> Result<EvaluationResult, TaskConfigurationError> {
    let files = CheckerFiles {
        task_root: context.task_root,
        input_file_name: data.input_file.as_ref().map(|f| f.file_name.as_str()),
        judge_file_name: &data.judge_file.file_name,
        output_root: context.submission_root,
        output_file_name: &data.judge_file.file_name,
    };
    let checked = check_submission_output(&context.checker_env(task), &task.checker, &files).await?;
    Ok(EvaluationResult::graded(checked, None))
}

pub async fn evaluate_batch(
    task: &Task,
    limits: &RunLimits,
    context: &EvaluationContext<'_>,
    data: &TaskData,
) -> Result<EvaluationResult, TaskConfigurationError> {
    let run = ContestantRun::new(task, limits, context)?;
    let input_file_name = data
        .input_file
        .as_ref()
        .map(|f| f.file_name.as_str())
        .ok_or_else(|| TaskConfigurationError::Invalid {
            task_id: task.id.clone(),
            reason: format!("data {} has no input file", data.id),
        })?;
    let output_file_name = data.judge_file.file_name.as_str();
    let input_path = context.task_root.join(input_file_name);
    let output_path = context.output_root.join(output_file_name);

    let outcome = context
        .isolate
        .with_box(|isolate_box: IsolateBox| async move {
            run_with_files(context, &run, &isolate_box, &input_path, &output_path).await
        })
        .await
        .and_then(|result| result);

    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            error!("Couldn't run submission on data {}: {}", data.id, e);
            return Ok(EvaluationResult::ungraded(Verdict::JudgeFailed, None));
        }
    };
    if result.verdict != Verdict::Accepted {
        info!("Data {} ended with {}", data.id, result.verdict);
        return Ok(EvaluationResult::ungraded(result.verdict, Some(&result)));
    }

    let files = CheckerFiles {
        task_root: context.task_root,
        input_file_name: Some(input_file_name),
        judge_file_name: &data.judge_file.file_name,
        output_root: context.output_root,
        output_file_name,
    };
    let checked = check_submission_output(&context.checker_env(task), &task.checker, &files).await?;
    Ok(EvaluationResult::graded(checked, Some(&result)))
}

/// Standard streams are plain host files, so the box never sees the task root.
async fn run_with_files(
    context: &EvaluationContext<'_>,
    run: &ContestantRun,
    isolate_box: &IsolateBox,
    input_path: &Path,
    output_path: &Path,
) -> Result<IsolateResult, CommandError> {
    let open = |path: &Path, file: io::Result<File>| {
        file.map_err(|source| CommandError::StreamIo {
            path: path.into(),
            source,
        })
    };
    let stdin = open(input_path, File::open(input_path))?;
    let stdout = open(output_path, File::create(output_path))?;

    let status = context
        .isolate
        .command(isolate_box, &run.params())
        .stdin(stdin)
        .stdout(stdout)
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(CommandError::CommandIo)?;
    log_isolate_status(isolate_box.id, status);

    context.isolate.read_result(isolate_box).await
}
