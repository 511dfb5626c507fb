//! Grades one produced output against the expected one.

use crate::config::{JudgeConfig, JudgeLimits};
use crate::isolate::{log_isolate_status, DirBinding, Isolate, IsolateBox, RunParams};
use crate::models::task::{Checker, Script, TaskConfigurationError};
use crate::models::verdict::Verdict;
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

#[derive(Clone, Debug, PartialEq)]
pub struct CheckerResult {
    pub verdict: Verdict,
    pub score_raw: f64,
}

impl CheckerResult {
    pub fn judge_failed() -> Self {
        CheckerResult {
            verdict: Verdict::JudgeFailed,
            score_raw: 0.0,
        }
    }
}

/// Where the files for one check live, names are relative to their roots.
#[derive(Clone, Debug)]
pub struct CheckerFiles<'a> {
    pub task_root: &'a Path,
    pub input_file_name: Option<&'a str>,
    pub judge_file_name: &'a str,
    pub output_root: &'a Path,
    pub output_file_name: &'a str,
}

pub struct CheckerEnv<'a> {
    pub isolate: &'a Isolate,
    pub config: &'a JudgeConfig,
    pub task_id: &'a str,
}

pub async fn check_submission_output(
    env: &CheckerEnv<'_>,
    checker: &Checker,
    files: &CheckerFiles<'_>,
) -> Result<CheckerResult, TaskConfigurationError> {
    match checker {
        Checker::Standard => Ok(run_lenient_diff(&env.config.diff_executable_path, files).await),
        Checker::Custom(script) => run_custom_checker(env, script, files).await,
    }
}

async fn run_lenient_diff(diff_executable_path: &Path, files: &CheckerFiles<'_>) -> CheckerResult {
    let judge_path = files.task_root.join(files.judge_file_name);
    let output_path = files.output_root.join(files.output_file_name);

    let status = Command::new(diff_executable_path)
        .arg("-q")
        // Ignore changes in the amount of white space
        .arg("-b")
        // Ignore blank lines
        .arg("-B")
        .arg(&judge_path)
        .arg(&output_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match status {
        Ok(status) if status.success() => CheckerResult {
            verdict: Verdict::Accepted,
            score_raw: 1.0,
        },
        Ok(_) => CheckerResult {
            verdict: Verdict::WrongAnswer,
            score_raw: 0.0,
        },
        Err(e) => {
            error!("Couldn't run diff on {:?}: {}", output_path, e);
            CheckerResult::judge_failed()
        }
    }
}

/// Launch command for a judge-side script, followed by the input, judge and output paths.
pub fn script_command(
    env: &CheckerEnv<'_>,
    script: &Script,
    files: &CheckerFiles<'_>,
) -> Result<(crate::isolate::CommandTuple, JudgeLimits, u32), TaskConfigurationError> {
    let exe_name = script.exe_name(env.task_id)?;
    let spec = script.language.spec();
    let limits = JudgeLimits {
        time_limit_ms: env.config.judge_limits.time_limit_ms,
        memory_limit_byte: env.config.judge_limits.memory_limit_byte + spec.runtime_bonus_memory_byte,
    };

    let exe_path = format!("/task/{}", exe_name);
    let mut command = script
        .language
        .launch_command(&exe_path, env.config.judge_limits.memory_limit_byte)
        .ok_or_else(|| TaskConfigurationError::UnrunnableLanguage {
            task_id: env.task_id.into(),
            language: script.language,
        })?;

    let input_path = match files.input_file_name {
        Some(input_file_name) => format!("/task/{}", input_file_name),
        None => "/dev/null".into(),
    };
    command.args.push(input_path);
    command.args.push(format!("/task/{}", files.judge_file_name));
    command.args.push(format!("/output/{}", files.output_file_name));
    command.args.extend(script.argv.iter().cloned());

    Ok((command, limits, script.language.process_limit()))
}

pub fn checker_dirs(config: &JudgeConfig, task_root: &Path, output_root: &Path, output_rw: bool) -> Vec<DirBinding> {
    let mut dirs = Vec::new();
    if let Some(language_dir) = &config.language_dir {
        let inside = language_dir.to_string_lossy();
        dirs.push(DirBinding::read_only(&inside, language_dir));
    }
    dirs.push(DirBinding::read_only("/task", task_root));
    dirs.push(if output_rw {
        DirBinding::read_write("/output", output_root)
    } else {
        DirBinding::read_only("/output", output_root)
    });
    dirs
}

async fn run_custom_checker(
    env: &CheckerEnv<'_>,
    script: &Script,
    files: &CheckerFiles<'_>,
) -> Result<CheckerResult, TaskConfigurationError> {
    let (command, limits, process_limit) = script_command(env, script, files)?;
    let dirs = checker_dirs(env.config, files.task_root, files.output_root, false);
    let output_path: PathBuf = files.output_root.join(files.output_file_name);

    let outcome = env
        .isolate
        .with_box(|isolate_box: IsolateBox| async move {
            let params = RunParams {
                command: &command,
                dirs,
                chdir: Some("/task"),
                time_limit_ms: limits.time_limit_ms,
                memory_limit_byte: limits.memory_limit_byte,
                process_limit,
            };
            let output = env
                .isolate
                .command(&isolate_box, &params)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .output()
                .await;
            let output = match output {
                Ok(output) => output,
                Err(e) => {
                    error!("Couldn't start checker {}: {}", script.id, e);
                    return CheckerResult::judge_failed();
                }
            };
            log_isolate_status(isolate_box.id, output.status);

            match env.isolate.read_result(&isolate_box).await {
                Ok(result) if result.verdict == Verdict::Accepted => {
                    parse_checker_output(&String::from_utf8_lossy(&output.stdout))
                }
                Ok(result) => {
                    warn!(
                        "Checker {} ended with {} on {:?}: {:?}",
                        script.id, result.verdict, output_path, result.message
                    );
                    CheckerResult::judge_failed()
                }
                Err(e) => {
                    error!("Failed to parse isolate result of checker {}: {}", script.id, e);
                    CheckerResult::judge_failed()
                }
            }
        })
        .await;

    Ok(match outcome {
        Ok(result) => {
            info!("Checker {} graded {:?}: {:?}", script.id, files.output_file_name, result);
            result
        }
        Err(e) => {
            error!("Couldn't get a box for checker {}: {}", script.id, e);
            CheckerResult::judge_failed()
        }
    })
}

/// Only the first line matters, it holds the score as a fraction of the datum's points.
pub fn parse_checker_output(output: &str) -> CheckerResult {
    let first_line = output.lines().next().unwrap_or("");
    let score = parse_score(first_line);
    if score == 1.0 {
        CheckerResult {
            verdict: Verdict::Accepted,
            score_raw: 1.0,
        }
    } else if score == 0.0 {
        CheckerResult {
            verdict: Verdict::WrongAnswer,
            score_raw: 0.0,
        }
    } else {
        CheckerResult {
            verdict: Verdict::Partial,
            score_raw: score,
        }
    }
}

fn parse_score(line: &str) -> f64 {
    match line.trim().parse::<f64>() {
        Ok(score) if score.is_finite() => score.max(0.0).min(1.0),
        _ => 0.0,
    }
}
