//! Interactive evaluation: the contestant and the communicator talk over a pair of pipes.

use super::{ContestantRun, EvaluationContext, EvaluationResult};
use crate::checker::{check_submission_output, checker_dirs, script_command, CheckerFiles};
use crate::isolate::{log_isolate_status, CommandError, IsolateBox, IsolateResult, RunParams};
use crate::models::task::{RunLimits, Script, Task, TaskConfigurationError, TaskData};
use crate::models::verdict::Verdict;
use log::{debug, error, info, warn};
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

type RunOutcome = Result<IsolateResult, CommandError>;

/// What to do with a finished pair of runs.
#[derive(Debug, PartialEq)]
pub enum Decision {
    Done(EvaluationResult),
    /// The contestant finished cleanly, its answer still needs grading
    Check(IsolateResult),
}

pub async fn evaluate_communication(
    task: &Task,
    limits: &RunLimits,
    communicator: &Script,
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
    let files = CheckerFiles {
        task_root: context.task_root,
        input_file_name: Some(input_file_name),
        judge_file_name: &data.judge_file.file_name,
        output_root: context.output_root,
        output_file_name: &data.judge_file.file_name,
    };
    let env = context.checker_env(task);
    let (communicator_command, communicator_limits, communicator_processes) =
        script_command(&env, communicator, &files)?;
    let communicator_dirs = checker_dirs(context.config, context.task_root, context.output_root, true);
    let grace = Duration::from_millis(context.config.peer_grace_ms);

    let outcome = context
        .isolate
        .with_two_boxes(|contestant_box: IsolateBox, communicator_box: IsolateBox| async move {
            let communicator_params = RunParams {
                command: &communicator_command,
                dirs: communicator_dirs,
                chdir: Some("/task"),
                time_limit_ms: communicator_limits.time_limit_ms,
                memory_limit_byte: communicator_limits.memory_limit_byte,
                process_limit: communicator_processes,
            };
            run_pair(
                context,
                &contestant_box,
                &run.params(),
                &communicator_box,
                &communicator_params,
                grace,
            )
            .await
        })
        .await;

    let decision = match outcome {
        Ok((contestant, communicator)) => communication_decision(contestant, communicator),
        Err(e) => {
            error!("Couldn't get boxes for data {}: {}", data.id, e);
            Decision::Done(EvaluationResult::ungraded(Verdict::JudgeFailed, None))
        }
    };

    // Both boxes are back in the pool by now, the checker may need one of them
    match decision {
        Decision::Done(result) => {
            info!("Data {} ended with {}", data.id, result.verdict);
            Ok(result)
        }
        Decision::Check(contestant) => {
            let checked = check_submission_output(&env, &task.checker, &files).await?;
            Ok(EvaluationResult::graded(checked, Some(&contestant)))
        }
    }
}

/// Derives the datum's outcome from both runs; time and memory are always the contestant's.
pub fn communication_decision(contestant: RunOutcome, communicator: RunOutcome) -> Decision {
    let contestant_run = contestant.as_ref().ok();
    match &communicator {
        Ok(result) if result.verdict == Verdict::Accepted => {}
        Ok(result) => {
            warn!("Communicator ended with {}: {:?}", result.verdict, result.message);
            return Decision::Done(EvaluationResult::ungraded(Verdict::JudgeFailed, contestant_run));
        }
        Err(e) => {
            error!("Couldn't read communicator result: {}", e);
            return Decision::Done(EvaluationResult::ungraded(Verdict::JudgeFailed, contestant_run));
        }
    }

    match contestant {
        Ok(result) if result.verdict == Verdict::Accepted => Decision::Check(result),
        Ok(result) => Decision::Done(EvaluationResult::ungraded(result.verdict, Some(&result))),
        Err(e) => {
            error!("Couldn't read contestant result: {}", e);
            Decision::Done(EvaluationResult::ungraded(Verdict::JudgeFailed, None))
        }
    }
}

fn spawn_piped(mut command: Command, stderr: Stdio) -> io::Result<Child> {
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(stderr)
        .spawn()
}

async fn run_pair(
    context: &EvaluationContext<'_>,
    contestant_box: &IsolateBox,
    contestant_params: &RunParams<'_>,
    communicator_box: &IsolateBox,
    communicator_params: &RunParams<'_>,
    grace: Duration,
) -> (RunOutcome, RunOutcome) {
    let isolate = context.isolate;
    let started = Instant::now();
    let not_started = || -> RunOutcome { Err(CommandError::IsolateCommandFailed("peer was not started".into())) };

    let mut contestant = match spawn_piped(isolate.command(contestant_box, contestant_params), Stdio::null()) {
        Ok(child) => child,
        Err(e) => return (Err(CommandError::CommandIo(e)), not_started()),
    };
    let mut communicator =
        match spawn_piped(isolate.command(communicator_box, communicator_params), Stdio::inherit()) {
            Ok(child) => child,
            Err(e) => {
                stop(&mut contestant, "contestant").await;
                return (not_started(), Err(CommandError::CommandIo(e)));
            }
        };

    let pipes = (
        contestant.stdout.take(),
        communicator.stdin.take(),
        communicator.stdout.take(),
        contestant.stdin.take(),
    );
    let pumps = match pipes {
        (Some(contestant_out), Some(communicator_in), Some(communicator_out), Some(contestant_in)) => [
            tokio::spawn(pump(contestant_out, communicator_in, "contestant -> communicator")),
            tokio::spawn(pump(communicator_out, contestant_in, "communicator -> contestant")),
        ],
        _ => {
            futures::join!(stop(&mut contestant, "contestant"), stop(&mut communicator, "communicator"));
            let missing = || -> RunOutcome {
                Err(CommandError::IsolateCommandFailed("standard streams were not piped".into()))
            };
            return (missing(), missing());
        }
    };

    let (contestant_exit, communicator_exit) = wait_pair(&mut contestant, &mut communicator, grace, started).await;
    for handle in pumps {
        finish_pump(handle, grace).await;
    }

    let killed_after = contestant_exit.killed_after;
    let (contestant_result, communicator_result) = futures::join!(
        collect_result(context, contestant_box, contestant_exit.status),
        collect_result(context, communicator_box, communicator_exit.status)
    );
    (outlived_peer(contestant_result, killed_after), communicator_result)
}

async fn collect_result(
    context: &EvaluationContext<'_>,
    isolate_box: &IsolateBox,
    status: io::Result<ExitStatus>,
) -> RunOutcome {
    let status = status.map_err(CommandError::CommandIo)?;
    log_isolate_status(isolate_box.id, status);
    context.isolate.read_result(isolate_box).await
}

/// A contestant still running once the communicator is done has run out of time.
///
/// Killing isolate leaves no meta file behind, so the time spent until the kill stands in.
pub fn outlived_peer(result: RunOutcome, killed_after: Option<Duration>) -> RunOutcome {
    let elapsed = match killed_after {
        Some(elapsed) => elapsed,
        None => return result,
    };
    match result {
        Ok(run) if run.verdict != Verdict::Accepted => Ok(run),
        Ok(run) => Ok(IsolateResult {
            verdict: Verdict::TimeLimitExceeded,
            ..run
        }),
        Err(e) => {
            debug!("No result for the killed contestant: {}", e);
            let elapsed_ms = elapsed.as_millis() as u64;
            Ok(IsolateResult {
                verdict: Verdict::TimeLimitExceeded,
                running_time_ms: elapsed_ms,
                running_wall_time_ms: elapsed_ms,
                running_memory_byte: 0,
                exit_code: None,
                exit_signal: None,
                message: Some("killed after the communicator exited".into()),
            })
        }
    }
}

async fn pump<R, W>(mut from: R, mut to: W, direction: &'static str)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match tokio::io::copy(&mut from, &mut to).await {
        Ok(bytes) => debug!("Forwarded {} bytes {}", bytes, direction),
        // The reader went away first, nothing left to deliver
        Err(e) => debug!("Stopped forwarding {}: {}", direction, e),
    }
    if let Err(e) = to.shutdown().await {
        debug!("Couldn't close {}: {}", direction, e);
    }
}

async fn finish_pump(mut handle: JoinHandle<()>, grace: Duration) {
    if tokio::time::timeout(grace, &mut handle).await.is_err() {
        warn!("A pipe stayed open after both runs ended");
        handle.abort();
    }
}

#[derive(Debug)]
struct PeerExit {
    status: io::Result<ExitStatus>,
    /// Time since the pair started, set when the run had to be killed
    killed_after: Option<Duration>,
}

impl PeerExit {
    fn exited(status: io::Result<ExitStatus>) -> Self {
        PeerExit {
            status,
            killed_after: None,
        }
    }
}

/// Waits for the first exit, then gives the other side `grace` to wind down before killing it.
async fn wait_pair(
    contestant: &mut Child,
    communicator: &mut Child,
    grace: Duration,
    started: Instant,
) -> (PeerExit, PeerExit) {
    tokio::select! {
        status = contestant.wait() => {
            debug!("Contestant exited first");
            (PeerExit::exited(status), stop_after(communicator, "communicator", grace, started).await)
        }
        status = communicator.wait() => {
            debug!("Communicator exited first");
            (stop_after(contestant, "contestant", grace, started).await, PeerExit::exited(status))
        }
    }
}

async fn stop_after(peer: &mut Child, role: &str, grace: Duration, started: Instant) -> PeerExit {
    if let Ok(status) = tokio::time::timeout(grace, peer.wait()).await {
        return PeerExit::exited(status);
    }
    let killed_after = started.elapsed();
    warn!("The {} outlived its peer by {:?}, killing it", role, grace);
    let status = match peer.start_kill() {
        Ok(()) => peer.wait().await,
        Err(e) => Err(e),
    };
    PeerExit {
        status,
        killed_after: Some(killed_after),
    }
}

async fn stop(child: &mut Child, role: &str) {
    if let Err(e) = child.start_kill() {
        warn!("Couldn't kill the {}: {}", role, e);
    }
    if let Err(e) = child.wait().await {
        warn!("Couldn't wait for the {}: {}", role, e);
    }
}
