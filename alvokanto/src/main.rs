use async_channel::{Receiver, Sender};
use futures::future::join_all;
use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use thiserror::Error;
use verdikto::config::ConfigError;
use verdikto::judge_files::{DirectoryFileStore, StagingError};
use verdikto::store::JsonStore;
use verdikto::{Judge, JudgeConfig};

type FileJudge = Judge<JsonStore, DirectoryFileStore>;

#[derive(Error, Debug)]
enum WorkerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0} is not a valid worker count")]
    Workers(String),
    #[error(transparent)]
    Staging(#[from] StagingError),
    #[error("no submission ids given")]
    NothingToJudge,
}

fn env_path(name: &str, default: &str) -> PathBuf {
    env::var_os(name).map(PathBuf::from).unwrap_or_else(|| default.into())
}

async fn job_loop(judge: Arc<FileJudge>, receiver: Receiver<String>, failures: Sender<String>) {
    while let Ok(submission_id) = receiver.recv().await {
        log::info!("Got job submission={}", submission_id);
        if judge.judge(&submission_id).await.is_err() && failures.send(submission_id).await.is_err() {
            log::warn!("Failure channel closed");
        }
    }
}

async fn run() -> Result<usize, WorkerError> {
    let submission_ids: Vec<String> = env::args().skip(1).collect();
    if submission_ids.is_empty() {
        return Err(WorkerError::NothingToJudge);
    }

    let config = JudgeConfig::from_env()?;
    log::info!("Found isolate at {:?}", config.isolate_executable_path);
    let workers = match env::var("ALVOKANTO_WORKERS") {
        Ok(value) => match value.trim().parse::<usize>() {
            Ok(workers) if workers > 0 => workers,
            _ => return Err(WorkerError::Workers(value)),
        },
        Err(_) => (config.box_count / 2).max(1) as usize,
    };

    let store = JsonStore::new(env_path("ALVOKANTO_DATA_DIR", "./data"));
    let file_store = DirectoryFileStore::new(env_path("ALVOKANTO_BLOB_DIR", "./blobs"));
    let judge = Arc::new(Judge::new(config, store, file_store));
    judge.prepare().await?;

    let (job_sender, job_receiver) = async_channel::unbounded();
    let (failure_sender, failure_receiver) = async_channel::unbounded();
    for submission_id in submission_ids {
        // Receivers are alive until the workers below finish
        let _ = job_sender.send(submission_id).await;
    }
    job_sender.close();

    log::info!("Starting {} workers", workers);
    let loops: Vec<_> = (0..workers)
        .map(|_| job_loop(judge.clone(), job_receiver.clone(), failure_sender.clone()))
        .collect();
    drop(failure_sender);
    join_all(loops).await;

    let mut failed = 0;
    while let Ok(submission_id) = failure_receiver.try_recv() {
        log::warn!("Submission {} was not judged", submission_id);
        failed += 1;
    }
    Ok(failed)
}

#[tokio::main]
async fn main() {
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    match run().await {
        Ok(0) => {}
        Ok(failed) => {
            log::error!("{} submissions failed", failed);
            process::exit(1);
        }
        Err(e) => {
            log::error!("{}", e);
            process::exit(2);
        }
    }
}
