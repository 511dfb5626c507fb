use crate::box_pool::{BoxLease, BoxPool, BoxPoolError};
use crate::models::verdict::Verdict;
use log::{debug, info, warn};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str;
use std::str::FromStr;
use thiserror::Error;
use tokio::process::Command;

#[derive(Clone, Debug, PartialEq)]
pub struct CommandTuple {
    pub binary_path: PathBuf,
    pub args: Vec<String>,
}

impl CommandTuple {
    pub fn argv(&self) -> Vec<String> {
        let mut argv = vec![self.binary_path.to_string_lossy().into_owned()];
        argv.extend(self.args.iter().cloned());
        argv
    }
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("couldn't get command output")]
    CommandIo(#[source] io::Error),
    #[error("couldn't read meta file {path:?}")]
    MetaIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("couldn't open {path:?} for a standard stream")]
    StreamIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed meta file: {0}")]
    MalformedMeta(String),
    #[error("{0}")]
    IsolateCommandFailed(String),
    #[error(transparent)]
    BoxPool(#[from] BoxPoolError),
    #[error(transparent)]
    Utf8(#[from] str::Utf8Error),
}

/// One initialized box, valid until the surrounding `with_box` call returns.
#[derive(Clone, Debug)]
pub struct IsolateBox {
    pub id: u32,
    pub path: PathBuf,
    pub meta_path: PathBuf,
}

/// A host directory made visible inside the box.
#[derive(Clone, Debug, PartialEq)]
pub struct DirBinding {
    pub inside: String,
    pub outside: PathBuf,
    pub read_write: bool,
}

impl DirBinding {
    pub fn read_only(inside: &str, outside: &Path) -> Self {
        DirBinding {
            inside: inside.into(),
            outside: outside.into(),
            read_write: false,
        }
    }

    pub fn read_write(inside: &str, outside: &Path) -> Self {
        DirBinding {
            inside: inside.into(),
            outside: outside.into(),
            read_write: true,
        }
    }

    fn to_arg(&self) -> String {
        format!(
            "--dir={}={}{}",
            self.inside,
            self.outside.display(),
            if self.read_write { ":rw" } else { "" }
        )
    }
}

#[derive(Clone, Debug)]
pub struct RunParams<'a> {
    pub command: &'a CommandTuple,
    pub dirs: Vec<DirBinding>,
    pub chdir: Option<&'a str>,
    pub time_limit_ms: u64,
    pub memory_limit_byte: u64,
    pub process_limit: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IsolateResult {
    pub verdict: Verdict,
    pub running_time_ms: u64,
    pub running_wall_time_ms: u64,
    pub running_memory_byte: u64,
    pub exit_code: Option<i32>,
    pub exit_signal: Option<i32>,
    pub message: Option<String>,
}

pub struct Isolate {
    isolate_executable_path: PathBuf,
    meta_dir: PathBuf,
    wall_time_multiplier: u64,
    pool: BoxPool,
}

impl Isolate {
    pub fn new(
        isolate_executable_path: PathBuf,
        meta_dir: PathBuf,
        wall_time_multiplier: u64,
        pool: BoxPool,
    ) -> Self {
        Isolate {
            isolate_executable_path,
            meta_dir,
            wall_time_multiplier,
            pool,
        }
    }

    pub fn pool(&self) -> &BoxPool {
        &self.pool
    }

    /// Runs `f` with one freshly initialized box.
    ///
    /// The box is cleaned up after `f` completes and its id goes back to the pool on every
    /// path, including when `f` panics or the returned future is dropped.
    pub async fn with_box<F, Fut, T>(&self, f: F) -> Result<T, CommandError>
    where
        F: FnOnce(IsolateBox) -> Fut,
        Fut: Future<Output = T>,
    {
        let lease = self.pool.acquire().await?;
        let isolate_box = self.init_box(&lease).await?;
        let output = f(isolate_box.clone()).await;
        self.release_box(&isolate_box).await;
        drop(lease);
        Ok(output)
    }

    /// Same as [`Isolate::with_box`] with two boxes, both released only after `f` completes.
    pub async fn with_two_boxes<F, Fut, T>(&self, f: F) -> Result<T, CommandError>
    where
        F: FnOnce(IsolateBox, IsolateBox) -> Fut,
        Fut: Future<Output = T>,
    {
        let (first_lease, second_lease) = self.pool.acquire_pair().await?;
        let first = self.init_box(&first_lease).await?;
        let second = match self.init_box(&second_lease).await {
            Ok(second) => second,
            Err(e) => {
                self.release_box(&first).await;
                return Err(e);
            }
        };
        let output = f(first.clone(), second.clone()).await;
        futures::join!(self.release_box(&first), self.release_box(&second));
        drop((first_lease, second_lease));
        Ok(output)
    }

    async fn init_box(&self, lease: &BoxLease) -> Result<IsolateBox, CommandError> {
        let id = lease.id();
        // A previous run may have died without cleaning up
        self.cleanup_box(id).await?;

        let output = Command::new(&self.isolate_executable_path)
            .arg(format!("--box-id={}", id))
            .arg("--cg")
            .arg("--init")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(CommandError::CommandIo)?;

        if !output.status.success() {
            return Err(CommandError::IsolateCommandFailed(
                String::from_utf8_lossy(&output.stderr).into(),
            ));
        }

        let meta_path = self.meta_dir.join(format!("box-{}.meta", id));
        match tokio::fs::remove_file(&meta_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(CommandError::MetaIo { path: meta_path, source: e }),
        }

        let path = PathBuf::from(str::from_utf8(&output.stdout)?.trim_end()).join("box");
        debug!("Initialized box {} at {:?}", id, path);
        Ok(IsolateBox {
            id,
            path,
            meta_path,
        })
    }

    async fn release_box(&self, isolate_box: &IsolateBox) {
        match self.cleanup_box(isolate_box.id).await {
            Ok(true) => {}
            Ok(false) => warn!("isolate --cleanup reported failure for box {}", isolate_box.id),
            Err(e) => warn!("Couldn't clean up box {}: {}", isolate_box.id, e),
        }
    }

    pub async fn cleanup_box(&self, box_id: u32) -> Result<bool, CommandError> {
        Ok(Command::new(&self.isolate_executable_path)
            .arg(format!("--box-id={}", box_id))
            .arg("--cg")
            .arg("--cleanup")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(CommandError::CommandIo)?
            .status
            .success())
    }

    pub fn wall_time_limit_ms(&self, time_limit_ms: u64) -> u64 {
        time_limit_ms.saturating_mul(self.wall_time_multiplier)
    }

    pub fn build_argv(&self, isolate_box: &IsolateBox, params: &RunParams) -> Vec<String> {
        let mut argv = vec![format!("--box-id={}", isolate_box.id), "--cg".into()];
        argv.extend(params.dirs.iter().map(DirBinding::to_arg));
        if let Some(chdir) = params.chdir {
            argv.push(format!("--chdir={}", chdir));
        }
        argv.push(format!("--meta={}", isolate_box.meta_path.display()));
        argv.push(format!("--time={}", format_seconds(params.time_limit_ms)));
        argv.push(format!(
            "--wall-time={}",
            format_seconds(self.wall_time_limit_ms(params.time_limit_ms))
        ));
        // isolate takes KiB
        argv.push(format!("--cg-mem={}", params.memory_limit_byte.saturating_add(1_023) / 1_024));
        argv.push(format!("--processes={}", params.process_limit));
        argv.push("--run".into());
        argv.push("--".into());
        argv.extend(params.command.argv());
        argv
    }

    /// The isolate invocation for `params`; standard streams are left for the caller to wire.
    pub fn command(&self, isolate_box: &IsolateBox, params: &RunParams) -> Command {
        let argv = self.build_argv(isolate_box, params);
        info!("Running in box {}: {:?}", isolate_box.id, params.command);
        debug!("isolate {:?}", argv);
        let mut command = Command::new(&self.isolate_executable_path);
        command.args(argv).kill_on_drop(true);
        command
    }

    pub async fn read_result(&self, isolate_box: &IsolateBox) -> Result<IsolateResult, CommandError> {
        let meta = tokio::fs::read_to_string(&isolate_box.meta_path)
            .await
            .map_err(|source| CommandError::MetaIo {
                path: isolate_box.meta_path.clone(),
                source,
            })?;
        parse_meta(&meta)
    }
}

/// Logs isolate's own exit status, 0 and 1 are the normal outcomes for a finished run.
pub fn log_isolate_status(box_id: u32, status: std::process::ExitStatus) {
    match status.code() {
        Some(0) | Some(1) => {}
        Some(c) => warn!("isolate exited with {} for box {}", c, box_id),
        None => warn!("isolate was killed by a signal for box {}", box_id),
    }
}

pub fn format_seconds(ms: u64) -> String {
    format!("{}.{:03}", ms / 1000, ms % 1000)
}

fn parse_ms(value: &str) -> Result<u64, CommandError> {
    let seconds = f64::from_str(value)
        .map_err(|_| CommandError::MalformedMeta(format!("bad time value {:?}", value)))?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(CommandError::MalformedMeta(format!("bad time value {:?}", value)));
    }
    Ok((seconds * 1000.0).round() as u64)
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, CommandError> {
    T::from_str(value).map_err(|_| CommandError::MalformedMeta(format!("bad {} value {:?}", key, value)))
}

/// Parses isolate's `key:value` meta file into an [`IsolateResult`].
pub fn parse_meta(meta: &str) -> Result<IsolateResult, CommandError> {
    let mut result = IsolateResult {
        verdict: Verdict::Accepted,
        running_time_ms: 0,
        running_wall_time_ms: 0,
        running_memory_byte: 0,
        exit_code: None,
        exit_signal: None,
        message: None,
    };
    let mut status: Option<&str> = None;
    let mut oom_killed = false;
    let mut cg_mem_kib: Option<u64> = None;
    let mut max_rss_kib: Option<u64> = None;

    for line in meta.lines().filter(|line| !line.trim().is_empty()) {
        let colon_index = line
            .find(':')
            .ok_or_else(|| CommandError::MalformedMeta(format!("line without key {:?}", line)))?;
        let key = &line[..colon_index];
        let value = line[colon_index + 1..].trim();

        match key {
            "time" => result.running_time_ms = parse_ms(value)?,
            "time-wall" => result.running_wall_time_ms = parse_ms(value)?,
            "cg-mem" => cg_mem_kib = Some(parse_number(key, value)?),
            "max-rss" => max_rss_kib = Some(parse_number(key, value)?),
            "cg-oom-killed" => oom_killed = true,
            "exitcode" => result.exit_code = Some(parse_number(key, value)?),
            "exitsig" => result.exit_signal = Some(parse_number(key, value)?),
            "message" => result.message = Some(value.into()),
            "status" => status = Some(value),
            _ => {}
        }
    }

    let memory_kib = cg_mem_kib.or(max_rss_kib).unwrap_or(0);
    result.running_memory_byte = memory_kib
        .checked_mul(1_024)
        .ok_or_else(|| CommandError::MalformedMeta(format!("memory usage {} KiB overflows", memory_kib)))?;
    result.verdict = match status {
        None if oom_killed => Verdict::MemoryLimitExceeded,
        None => Verdict::Accepted,
        Some("RE") | Some("SG") if oom_killed => Verdict::MemoryLimitExceeded,
        Some("RE") | Some("SG") => Verdict::RuntimeError,
        Some("TO") => Verdict::TimeLimitExceeded,
        Some("XX") => Verdict::JudgeFailed,
        Some(other) => {
            return Err(CommandError::MalformedMeta(format!("unknown status {:?}", other)));
        }
    };

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn isolate() -> Isolate {
        Isolate::new("/usr/bin/isolate".into(), "/var/judge/meta".into(), 3, BoxPool::new(0..4))
    }

    fn isolate_box() -> IsolateBox {
        IsolateBox {
            id: 7,
            path: "/var/local/lib/isolate/7/box".into(),
            meta_path: "/var/judge/meta/box-7.meta".into(),
        }
    }

    #[test]
    fn accepted_run() {
        let result = parse_meta("time:0.012\ntime-wall:0.030\nmax-rss:3072\nexitcode:0\n").unwrap();
        assert_eq!(result.verdict, Verdict::Accepted);
        assert_eq!(result.running_time_ms, 12);
        assert_eq!(result.running_wall_time_ms, 30);
        assert_eq!(result.running_memory_byte, 3072 * 1024);
        assert_eq!(result.exit_code, Some(0));
    }

    #[test]
    fn short_fractions_are_not_misread() {
        let result = parse_meta("time:1.5\ntime-wall:2.25\n").unwrap();
        assert_eq!(result.running_time_ms, 1500);
        assert_eq!(result.running_wall_time_ms, 2250);
    }

    #[test]
    fn non_zero_exit_is_runtime_error() {
        let result = parse_meta("status:RE\nexitcode:3\nmessage:Exited with error status 3\n").unwrap();
        assert_eq!(result.verdict, Verdict::RuntimeError);
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.message.as_deref(), Some("Exited with error status 3"));
    }

    #[test]
    fn status_mapping() {
        assert_eq!(parse_meta("status:TO\nkilled:1\n").unwrap().verdict, Verdict::TimeLimitExceeded);
        assert_eq!(parse_meta("status:SG\nexitsig:11\n").unwrap().verdict, Verdict::RuntimeError);
        assert_eq!(
            parse_meta("status:SG\nexitsig:9\ncg-oom-killed:1\n").unwrap().verdict,
            Verdict::MemoryLimitExceeded
        );
        assert_eq!(parse_meta("status:XX\nmessage:internal error\n").unwrap().verdict, Verdict::JudgeFailed);
    }

    #[test]
    fn cgroup_memory_wins_over_rss() {
        let result = parse_meta("max-rss:100\ncg-mem:200\n").unwrap();
        assert_eq!(result.running_memory_byte, 200 * 1024);
    }

    #[test]
    fn malformed_meta_is_an_error() {
        assert!(matches!(parse_meta("garbage"), Err(CommandError::MalformedMeta(_))));
        assert!(matches!(parse_meta("time:soon\n"), Err(CommandError::MalformedMeta(_))));
        assert!(matches!(parse_meta("status:ZZ\n"), Err(CommandError::MalformedMeta(_))));
        assert!(matches!(
            parse_meta(&format!("cg-mem:{}\n", u64::MAX)),
            Err(CommandError::MalformedMeta(_))
        ));
    }

    #[test]
    fn seconds_formatting() {
        assert_eq!(format_seconds(2500), "2.500");
        assert_eq!(format_seconds(7), "0.007");
    }

    #[test]
    fn argv_layout() {
        let command = CommandTuple {
            binary_path: "/usr/bin/python3".into(),
            args: vec!["checker.py".into(), "/task/1.in".into()],
        };
        let params = RunParams {
            command: &command,
            dirs: vec![
                DirBinding::read_only("/task", Path::new("/var/judge/tasks/t")),
                DirBinding::read_write("/output", Path::new("/var/judge/outputs/o")),
            ],
            chdir: Some("/task"),
            time_limit_ms: 1500,
            memory_limit_byte: 1_000_000,
            process_limit: 1,
        };

        let argv = isolate().build_argv(&isolate_box(), &params);
        assert_eq!(
            argv,
            vec![
                "--box-id=7",
                "--cg",
                "--dir=/task=/var/judge/tasks/t",
                "--dir=/output=/var/judge/outputs/o:rw",
                "--chdir=/task",
                "--meta=/var/judge/meta/box-7.meta",
                "--time=1.500",
                "--wall-time=4.500",
                "--cg-mem=977",
                "--processes=1",
                "--run",
                "--",
                "/usr/bin/python3",
                "checker.py",
                "/task/1.in",
            ]
        );
    }
}
