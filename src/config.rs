use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use which::which;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{name} is not valid: {value:?}")]
    Invalid { name: &'static str, value: String },
    #[error("{0} binary not installed")]
    MissingBinary(&'static str, #[source] which::Error),
}

/// Limits applied to judge-side programs (custom checkers, communicators).
#[derive(Clone, Debug, PartialEq)]
pub struct JudgeLimits {
    pub time_limit_ms: u64,
    pub memory_limit_byte: u64,
}

#[derive(Clone, Debug)]
pub struct JudgeConfig {
    pub isolate_executable_path: PathBuf,
    pub diff_executable_path: PathBuf,
    /// Holds `tasks/`, `outputs/`, `submissions/` and `meta/`
    pub judge_root: PathBuf,
    pub box_id_start: u32,
    pub box_count: u32,
    /// Bound read-only at the same path inside checker and communicator boxes
    pub language_dir: Option<PathBuf>,
    pub wall_time_multiplier: u64,
    pub judge_limits: JudgeLimits,
    /// Used when a task leaves its own run limits empty
    pub default_time_limit_ms: u64,
    pub default_memory_limit_byte: u64,
    pub data_concurrency: usize,
    pub peer_grace_ms: u64,
}

impl JudgeConfig {
    pub fn new(isolate_executable_path: PathBuf, diff_executable_path: PathBuf, judge_root: PathBuf) -> Self {
        JudgeConfig {
            isolate_executable_path,
            diff_executable_path,
            judge_root,
            box_id_start: 0,
            box_count: 16,
            language_dir: None,
            wall_time_multiplier: 3,
            judge_limits: JudgeLimits {
                time_limit_ms: 10_000,
                // 512MiB
                memory_limit_byte: 512 * 1_024 * 1_024,
            },
            default_time_limit_ms: 1_000,
            // 256MiB
            default_memory_limit_byte: 256 * 1_024 * 1_024,
            data_concurrency: 1,
            peer_grace_ms: 1_000,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let isolate_executable_path = match env::var_os("VERDIKTO_ISOLATE") {
            Some(path) => path.into(),
            None => which("isolate").map_err(|e| ConfigError::MissingBinary("isolate", e))?,
        };
        let diff_executable_path = match env::var_os("VERDIKTO_DIFF") {
            Some(path) => path.into(),
            None => which("diff").map_err(|e| ConfigError::MissingBinary("diff", e))?,
        };
        let judge_root = env::var_os("VERDIKTO_JUDGE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./judge"));

        let mut config = JudgeConfig::new(isolate_executable_path, diff_executable_path, judge_root);
        config.language_dir = env::var_os("VERDIKTO_LANG_DIR").map(PathBuf::from);
        config.box_id_start = env_number("VERDIKTO_BOX_START", config.box_id_start)?;
        config.box_count = env_number("VERDIKTO_BOX_COUNT", config.box_count)?;
        config.wall_time_multiplier = env_number("VERDIKTO_WALL_TIME_MULTIPLIER", config.wall_time_multiplier)?;
        config.judge_limits.time_limit_ms = env_number("VERDIKTO_JUDGE_TIME_MS", config.judge_limits.time_limit_ms)?;
        config.judge_limits.memory_limit_byte =
            env_number("VERDIKTO_JUDGE_MEMORY_BYTE", config.judge_limits.memory_limit_byte)?;
        config.default_time_limit_ms = env_number("VERDIKTO_DEFAULT_TIME_MS", config.default_time_limit_ms)?;
        config.default_memory_limit_byte =
            env_number("VERDIKTO_DEFAULT_MEMORY_BYTE", config.default_memory_limit_byte)?;
        config.data_concurrency = env_number("VERDIKTO_DATA_CONCURRENCY", config.data_concurrency)?;
        config.peer_grace_ms = env_number("VERDIKTO_PEER_GRACE_MS", config.peer_grace_ms)?;

        if config.box_count < 2 {
            return Err(ConfigError::Invalid {
                name: "VERDIKTO_BOX_COUNT",
                value: config.box_count.to_string(),
            });
        }
        if config.data_concurrency == 0 || config.wall_time_multiplier == 0 {
            return Err(ConfigError::Invalid {
                name: "VERDIKTO_DATA_CONCURRENCY/VERDIKTO_WALL_TIME_MULTIPLIER",
                value: "0".into(),
            });
        }
        Ok(config)
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.judge_root.join("tasks")
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.judge_root.join("outputs")
    }

    pub fn submissions_dir(&self) -> PathBuf {
        self.judge_root.join("submissions")
    }

    pub fn meta_dir(&self) -> PathBuf {
        self.judge_root.join("meta")
    }
}

fn env_number<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => T::from_str(value.trim()).map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}
