pub mod box_pool;
pub mod checker;
pub mod config;
pub mod evaluation;
pub mod isolate;
pub mod judge;
pub mod judge_files;
pub mod judge_runner;
pub mod language;
pub mod models;
pub mod store;

pub use config::JudgeConfig;
pub use judge::{Judge, JudgeError};
pub use models::verdict::{Verdict, VerdictRecord};
