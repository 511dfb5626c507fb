pub mod submission;
pub mod task;
pub mod verdict;
