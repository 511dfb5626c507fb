//! Runs every datum of a task and folds the outcomes into subtask and task verdicts.

use crate::evaluation::{evaluate_data, EvaluationContext};
use crate::models::task::{Subtask, Task, TaskConfigurationError};
use crate::models::verdict::{DataVerdict, SubtaskVerdict, Verdict};
use futures::{stream, StreamExt, TryStreamExt};
use log::info;

#[derive(Clone, Debug, PartialEq)]
pub struct TaskTotals {
    pub verdict: Verdict,
    pub score_raw: f64,
    pub score_max: f64,
    pub running_time_ms: u64,
    pub running_memory_byte: u64,
}

/// Evaluates all subtasks in stored order.
///
/// Data of one subtask run at most `concurrency` at a time and are reported in stored order;
/// the subtask is aggregated only once all of its data finished.
pub async fn evaluate_task(
    task: &Task,
    context: &EvaluationContext<'_>,
    concurrency: usize,
) -> Result<Vec<SubtaskVerdict>, TaskConfigurationError> {
    let mut subtasks = Vec::with_capacity(task.subtasks.len());
    for subtask in &task.subtasks {
        let data: Vec<DataVerdict> = stream::iter(&subtask.data)
            .map(|datum| async move {
                let result = evaluate_data(task, context, datum).await?;
                Ok::<_, TaskConfigurationError>(DataVerdict {
                    task_data_id: datum.id.clone(),
                    verdict: result.verdict,
                    score_raw: result.score_raw,
                    running_time_ms: result.running_time_ms,
                    running_memory_byte: result.running_memory_byte,
                })
            })
            .buffered(concurrency.max(1))
            .try_collect()
            .await?;

        let verdict = aggregate_subtask(subtask, data);
        info!(
            "Subtask {} of task {}: {} ({}/{})",
            subtask.id, task.id, verdict.verdict, verdict.score_raw, verdict.score_max
        );
        subtasks.push(verdict);
    }
    Ok(subtasks)
}

/// Each datum weighs the same: all data at 1 earn exactly `score_max`.
pub fn aggregate_subtask(subtask: &Subtask, data: Vec<DataVerdict>) -> SubtaskVerdict {
    let verdict = Verdict::worst(data.iter().map(|d| d.verdict)).unwrap_or(Verdict::Skipped);
    let score_raw = if data.is_empty() {
        0.0
    } else {
        let sum: f64 = data.iter().map(|d| d.score_raw).sum();
        subtask.score_max * (sum / data.len() as f64)
    };

    SubtaskVerdict {
        subtask_id: subtask.id.clone(),
        verdict,
        score_raw,
        score_max: subtask.score_max,
        running_time_ms: data.iter().map(|d| d.running_time_ms).max().unwrap_or(0),
        running_memory_byte: data.iter().map(|d| d.running_memory_byte).max().unwrap_or(0),
        data,
    }
}

pub fn aggregate_task(subtasks: &[SubtaskVerdict]) -> TaskTotals {
    let score_raw: f64 = subtasks.iter().map(|s| s.score_raw).sum();
    let score_max: f64 = subtasks.iter().map(|s| s.score_max).sum();
    let mut verdict = Verdict::worst(subtasks.iter().map(|s| s.verdict)).unwrap_or(Verdict::Skipped);
    if verdict.severity() < Verdict::Partial.severity() && score_raw > 0.0 && score_raw < score_max {
        verdict = Verdict::Partial;
    }

    TaskTotals {
        verdict,
        score_raw,
        score_max,
        running_time_ms: subtasks.iter().map(|s| s.running_time_ms).max().unwrap_or(0),
        running_memory_byte: subtasks.iter().map(|s| s.running_memory_byte).max().unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subtask(id: &str, score_max: f64) -> Subtask {
        Subtask {
            id: id.into(),
            score_max,
            data: vec![],
        }
    }

    fn datum(verdict: Verdict, score_raw: f64, running_time_ms: u64) -> DataVerdict {
        DataVerdict {
            task_data_id: format!("d{}", running_time_ms),
            verdict,
            score_raw,
            running_time_ms,
            running_memory_byte: running_time_ms * 1_024,
        }
    }

    #[test]
    fn subtask_score_is_the_mean_of_its_data() {
        let verdict = aggregate_subtask(
            &subtask("s", 100.0),
            vec![
                datum(Verdict::Accepted, 1.0, 10),
                datum(Verdict::Accepted, 1.0, 40),
                datum(Verdict::WrongAnswer, 0.0, 20),
                datum(Verdict::TimeLimitExceeded, 0.0, 30),
            ],
        );
        assert_eq!(verdict.score_raw, 50.0);
        assert_eq!(verdict.verdict, Verdict::WrongAnswer);
        assert_eq!(verdict.running_time_ms, 40);
        assert_eq!(verdict.running_memory_byte, 40 * 1_024);
        assert_eq!(verdict.data.len(), 4);
        assert_eq!(verdict.data[2].task_data_id, "d20");
    }

    #[test]
    fn partial_data_scale_the_subtask() {
        let verdict = aggregate_subtask(
            &subtask("s", 30.0),
            vec![datum(Verdict::Accepted, 1.0, 1), datum(Verdict::Partial, 0.5, 2)],
        );
        assert_eq!(verdict.score_raw, 22.5);
        assert_eq!(verdict.verdict, Verdict::Partial);
    }

    #[test]
    fn empty_subtask_is_skipped() {
        let verdict = aggregate_subtask(&subtask("s", 10.0), vec![]);
        assert_eq!(verdict.verdict, Verdict::Skipped);
        assert_eq!(verdict.score_raw, 0.0);
        assert_eq!(verdict.running_time_ms, 0);
    }

    #[test]
    fn task_takes_the_worst_subtask() {
        let subtasks = vec![
            aggregate_subtask(&subtask("a", 10.0), vec![datum(Verdict::Accepted, 1.0, 5)]),
            aggregate_subtask(&subtask("b", 10.0), vec![datum(Verdict::Partial, 0.5, 7)]),
            aggregate_subtask(&subtask("c", 10.0), vec![datum(Verdict::WrongAnswer, 0.0, 3)]),
        ];
        let totals = aggregate_task(&subtasks);
        assert_eq!(totals.verdict, Verdict::WrongAnswer);
        assert_eq!(totals.score_raw, 15.0);
        assert_eq!(totals.score_max, 30.0);
        assert_eq!(totals.running_time_ms, 7);
    }

    #[test]
    fn partial_is_forced_between_zero_and_max() {
        let subtasks = vec![
            aggregate_subtask(&subtask("a", 10.0), vec![datum(Verdict::Accepted, 1.0, 5)]),
            aggregate_subtask(&subtask("b", 10.0), vec![]),
        ];
        let totals = aggregate_task(&subtasks);
        assert_eq!(totals.verdict, Verdict::Partial);
        assert_eq!(totals.score_raw, 10.0);
    }

    #[test]
    fn full_and_zero_scores_keep_their_verdict() {
        let full = aggregate_task(&[aggregate_subtask(
            &subtask("a", 10.0),
            vec![datum(Verdict::Accepted, 1.0, 5)],
        )]);
        assert_eq!(full.verdict, Verdict::Accepted);
        assert_eq!(full.score_raw, 10.0);

        let none = aggregate_task(&[]);
        assert_eq!(none.verdict, Verdict::Skipped);
        assert_eq!(none.score_raw, 0.0);
    }
}
