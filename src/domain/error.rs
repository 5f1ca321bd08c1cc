use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("task '{task_name}' cannot finish before its deadline (short by {shortfall_minutes} minutes)")]
    Infeasible {
        task_id: String,
        task_name: String,
        shortfall_minutes: i64,
    },
    #[error("task '{task_name}' does not fit inside any working window")]
    Unplaceable { task_id: String, task_name: String },
    #[error("invalid calendar policy: {0}")]
    Configuration(String),
}
