use crate::domain::error::ScheduleError;
use crate::infrastructure::error::InfraError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("planner state unavailable: {0}")]
    State(String),
}

impl PlannerError {
    /// Short text for a dialog; the error's `Display` keeps the detail for logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::Schedule(ScheduleError::Infeasible {
                task_name,
                shortfall_minutes,
                ..
            }) => format!(
                "\"{task_name}\" cannot be finished before its deadline; {shortfall_minutes} more minutes are needed."
            ),
            Self::Schedule(ScheduleError::Unplaceable { task_name, .. }) => {
                format!("\"{task_name}\" is longer than any working window.")
            }
            Self::Schedule(ScheduleError::Configuration(message)) => {
                format!("Your planner settings need attention: {message}.")
            }
            Self::Infra(_) => "Your planner data could not be saved or loaded.".to_string(),
            Self::InvalidInput(message) => message.clone(),
            Self::State(_) => "The planner is busy or unavailable; please try again.".to_string(),
        }
    }

    pub fn is_infeasible(&self) -> bool {
        matches!(self, Self::Schedule(ScheduleError::Infeasible { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_names_task_and_shortfall() {
        let error = PlannerError::from(ScheduleError::Infeasible {
            task_id: "tsk-1".to_string(),
            task_name: "Essay".to_string(),
            shortfall_minutes: 45,
        });
        assert!(error.is_infeasible());
        let message = error.user_message();
        assert!(message.contains("Essay"));
        assert!(message.contains("45"));
    }

    #[test]
    fn infra_errors_hide_detail_from_user() {
        let error = PlannerError::from(InfraError::InvalidConfig("bad schema".to_string()));
        assert!(!error.user_message().contains("schema"));
        assert!(error.to_string().contains("bad schema"));
    }
}
