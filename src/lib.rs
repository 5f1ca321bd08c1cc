//! Deadline-driven day planning.
//!
//! Movable tasks are placed earliest-deadline-first inside per-day working
//! windows, around fixed events, then meals and breaks are filled in. Every
//! mutation goes through [`Planner`], which recomputes the whole schedule and
//! commits it only when every deadline can be met.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::error::PlannerError;
pub use application::feasibility::{check_feasible, Feasibility};
pub use application::placement::{PlacementEngine, PlacementOutcome};
pub use application::planner::{BlockEdit, ClearSpan, Edge, NowProvider, Planner};
pub use application::store::BlockStore;
pub use domain::error::ScheduleError;
pub use domain::models::{
    Block, BlockKind, Completion, FixedEvent, Generated, Priority, TaskDetails, TimeSlot,
};
pub use domain::policy::{CalendarPolicy, HolidayRange, MealWindow, WorkWindow};
pub use domain::templates::{BlockTemplate, TemplateBook, TemplateKind, TemplateOverrides};
pub use infrastructure::block_repository::{
    BlockRepository, InMemoryBlockRepository, SqliteBlockRepository,
};
pub use infrastructure::error::InfraError;

use std::path::PathBuf;

/// Opens the planner workspace at `root`, or in the current directory.
pub fn open_workspace(
    root: Option<PathBuf>,
) -> Result<Planner<SqliteBlockRepository>, PlannerError> {
    let workspace_root = match root {
        Some(path) => path,
        None => std::env::current_dir().map_err(InfraError::from)?,
    };
    Planner::open(&workspace_root)
}
