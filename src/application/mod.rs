pub mod bootstrap;
pub mod error;
pub mod feasibility;
pub mod placement;
pub mod planner;
pub mod store;
