pub mod plan_manager;

pub use plan_manager::{PlanLevels, PlanManager};
