pub mod engine;
pub mod model;

pub use engine::{ScenarioEngine, ScenarioOutcome};
pub use model::{MasterScenario, Scenario, Step};
