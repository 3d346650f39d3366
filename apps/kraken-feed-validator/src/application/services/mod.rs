//! Application Services
//!
//! Services that drive a session end to end.
//!
//! - `ScenarioSuite`: named validation scenarios with pass/fail verdicts

pub mod scenarios;

pub use scenarios::{Scenario, ScenarioReport, ScenarioSuite, UnknownScenario, Verdict};
