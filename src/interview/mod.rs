pub mod engine;
pub mod questions;
pub mod report;

pub use engine::{EngineConfig, InterviewEngine, InterviewError};
