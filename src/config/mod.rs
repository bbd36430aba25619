//! Run input and backend configuration.

pub mod ai;
pub mod input;

pub use ai::AiConfig;
pub use input::{parse_date_range, RunInput, RunPlan};
