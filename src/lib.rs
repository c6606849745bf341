pub mod domain;
pub mod engine;
pub mod gateway;
pub mod ingestion;
pub mod notify;
pub mod store;
pub mod webhook;

pub use domain::Error;
pub use engine::{Engine, FundingOutcome};
