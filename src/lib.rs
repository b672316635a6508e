pub mod config;
pub mod corpus;
pub mod error;
pub mod inject;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod style;
pub mod terminology;
pub mod textutil;

pub use error::{GateError, GateResult};
