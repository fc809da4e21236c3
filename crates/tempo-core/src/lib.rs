//! `tempo-core` — shared foundation for the tempo workspace.
//!
//! Holds the layered configuration (`tempo.toml` + `TEMPO_*` env
//! overrides) and the core error type. Everything scheduling-specific
//! lives in `tempo-scheduler`.

pub mod config;
pub mod error;

pub use config::{ExecutorConfig, SchedulerConfig, TempoConfig};
pub use error::{Result, TempoError};
