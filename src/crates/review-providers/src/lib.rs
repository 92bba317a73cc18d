//! HTTP-backed implementations of the review engine's capability traits
//!
//! The engine itself ships deterministic fallbacks for every capability;
//! this crate adds the production providers that call external model
//! services: [`RemoteReflectionProvider`] for reflection text generation
//! and [`RemoteRiskAnalyzer`] for risk-signal analysis.

pub mod config;
pub mod remote;

pub use config::RemoteProviderConfig;
pub use remote::{RemoteReflectionProvider, RemoteRiskAnalyzer};
