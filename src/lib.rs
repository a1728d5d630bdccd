//! Airfuse: Air-Pollution Fusion and Analysis Library
//!
//! Reconciles country identifiers across pollution, city and development
//! indicator sources, fuses them into one per-country table with derived
//! features and a quality score, and runs correlation, PCA, similarity-graph
//! and predictive-modeling analyses over it.

pub mod cli;
pub mod pipeline;
pub mod report;
pub mod utils;
