//! Report module - result tables, JSON report, zip bundle and terminal summary

pub mod bundle;
pub mod export;
pub mod summary;

pub use bundle::*;
pub use export::*;
pub use summary::*;
