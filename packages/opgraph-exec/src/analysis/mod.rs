//! Compile-time analysis passes over a program's instructions.
//!
//! - [`dependency`]: hazard edges (RAW/WAR/WAW) and transitive shrinking
//! - [`stream_analyzer`]: successor classes and cross-context event bindings
//! - [`lifetime`]: static use counts and gc-check lists

pub mod dependency;
pub mod lifetime;
pub mod stream_analyzer;

pub use dependency::DependencyGraph;
pub use stream_analyzer::{classify, event_vars, StreamAnalysis};
