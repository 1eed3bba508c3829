//! Outcome detection for open recommendations and the batch that applies it.

pub mod detector;
pub mod runner;
