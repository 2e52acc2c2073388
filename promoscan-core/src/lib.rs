//! Promoter-centered motif profiling.
//!
//! Genes are anchored at one transcription start site each, re-anchored at
//! the coordinate most accessibility peaks agree on, and then profiled with
//! position weight matrices over a fixed window around that anchor. Profiles
//! of a gene set can be compared against resampled background genes.
pub mod bed;
pub mod compare;
pub mod config;
pub mod genome;
pub mod motif;
pub mod peak;
pub mod pipeline;
pub mod profile;
pub mod sequence;
pub mod task;
pub mod tss;
pub mod utils;

pub use config::PipelineConfig;
pub use pipeline::{Layout, Pipeline, RunInputs};
