//! Result types shared by providers, the pipeline and the state manager

mod types;

pub use types::*;
