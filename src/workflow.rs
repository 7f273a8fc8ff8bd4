//! Generate job specifications from project configurations
//!
//! Produces the files the engine needs (workflow description, parameter document, options
//! document) in the project's working directory.

use std::error::Error;
use std::fmt;

/// Write the rendered job files and load them for submission
pub mod job;
/// Typed parameter builders, one per category
pub mod inputs;
/// Link uploaded files into the project under their display names
pub mod materialize;
/// Input size probing for admission control
pub mod input_size;

#[derive(Debug)]
pub enum GenerationError {
    /// One message per referenced file that doesn't exist
    MissingInputs(Vec<String>),
    /// The configuration can't produce a runnable job
    Invalid(String),
    Io(anyhow::Error),
}

impl GenerationError {
    /// Lines for the project log, missing files get one line each
    pub fn log_lines(&self) -> Vec<String> {
        match self {
            GenerationError::MissingInputs(missing) => missing.clone(),
            other => vec![other.to_string()],
        }
    }
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            GenerationError::MissingInputs(missing) => write!(f, "{} input file(s) not found", missing.len()),
            GenerationError::Invalid(message) => write!(f, "{message}"),
            GenerationError::Io(err) => write!(f, "{err:#}"),
        }
    }
}

impl Error for GenerationError {}

impl From<anyhow::Error> for GenerationError {
    fn from(err: anyhow::Error) -> Self {
        GenerationError::Io(err)
    }
}
