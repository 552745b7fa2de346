use std::path::PathBuf;

use thiserror::Error;

use crate::value::Kind;

/// Boxed error used for pass-through failures raised by parsers and notifiers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T, E = LayerfigError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum LayerfigError {
    #[error("Destination must serialize as a struct, got {found}")]
    InvalidDestination { found: String },

    #[error("Invalid conversion for '{key}': {from} > {to}")]
    InvalidConversion { key: String, from: Kind, to: Kind },

    #[error("Could not assign {value} to '{key}': {reason}")]
    Assign {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Map at '{key}' must have string keys")]
    InvalidKeyType { key: String },

    #[error("{}", render_close(.0))]
    Close(Vec<LayerfigError>),

    #[error("Parser error: {0}")]
    Parser(#[source] BoxError),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl LayerfigError {
    /// Wrap a collaborator's error so it passes through unchanged.
    pub fn parser(err: impl Into<BoxError>) -> Self {
        LayerfigError::Parser(err.into())
    }
}

fn render_close(errors: &[LayerfigError]) -> String {
    let points: Vec<String> = errors.iter().map(|e| format!("* {e}")).collect();
    format!(
        "{} errors occurred while closing notifiers:\n\t{}",
        errors.len(),
        points.join("\n\t")
    )
}

/// Unwrap `result`, panicking on error.
///
/// Intended for small programs where a configuration failure should abort.
/// Library code never calls this.
pub fn must<T>(result: Result<T>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => panic!("layerfig: {e}"),
    }
}
