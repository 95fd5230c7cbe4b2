//! Exports the [`build_pass`] function which stitches together one full
//! build: ensuring the output root exists and running a synchronization
//! pass over the trees. The watch loop in the binary calls this repeatedly;
//! any error escaping a pass is the caller's to log or to die on.

use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;

use tracing::{debug, info};

use crate::pipeline::Pipeline;
use crate::sync;

/// Runs one full build pass.
pub fn build_pass(pipeline: &Rc<Pipeline>) -> Result<()> {
    let config = &pipeline.config;
    debug!(
        input = %config.input_path.display(),
        output = %config.output_path.display(),
        "starting pass"
    );
    std::fs::create_dir_all(&config.output_path).map_err(|err| Error::OutputRoot {
        path: config.output_path.clone(),
        err,
    })?;
    sync::sync_pass(pipeline)?;
    info!(output = %config.output_path.display(), "pass complete");
    Ok(())
}

/// Represents the result of a build pass.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents an error during a build pass.
#[derive(Debug)]
pub enum Error {
    /// Returned when the output root cannot be created.
    OutputRoot { path: PathBuf, err: std::io::Error },

    /// Returned when the synchronization pass fails.
    Sync(sync::Error),
}

impl fmt::Display for Error {
    /// Implements [`fmt::Display`] for [`Error`].
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::OutputRoot { path, err } => {
                write!(f, "Creating output root '{}': {}", path.display(), err)
            }
            Error::Sync(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    /// Implements [`std::error::Error`] for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::OutputRoot { path: _, err } => Some(err),
            Error::Sync(err) => Some(err),
        }
    }
}

impl From<sync::Error> for Error {
    /// Converts [`sync::Error`]s into [`Error`]. This allows us to use the
    /// `?` operator around the synchronization pass.
    fn from(err: sync::Error) -> Error {
        Error::Sync(err)
    }
}
