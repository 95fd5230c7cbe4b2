//! The transformer pipeline: ordered post-processors applied to a file's
//! evaluated output. Each transformer inspects the context's paths to
//! decide whether it applies and is a safe no-op otherwise; it may rewrite
//! the destination's file name or extension, never its directory. The
//! synchronizer writes to the post-pipeline destination.

use std::ffi::OsStr;
use std::fmt;

use crate::config::Config;
use crate::eval::{self, Context};
use crate::markdown;

/// A registered output transformer.
pub trait Transform {
    fn transform(&self, config: &Config, ctx: &mut Context, output: String) -> Result<String>;
}

/// The default transformer list, in registration order.
pub fn defaults() -> Vec<Box<dyn Transform>> {
    vec![Box::new(Markdown)]
}

const MARKDOWN_EXTENSION: &str = "md";
const HTML_EXTENSION: &str = "html";

/// Converts the evaluated output of markdown sources to HTML and rewrites
/// the destination extension accordingly.
pub struct Markdown;

impl Transform for Markdown {
    fn transform(&self, _config: &Config, ctx: &mut Context, output: String) -> Result<String> {
        let input_path = ctx.input_path()?;
        if input_path.extension().and_then(OsStr::to_str) != Some(MARKDOWN_EXTENSION) {
            return Ok(output);
        }
        let output_path = ctx.output_path()?;
        ctx.set_output_path(&output_path.with_extension(HTML_EXTENSION));
        Ok(markdown::to_html(&output))
    }
}

/// Represents the result of a transform operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents an error applying a transformer.
#[derive(Debug)]
pub enum Error {
    /// Returned when a transformer cannot read or rewrite the context's
    /// path keys.
    Eval(eval::Error),
}

impl fmt::Display for Error {
    /// Displays an [`Error`] as human-readable text.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Eval(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    /// Implements the [`std::error::Error`] trait for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Eval(err) => Some(err),
        }
    }
}

impl From<eval::Error> for Error {
    /// Converts an [`eval::Error`] into an [`Error`]. This allows us to use
    /// the `?` operator for context-key access.
    fn from(err: eval::Error) -> Error {
        Error::Eval(err)
    }
}
