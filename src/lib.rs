//! The library code for the `writan` static-content build tool. `writan`
//! mirrors an input directory tree into an output tree, executing an
//! embedded script language inside eligible text files before writing them
//! out. A build pass can generally be broken down into two distinct steps:
//!
//! 1. Rendering each transformable file through the template pipeline
//!    ([`crate::pipeline`])
//! 2. Reconciling the output tree against the input tree
//!    ([`crate::sync`])
//!
//! Of the two, the first is the more involved. It is itself composed of
//! four sub-steps, applied per file:
//!
//! 1. Tokenizing the source into literal and code regions
//!    ([`crate::token`]) and compiling them into a program in the embedded
//!    language ([`crate::compile`])
//! 2. Populating the file's evaluation context through the extender
//!    pipeline ([`crate::extend`]): metadata, helpers, the recursive
//!    `render` include primitive, the feed writer
//! 3. Interpreting the program against the context ([`crate::eval`]),
//!    which may recursively re-enter the pipeline via `render`
//! 4. Post-processing the evaluated output through the transformer
//!    pipeline ([`crate::transform`]), which may rewrite the destination
//!    file name
//!
//! The second step is a lock-step walk of both trees: stale output entries
//! are deleted, transformable files are recomputed unconditionally, static
//! files are copied when missing or out of date, and emptied output
//! directories are pruned. The orchestrator ([`crate::build`]) owns one
//! pass; the binary wires it to a filesystem watcher for rebuild-on-change.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]

pub mod build;
pub mod compile;
pub mod config;
pub mod eval;
pub mod extend;
pub mod feed;
pub mod markdown;
pub mod pipeline;
pub mod script;
pub mod sync;
pub mod token;
pub mod transform;
pub mod value;
