//! The context extender pipeline. Extenders run once per file, in
//! registration order, before interpretation; later extenders may override
//! keys set by earlier ones. The default set provides directory helpers,
//! the metadata loader and recursive collector, the module loader, the
//! recursive render primitive, and the feed writer.
//!
//! Builtins read the current file's paths from the context at call time, so
//! a function inherited by a derived context still resolves against the
//! include's own directories.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use walkdir::WalkDir;

use crate::compile::Program;
use crate::eval::{self, Context};
use crate::feed;
use crate::pipeline::Pipeline;
use crate::value::Value;

/// A registered context extender.
pub trait Extend {
    fn extend(&self, pipeline: &Rc<Pipeline>, ctx: &mut Context) -> Result<()>;
}

/// The default extender set, in registration order.
pub fn defaults() -> Vec<Box<dyn Extend>> {
    vec![
        Box::new(Helpers),
        Box::new(Metadata),
        Box::new(Collector),
        Box::new(Modules),
        Box::new(Render),
        Box::new(FeedWriter),
    ]
}

/// The directory the current file lives in; relative paths in builtins
/// resolve against it.
fn input_parent(ctx: &Context) -> eval::Result<PathBuf> {
    let path = ctx.input_path()?;
    Ok(path.parent().unwrap_or_else(|| Path::new("")).to_owned())
}

/// The directory the current file's output lands in.
fn output_parent(ctx: &Context) -> eval::Result<PathBuf> {
    let path = ctx.output_path()?;
    Ok(path.parent().unwrap_or_else(|| Path::new("")).to_owned())
}

/// Registers general-purpose builtins: `files`, `exists`, `range`, `keys`,
/// and `len`.
pub struct Helpers;

impl Extend for Helpers {
    fn extend(&self, _pipeline: &Rc<Pipeline>, ctx: &mut Context) -> Result<()> {
        ctx.set(
            "files",
            Value::function("files", |ctx, args| {
                let parent = input_parent(ctx)?;
                let dir = match args {
                    [] => parent,
                    [Value::String(rel)] => parent.join(rel),
                    _ => {
                        return Err(eval::Error::Arity {
                            name: "files",
                            wanted: "an optional path string",
                        })
                    }
                };
                let entries = fs::read_dir(&dir).map_err(|e| eval::Error::helper("files", e))?;
                let mut names = Vec::new();
                for entry in entries {
                    let entry = entry.map_err(|e| eval::Error::helper("files", e))?;
                    names.push(entry.file_name().to_string_lossy().into_owned());
                }
                names.sort();
                Ok(Value::list(names.into_iter().map(Value::from).collect()))
            }),
        );

        ctx.set(
            "exists",
            Value::function("exists", |ctx, args| match args {
                [Value::String(rel)] => Ok(Value::from(input_parent(ctx)?.join(rel).exists())),
                _ => Err(eval::Error::Arity {
                    name: "exists",
                    wanted: "a path string",
                }),
            }),
        );

        ctx.set(
            "range",
            Value::function("range", |_, args| match args {
                [Value::Number(start), Value::Number(stop)] => {
                    let mut items = Vec::new();
                    let mut n = *start;
                    while n < *stop {
                        items.push(Value::Number(n));
                        n += 1.0;
                    }
                    Ok(Value::list(items))
                }
                _ => Err(eval::Error::Arity {
                    name: "range",
                    wanted: "two numbers",
                }),
            }),
        );

        ctx.set(
            "keys",
            Value::function("keys", |_, args| match args {
                [Value::Object(map)] => Ok(Value::list(
                    map.borrow()
                        .keys()
                        .map(|key| Value::from(key.clone()))
                        .collect(),
                )),
                _ => Err(eval::Error::Arity {
                    name: "keys",
                    wanted: "an object",
                }),
            }),
        );

        ctx.set(
            "len",
            Value::function("len", |_, args| match args {
                [Value::String(s)] => Ok(Value::from(s.chars().count())),
                [Value::List(items)] => Ok(Value::from(items.borrow().len())),
                [Value::Object(map)] => Ok(Value::from(map.borrow().len())),
                _ => Err(eval::Error::Arity {
                    name: "len",
                    wanted: "a string, list, or object",
                }),
            }),
        );

        Ok(())
    }
}

/// Merges the top-level keys of the metadata file next to the current
/// source file (if any) into the context.
pub struct Metadata;

impl Extend for Metadata {
    fn extend(&self, pipeline: &Rc<Pipeline>, ctx: &mut Context) -> Result<()> {
        let path = input_parent(ctx)?.join(&pipeline.config.metadata_file);
        if !path.is_file() {
            return Ok(());
        }
        ctx.merge(load_metadata(&path)?);
        Ok(())
    }
}

/// Parses a metadata file. The root must be a JSON object.
fn load_metadata(path: &Path) -> Result<BTreeMap<String, Value>> {
    let file = fs::File::open(path).map_err(|err| Error::Io {
        path: path.to_owned(),
        err,
    })?;
    let json: serde_json::Value =
        serde_json::from_reader(file).map_err(|err| Error::DeserializeMetadata {
            path: path.to_owned(),
            err,
        })?;
    match json {
        serde_json::Value::Object(map) => Ok(map
            .iter()
            .map(|(key, value)| (key.clone(), Value::from_json(value)))
            .collect()),
        _ => Err(Error::MetadataRoot {
            path: path.to_owned(),
        }),
    }
}

/// Registers `collect`: walks a directory subtree depth-first and returns a
/// `{dir, meta}` object for every metadata file found, `dir` being the
/// walk-root-relative directory.
pub struct Collector;

impl Extend for Collector {
    fn extend(&self, pipeline: &Rc<Pipeline>, ctx: &mut Context) -> Result<()> {
        let config = Rc::clone(&pipeline.config);
        ctx.set(
            "collect",
            Value::function("collect", move |ctx, args| {
                let rel = match args {
                    [Value::String(rel)] => rel.clone(),
                    _ => {
                        return Err(eval::Error::Arity {
                            name: "collect",
                            wanted: "a path string",
                        })
                    }
                };
                let root = input_parent(ctx)?.join(&rel);
                let mut found = Vec::new();
                for result in WalkDir::new(&root).sort_by_file_name() {
                    let entry = result.map_err(|e| eval::Error::helper("collect", e))?;
                    if !entry.file_type().is_dir() {
                        continue;
                    }
                    let meta_path = entry.path().join(&config.metadata_file);
                    if !meta_path.is_file() {
                        continue;
                    }
                    let meta =
                        load_metadata(&meta_path).map_err(|e| eval::Error::helper("collect", e))?;
                    // strip_prefix only fails for the walk root itself when
                    // `root` has redundant components; either way the root
                    // maps to the empty relative directory.
                    let dir = entry
                        .path()
                        .strip_prefix(&root)
                        .unwrap_or_else(|_| Path::new(""))
                        .to_string_lossy()
                        .into_owned();
                    found.push(Value::object(
                        [
                            ("dir".to_owned(), Value::from(dir)),
                            ("meta".to_owned(), Value::object(meta)),
                        ]
                        .into_iter()
                        .collect(),
                    ));
                }
                Ok(Value::list(found))
            }),
        );
        Ok(())
    }
}

/// Registers `import`: evaluates another file as a bare script in a derived
/// context and returns the module's `exports` key.
pub struct Modules;

impl Extend for Modules {
    fn extend(&self, pipeline: &Rc<Pipeline>, ctx: &mut Context) -> Result<()> {
        let pipeline = Rc::clone(pipeline);
        ctx.set(
            "import",
            Value::function("import", move |ctx, args| {
                let rel = match args {
                    [Value::String(rel)] => rel.clone(),
                    _ => {
                        return Err(eval::Error::Arity {
                            name: "import",
                            wanted: "a path string",
                        })
                    }
                };
                let path = input_parent(ctx)?.join(&rel);
                let source =
                    fs::read_to_string(&path).map_err(|e| eval::Error::helper("import", e))?;
                let output_path = ctx.output_path()?;
                let mut module_ctx = ctx.derive(&path, &output_path, source.clone());
                let program = Program { source };
                pipeline
                    .evaluate(&program, &mut module_ctx)
                    .map_err(|e| eval::Error::helper("import", e))?;
                Ok(module_ctx.get("exports").unwrap_or(Value::Null))
            }),
        );
        Ok(())
    }
}

/// Registers `render`: recursively runs the full pipeline on another file
/// and returns its evaluated output. The include target resolves against
/// the current file's input parent; its output parent only seeds the
/// derived context's destination; nothing is written for an include.
///
/// There is no cycle detection: a file that includes itself recurses until
/// the stack gives out.
pub struct Render;

impl Extend for Render {
    fn extend(&self, pipeline: &Rc<Pipeline>, ctx: &mut Context) -> Result<()> {
        let pipeline = Rc::clone(pipeline);
        ctx.set(
            "render",
            Value::function("render", move |ctx, args| {
                let (rel, extras) = match args {
                    [Value::String(rel)] => (rel.clone(), None),
                    [Value::String(rel), extras @ Value::Object(_)] => {
                        (rel.clone(), Some(extras.clone()))
                    }
                    _ => {
                        return Err(eval::Error::Arity {
                            name: "render",
                            wanted: "a path string and an optional object",
                        })
                    }
                };
                let input_path = input_parent(ctx)?.join(&rel);
                let output_path = output_parent(ctx)?.join(&rel);
                let content =
                    fs::read_to_string(&input_path).map_err(|e| eval::Error::helper("render", e))?;
                let mut derived = ctx.derive(&input_path, &output_path, content);
                if let Some(Value::Object(extras)) = extras {
                    for (key, value) in extras.borrow().iter() {
                        derived.set(key.clone(), value.clone());
                    }
                }
                let rendered = Pipeline::run(&pipeline, derived)
                    .map_err(|e| eval::Error::helper("render", e))?;
                Ok(Value::from(rendered.body))
            }),
        );
        Ok(())
    }
}

/// Registers `writefeed`: serializes a channel+item description to Atom XML
/// and writes it immediately, resolved against the current file's output
/// parent. This side effect happens during evaluation, outside the
/// synchronizer's write step.
pub struct FeedWriter;

impl Extend for FeedWriter {
    fn extend(&self, _pipeline: &Rc<Pipeline>, ctx: &mut Context) -> Result<()> {
        ctx.set(
            "writefeed",
            Value::function("writefeed", |ctx, args| {
                let (rel, channel) = match args {
                    [Value::String(rel), channel] => (rel.clone(), channel),
                    _ => {
                        return Err(eval::Error::Arity {
                            name: "writefeed",
                            wanted: "a path string and a channel object",
                        })
                    }
                };
                let path = output_parent(ctx)?.join(&rel);
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)
                        .map_err(|e| eval::Error::helper("writefeed", e))?;
                }
                let file =
                    fs::File::create(&path).map_err(|e| eval::Error::helper("writefeed", e))?;
                feed::write(channel, file).map_err(|e| eval::Error::helper("writefeed", e))?;
                Ok(Value::Null)
            }),
        );
        Ok(())
    }
}

/// Represents the result of an extender application.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents an error applying an extender.
#[derive(Debug)]
pub enum Error {
    /// Returned for I/O problems while reading a metadata file.
    Io { path: PathBuf, err: std::io::Error },

    /// Returned when a metadata file is not valid JSON.
    DeserializeMetadata {
        path: PathBuf,
        err: serde_json::Error,
    },

    /// Returned when a metadata file's root is not an object.
    MetadataRoot { path: PathBuf },

    /// Returned when an extender cannot read the context's path keys.
    Eval(eval::Error),
}

impl fmt::Display for Error {
    /// Displays an [`Error`] as human-readable text.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io { path, err } => {
                write!(f, "Reading metadata file '{}': {}", path.display(), err)
            }
            Error::DeserializeMetadata { path, err } => {
                write!(f, "Parsing metadata file '{}': {}", path.display(), err)
            }
            Error::MetadataRoot { path } => write!(
                f,
                "Metadata file '{}' must contain a top-level object",
                path.display()
            ),
            Error::Eval(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    /// Implements the [`std::error::Error`] trait for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io { path: _, err } => Some(err),
            Error::DeserializeMetadata { path: _, err } => Some(err),
            Error::MetadataRoot { path: _ } => None,
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
