//! The per-file render pipeline: compile → extend → interpret → transform.
//! One [`Pipeline`] instance, shared behind an [`Rc`], serves the whole
//! build; the render builtin re-enters it recursively for includes. The
//! pipeline owns the extender list, the transformer list, and the
//! evaluator, all constructed by the orchestrator rather than living as
//! ambient globals.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::debug;

use crate::compile::{compile, Program};
use crate::config::Config;
use crate::eval::{self, Context, Evaluator, ScriptEvaluator};
use crate::extend::{self, Extend};
use crate::token::tokenize;
use crate::transform::{self, Transform};

/// The machinery for rendering one file, shared by the synchronizer and by
/// nested includes.
pub struct Pipeline {
    pub config: Rc<Config>,
    extenders: Vec<Box<dyn Extend>>,
    transformers: Vec<Box<dyn Transform>>,
    evaluator: Box<dyn Evaluator>,
}

/// The result of rendering one file. No file has been written yet; the
/// synchronizer writes `body` to `output_path`, and `program` feeds the
/// debug artifact.
pub struct Rendered {
    pub body: String,
    pub output_path: PathBuf,
    pub program: Program,
}

impl Pipeline {
    pub fn new(
        config: Rc<Config>,
        extenders: Vec<Box<dyn Extend>>,
        transformers: Vec<Box<dyn Transform>>,
        evaluator: Box<dyn Evaluator>,
    ) -> Pipeline {
        Pipeline {
            config,
            extenders,
            transformers,
            evaluator,
        }
    }

    /// Constructs a pipeline with the default extender set, the default
    /// transformer list, and the script evaluator.
    pub fn with_defaults(config: Rc<Config>) -> Pipeline {
        Pipeline::new(
            config,
            extend::defaults(),
            transform::defaults(),
            Box::new(ScriptEvaluator),
        )
    }

    /// Renders a top-level file: reads the source, builds a fresh context,
    /// and runs the full pipeline. Takes the shared pipeline handle so the
    /// render builtin can re-enter it recursively.
    pub fn render_file(
        pipeline: &Rc<Pipeline>,
        input_path: &Path,
        output_path: &Path,
    ) -> Result<Rendered> {
        debug!(path = %input_path.display(), "rendering");
        let content = fs::read_to_string(input_path).map_err(|err| Error::Read {
            path: input_path.to_owned(),
            err,
        })?;
        Pipeline::run(pipeline, Context::new(input_path, output_path, content))
    }

    /// Runs the full pipeline over an already-built context. Includes enter
    /// here with a derived context.
    pub fn run(pipeline: &Rc<Pipeline>, mut ctx: Context) -> Result<Rendered> {
        let content = ctx.content()?;
        let tokens = tokenize(&content, &pipeline.config.open_tag, &pipeline.config.close_tag);
        let program = compile(&tokens);

        for extender in &pipeline.extenders {
            extender.extend(pipeline, &mut ctx)?;
        }

        let mut body = pipeline.evaluator.run(&program, &mut ctx)?;

        for transformer in &pipeline.transformers {
            body = transformer.transform(&pipeline.config, &mut ctx, body)?;
        }

        Ok(Rendered {
            body,
            output_path: ctx.output_path()?,
            program,
        })
    }

    /// Runs the evaluator over a bare script, outside the template
    /// pipeline. The module loader enters here.
    pub fn evaluate(&self, program: &Program, ctx: &mut Context) -> eval::Result<String> {
        self.evaluator.run(program, ctx)
    }
}

/// Represents the result of rendering one file.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents an error raised while rendering one file. Any of these aborts
/// the remainder of the tree pass.
#[derive(Debug)]
pub enum Error {
    /// Returned when the source file cannot be read.
    Read { path: PathBuf, err: std::io::Error },

    /// Returned when an extender fails.
    Extend(extend::Error),

    /// Returned when evaluation fails.
    Eval(eval::Error),

    /// Returned when a transformer fails.
    Transform(transform::Error),
}

impl fmt::Display for Error {
    /// Displays an [`Error`] as human-readable text.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Read { path, err } => {
                write!(f, "Reading source file '{}': {}", path.display(), err)
            }
            Error::Extend(err) => err.fmt(f),
            Error::Eval(err) => err.fmt(f),
            Error::Transform(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    /// Implements the [`std::error::Error`] trait for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Read { path: _, err } => Some(err),
            Error::Extend(err) => Some(err),
            Error::Eval(err) => Some(err),
            Error::Transform(err) => Some(err),
        }
    }
}

impl From<extend::Error> for Error {
    /// Converts an [`extend::Error`] into an [`Error`]. This allows us to
    /// use the `?` operator over the extender pipeline.
    fn from(err: extend::Error) -> Error {
        Error::Extend(err)
    }
}

impl From<eval::Error> for Error {
    /// Converts an [`eval::Error`] into an [`Error`]. This allows us to use
    /// the `?` operator around interpretation.
    fn from(err: eval::Error) -> Error {
        Error::Eval(err)
    }
}

impl From<transform::Error> for Error {
    /// Converts a [`transform::Error`] into an [`Error`]. This allows us to
    /// use the `?` operator over the transformer pipeline.
    fn from(err: transform::Error) -> Error {
        Error::Transform(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn pipeline(root: &Path) -> Rc<Pipeline> {
        let input = root.join("src");
        let output = root.join("out");
        fs::create_dir_all(&input).unwrap();
        fs::create_dir_all(&output).unwrap();
        Rc::new(Pipeline::with_defaults(Rc::new(Config::for_tests(
            &input, &output,
        ))))
    }

    #[test]
    fn test_render_file_plain_text() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let input = pipeline.config.input_path.join("page.html");
        let output = pipeline.config.output_path.join("page.html");
        fs::write(&input, "nothing dynamic").unwrap();

        let rendered = Pipeline::render_file(&pipeline, &input, &output).unwrap();
        assert_eq!(rendered.body, "nothing dynamic");
        assert_eq!(rendered.output_path, output);
    }

    #[test]
    fn test_range_loop_renders_repeated_literal() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let input = pipeline.config.input_path.join("page.html");
        let output = pipeline.config.output_path.join("page.html");
        fs::write(&input, "<% for i in range(0, 3) { %>x<% } %>").unwrap();

        let rendered = Pipeline::render_file(&pipeline, &input, &output).unwrap();
        assert_eq!(rendered.body, "xxx");
    }

    #[test]
    fn test_markdown_transform_rewrites_destination() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let input = pipeline.config.input_path.join("post.md");
        let output = pipeline.config.output_path.join("post.md");
        fs::write(&input, "# <%= \"Title\" %>").unwrap();

        let rendered = Pipeline::render_file(&pipeline, &input, &output).unwrap();
        assert_eq!(rendered.body, "<h1>Title</h1>\n");
        assert_eq!(
            rendered.output_path,
            pipeline.config.output_path.join("post.html")
        );
    }

    #[test]
    fn test_program_text_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let input = pipeline.config.input_path.join("page.html");
        let output = pipeline.config.output_path.join("page.html");
        fs::write(&input, "a<%= 1 %>b").unwrap();

        let first = Pipeline::render_file(&pipeline, &input, &output).unwrap();
        let second = Pipeline::render_file(&pipeline, &input, &output).unwrap();
        assert_eq!(first.program, second.program);
        assert_eq!(first.body, second.body);
    }

    #[test]
    fn test_unreadable_source_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let input = pipeline.config.input_path.join("missing.html");
        let output = pipeline.config.output_path.join("missing.html");

        match Pipeline::render_file(&pipeline, &input, &output) {
            Err(Error::Read { .. }) => {}
            other => panic!("wanted read error, found {:?}", other.map(|r| r.body)),
        }
    }
}
