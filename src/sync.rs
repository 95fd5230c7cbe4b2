//! The tree synchronizer: a pre-order recursive walk over input/output
//! directory pairs. Per directory it deletes stale output entries (no
//! same-named non-ignored input counterpart), recurses into
//! subdirectories, re-renders transformable files unconditionally (their
//! output depends on arbitrary code and untracked includes, so modification
//! times prove nothing), and copies static files only when missing or
//! older than their source. A post-order second pass removes output
//! directories left empty.
//!
//! An error while processing one file propagates immediately and aborts
//! the remainder of the pass; nothing here catches per-file failures.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::debug;

use crate::pipeline::{self, Pipeline};

/// The suffix appended to a destination path for the compiled-program
/// debug artifact.
pub const PROGRAM_SUFFIX: &str = ".script";

/// Runs one full synchronization pass: reconcile the output tree against
/// the input tree, then prune empty output directories. The output root
/// must already exist.
pub fn sync_pass(pipeline: &Rc<Pipeline>) -> Result<()> {
    let config = Rc::clone(&pipeline.config);
    sync_dir(pipeline, &config.input_path, &config.output_path)?;
    prune_empty(&config.output_path)?;
    Ok(())
}

fn sync_dir(pipeline: &Rc<Pipeline>, input_dir: &Path, output_dir: &Path) -> Result<()> {
    let config = &pipeline.config;

    // Input entries, sorted so files process in a deterministic order.
    let mut entries = Vec::new();
    for result in fs::read_dir(input_dir).map_err(|err| Error::io(input_dir, err))? {
        entries.push(result.map_err(|err| Error::io(input_dir, err))?);
    }
    entries.sort_by_key(|entry| entry.file_name());

    let keep: HashSet<OsString> = entries
        .iter()
        .filter(|entry| !config.ignored(&entry.file_name().to_string_lossy()))
        .map(|entry| entry.file_name())
        .collect();

    // Stale deletion happens before anything is written. Outputs whose name
    // only arises through extension rewriting (post.html from post.md) are
    // deleted here and recreated below; transformable files are recomputed
    // unconditionally, so nothing is lost.
    for result in fs::read_dir(output_dir).map_err(|err| Error::io(output_dir, err))? {
        let entry = result.map_err(|err| Error::io(output_dir, err))?;
        if keep.contains(&entry.file_name()) {
            continue;
        }
        let path = entry.path();
        debug!(path = %path.display(), "deleting stale output");
        let file_type = entry.file_type().map_err(|err| Error::io(&path, err))?;
        if file_type.is_dir() {
            fs::remove_dir_all(&path).map_err(|err| Error::io(&path, err))?;
        } else {
            fs::remove_file(&path).map_err(|err| Error::io(&path, err))?;
        }
    }

    for entry in entries {
        let name = entry.file_name();
        if config.ignored(&name.to_string_lossy()) {
            continue;
        }
        let input_path = entry.path();
        let output_path = output_dir.join(&name);
        let file_type = entry
            .file_type()
            .map_err(|err| Error::io(&input_path, err))?;
        if file_type.is_dir() {
            // A same-named output file survives the stale pass; it has to
            // give way to the directory, and vice versa below.
            if output_path.is_file() {
                fs::remove_file(&output_path).map_err(|err| Error::io(&output_path, err))?;
            }
            if !output_path.is_dir() {
                fs::create_dir(&output_path).map_err(|err| Error::io(&output_path, err))?;
            }
            sync_dir(pipeline, &input_path, &output_path)?;
        } else {
            if output_path.is_dir() {
                fs::remove_dir_all(&output_path).map_err(|err| Error::io(&output_path, err))?;
            }
            if config.transformable(&input_path) {
                render_into(pipeline, &input_path, &output_path)?;
            } else {
                copy_if_stale(&input_path, &output_path)?;
            }
        }
    }
    Ok(())
}

/// Re-runs the full pipeline over a transformable file and (over)writes the
/// post-pipeline destination.
fn render_into(pipeline: &Rc<Pipeline>, input_path: &Path, output_path: &Path) -> Result<()> {
    let rendered = Pipeline::render_file(pipeline, input_path, output_path)?;
    fs::write(&rendered.output_path, &rendered.body)
        .map_err(|err| Error::io(&rendered.output_path, err))?;
    debug!(
        from = %input_path.display(),
        to = %rendered.output_path.display(),
        "rendered"
    );
    if pipeline.config.debug {
        let artifact = program_artifact_path(&rendered.output_path);
        fs::write(&artifact, &rendered.program.source)
            .map_err(|err| Error::io(&artifact, err))?;
    }
    Ok(())
}

/// Where the compiled program text lands when the debug flag is set.
fn program_artifact_path(output_path: &Path) -> PathBuf {
    let mut name = output_path.as_os_str().to_owned();
    name.push(PROGRAM_SUFFIX);
    PathBuf::from(name)
}

/// Copies a static file if the output is missing or strictly older than
/// the input.
fn copy_if_stale(input_path: &Path, output_path: &Path) -> Result<()> {
    let stale = match fs::metadata(output_path) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => true,
        Err(err) => return Err(Error::io(output_path, err)),
        Ok(output_metadata) => {
            let input_modified = fs::metadata(input_path)
                .and_then(|metadata| metadata.modified())
                .map_err(|err| Error::io(input_path, err))?;
            let output_modified = output_metadata
                .modified()
                .map_err(|err| Error::io(output_path, err))?;
            input_modified > output_modified
        }
    };
    if stale {
        fs::copy(input_path, output_path).map_err(|err| Error::io(output_path, err))?;
        debug!(
            from = %input_path.display(),
            to = %output_path.display(),
            "copied"
        );
    }
    Ok(())
}

/// Post-order removal of output directories left empty by deletions.
fn prune_empty(dir: &Path) -> Result<()> {
    for result in fs::read_dir(dir).map_err(|err| Error::io(dir, err))? {
        let entry = result.map_err(|err| Error::io(dir, err))?;
        let path = entry.path();
        if !entry.file_type().map_err(|err| Error::io(&path, err))?.is_dir() {
            continue;
        }
        prune_empty(&path)?;
        let mut contents = fs::read_dir(&path).map_err(|err| Error::io(&path, err))?;
        if contents.next().is_none() {
            fs::remove_dir(&path).map_err(|err| Error::io(&path, err))?;
            debug!(path = %path.display(), "pruned empty directory");
        }
    }
    Ok(())
}

/// Represents the result of a synchronization pass.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents an error during a synchronization pass.
#[derive(Debug)]
pub enum Error {
    /// Returned for I/O problems walking or mutating the trees.
    Io { path: PathBuf, err: io::Error },

    /// Returned when rendering a transformable file fails.
    Pipeline(pipeline::Error),
}

impl Error {
    fn io(path: &Path, err: io::Error) -> Error {
        Error::Io {
            path: path.to_owned(),
            err,
        }
    }
}

impl fmt::Display for Error {
    /// Displays an [`Error`] as human-readable text.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io { path, err } => {
                write!(f, "Synchronizing '{}': {}", path.display(), err)
            }
            Error::Pipeline(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    /// Implements the [`std::error::Error`] trait for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io { path: _, err } => Some(err),
            Error::Pipeline(err) => Some(err),
        }
    }
}

impl From<pipeline::Error> for Error {
    /// Converts a [`pipeline::Error`] into an [`Error`]. This allows us to
    /// use the `?` operator when rendering files during a pass.
    fn from(err: pipeline::Error) -> Error {
        Error::Pipeline(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn pipeline(root: &Path) -> Rc<Pipeline> {
        let input = root.join("src");
        let output = root.join("out");
        fs::create_dir_all(&input).unwrap();
        fs::create_dir_all(&output).unwrap();
        Rc::new(Pipeline::with_defaults(Rc::new(Config::for_tests(
            &input, &output,
        ))))
    }

    fn tree(dir: &Path) -> Vec<(String, Vec<u8>)> {
        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.unwrap();
            if entry.file_type().is_file() {
                let name = entry
                    .path()
                    .strip_prefix(dir)
                    .unwrap()
                    .to_string_lossy()
                    .into_owned();
                files.push((name, fs::read(entry.path()).unwrap()));
            }
        }
        files
    }

    #[test]
    fn test_pass_mirrors_the_input_tree() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let src = &pipeline.config.input_path;
        fs::write(src.join("index.html"), "<%= 1 + 1 %>").unwrap();
        fs::write(src.join("style.css"), "body {}").unwrap();
        fs::create_dir_all(src.join("posts")).unwrap();
        fs::write(src.join("posts/first.md"), "# First").unwrap();

        sync_pass(&pipeline).unwrap();

        let out = &pipeline.config.output_path;
        assert_eq!(fs::read_to_string(out.join("index.html")).unwrap(), "2");
        assert_eq!(fs::read_to_string(out.join("style.css")).unwrap(), "body {}");
        assert_eq!(
            fs::read_to_string(out.join("posts/first.html")).unwrap(),
            "<h1>First</h1>\n"
        );
        // The markdown source name never lands in the output tree.
        assert!(!out.join("posts/first.md").exists());
    }

    #[test]
    fn test_second_pass_is_byte_identical_and_skips_fresh_copies() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let src = &pipeline.config.input_path;
        fs::write(src.join("index.html"), "<%= \"stable\" %>").unwrap();
        fs::write(src.join("logo.svg"), "<svg/>").unwrap();

        sync_pass(&pipeline).unwrap();
        let out = &pipeline.config.output_path;
        let first = tree(out);
        let copied_at = fs::metadata(out.join("logo.svg")).unwrap().modified().unwrap();

        sync_pass(&pipeline).unwrap();
        assert_eq!(first, tree(out));
        // The static file passed the freshness check and was not re-copied.
        assert_eq!(
            copied_at,
            fs::metadata(out.join("logo.svg")).unwrap().modified().unwrap()
        );
    }

    #[test]
    fn test_deleted_input_deletes_output_and_prunes_empty_directories() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let src = &pipeline.config.input_path;
        fs::create_dir_all(src.join("notes")).unwrap();
        fs::write(src.join("notes/only.md"), "note").unwrap();
        fs::write(src.join("index.html"), "x").unwrap();

        sync_pass(&pipeline).unwrap();
        let out = &pipeline.config.output_path;
        assert!(out.join("notes/only.html").exists());

        fs::remove_file(src.join("notes/only.md")).unwrap();
        fs::remove_dir(src.join("notes")).unwrap();
        sync_pass(&pipeline).unwrap();
        assert!(!out.join("notes").exists());
    }

    #[test]
    fn test_last_file_removal_prunes_now_empty_output_directory() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let src = &pipeline.config.input_path;
        fs::create_dir_all(src.join("docs")).unwrap();
        fs::write(src.join("docs/a.md"), "a").unwrap();

        sync_pass(&pipeline).unwrap();
        fs::remove_file(src.join("docs/a.md")).unwrap();
        sync_pass(&pipeline).unwrap();

        // The input directory still exists but is empty, so its mirrored
        // output directory is pruned.
        assert!(!pipeline.config.output_path.join("docs").exists());
    }

    #[test]
    fn test_ignored_entries_never_reach_the_output_tree() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let src = &pipeline.config.input_path;
        fs::write(src.join("_draft.html"), "draft").unwrap();
        fs::write(src.join("page.html"), "page").unwrap();
        // An output entry from before the entry was ignored.
        fs::write(pipeline.config.output_path.join("_draft.html"), "stale").unwrap();

        sync_pass(&pipeline).unwrap();
        let out = &pipeline.config.output_path;
        assert!(!out.join("_draft.html").exists());
        assert!(out.join("page.html").exists());
    }

    #[test]
    fn test_transformable_files_are_recomputed_every_pass() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let src = &pipeline.config.input_path;
        fs::write(src.join("meta.json"), r#"{"title": "one"}"#).unwrap();
        fs::write(src.join("index.html"), "<%= title %>").unwrap();

        sync_pass(&pipeline).unwrap();
        let out = &pipeline.config.output_path;
        assert_eq!(fs::read_to_string(out.join("index.html")).unwrap(), "one");

        // The template did not change, but data it depends on did; the
        // recompute-always rule picks it up.
        fs::write(src.join("meta.json"), r#"{"title": "two"}"#).unwrap();
        sync_pass(&pipeline).unwrap();
        assert_eq!(fs::read_to_string(out.join("index.html")).unwrap(), "two");
    }

    #[test]
    fn test_debug_artifact_written_next_to_destination() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("src");
        let output = dir.path().join("out");
        fs::create_dir_all(&input).unwrap();
        fs::create_dir_all(&output).unwrap();
        let mut config = Config::for_tests(&input, &output);
        config.debug = true;
        let pipeline = Rc::new(Pipeline::with_defaults(Rc::new(config)));
        fs::write(input.join("index.html"), "hi").unwrap();

        sync_pass(&pipeline).unwrap();
        let artifact = fs::read_to_string(output.join("index.html.script")).unwrap();
        assert_eq!(artifact, "emit \"hi\"\n");
    }

    #[test]
    fn test_error_in_one_file_aborts_the_pass() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let src = &pipeline.config.input_path;
        fs::write(src.join("a.html"), "<%= boom %>").unwrap();
        fs::write(src.join("z.html"), "fine").unwrap();

        match sync_pass(&pipeline) {
            Err(Error::Pipeline(_)) => {}
            other => panic!("wanted pipeline error, found {:?}", other.err()),
        }
        // Processing is ordered by name, so the failing file stopped the
        // pass before its later sibling was written.
        assert!(!pipeline.config.output_path.join("z.html").exists());
    }
}
