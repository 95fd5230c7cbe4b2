//! Configuration loading. A project is described by a `writan.yaml` file
//! discovered by walking parent directories from a starting point; the
//! `input`/`output` keys are resolved relative to the file's directory.
//! Every key has a default, so an empty mapping is a valid project file.
//! The resulting [`Config`] is immutable for the duration of a build and
//! read-only to every component.

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use serde::Deserialize;

/// The project file name looked up by [`Config::from_directory`].
pub const CONFIG_FILE: &str = "writan.yaml";

/// The raw, serde-deserialized shape of the project file.
#[derive(Deserialize)]
struct Project {
    #[serde(default = "default_input")]
    input: PathBuf,

    #[serde(default = "default_output")]
    output: PathBuf,

    #[serde(default = "default_open_tag")]
    open_tag: String,

    #[serde(default = "default_close_tag")]
    close_tag: String,

    #[serde(default = "default_transformed_extensions")]
    transformed_extensions: Vec<String>,

    #[serde(default = "default_ignore_prefix")]
    ignore_prefix: String,

    #[serde(default = "default_metadata_file")]
    metadata_file: String,
}

fn default_input() -> PathBuf {
    PathBuf::from("src")
}

fn default_output() -> PathBuf {
    PathBuf::from("out")
}

fn default_open_tag() -> String {
    "<%".to_owned()
}

fn default_close_tag() -> String {
    "%>".to_owned()
}

fn default_transformed_extensions() -> Vec<String> {
    vec!["html".to_owned(), "md".to_owned(), "xml".to_owned()]
}

fn default_ignore_prefix() -> String {
    "_".to_owned()
}

fn default_metadata_file() -> String {
    "meta.json".to_owned()
}

/// The resolved, process-wide build configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// The root of the source tree.
    pub input_path: PathBuf,

    /// The root of the mirrored output tree.
    pub output_path: PathBuf,

    /// The delimiter opening a code region.
    pub open_tag: String,

    /// The delimiter closing a code region.
    pub close_tag: String,

    /// Extensions (without the dot) eligible for the
    /// compile/evaluate/transform pipeline; all other files are copied
    /// verbatim, gated by freshness.
    pub transformed_extensions: BTreeSet<String>,

    /// Entries whose name starts with this prefix are excluded recursively
    /// from synchronization.
    pub ignore_prefix: String,

    /// The per-directory metadata file name merged into each context.
    pub metadata_file: String,

    /// Whether to keep rebuilding on input changes.
    pub watch: bool,

    /// Whether to write each file's compiled program text next to its
    /// destination.
    pub debug: bool,
}

impl Config {
    /// Searches `dir` and its parents for a project file and loads it.
    /// `output` overrides the project file's output root; `watch` and
    /// `debug` come from the command line.
    pub fn from_directory(
        dir: &Path,
        output: Option<&Path>,
        watch: bool,
        debug: bool,
    ) -> Result<Config> {
        let path = dir.join(CONFIG_FILE);
        if path.exists() {
            match Config::from_project_file(&path, output, watch, debug) {
                Ok(config) => Ok(config),
                Err(e) => Err(anyhow!("Loading configuration: {:#}", e)),
            }
        } else {
            match dir.parent() {
                Some(parent) => Config::from_directory(parent, output, watch, debug),
                None => Err(anyhow!(
                    "Could not find `{}` in any parent directory",
                    CONFIG_FILE
                )),
            }
        }
    }

    /// Loads a project file directly. Relative `input`/`output` keys are
    /// resolved against the file's directory.
    pub fn from_project_file(
        path: &Path,
        output: Option<&Path>,
        watch: bool,
        debug: bool,
    ) -> Result<Config> {
        let project: Project = serde_yaml::from_reader(open(path)?)?;
        let root = path.parent().ok_or_else(|| {
            anyhow!(
                "Can't get parent directory for provided project file path '{}'",
                path.display()
            )
        })?;
        Ok(Config {
            input_path: root.join(&project.input),
            output_path: match output {
                Some(output) => output.to_owned(),
                None => root.join(&project.output),
            },
            open_tag: project.open_tag,
            close_tag: project.close_tag,
            transformed_extensions: project.transformed_extensions.into_iter().collect(),
            ignore_prefix: project.ignore_prefix,
            metadata_file: project.metadata_file,
            watch,
            debug,
        })
    }

    /// Whether `path` is eligible for the compile/evaluate/transform
    /// pipeline, by extension.
    pub fn transformable(&self, path: &Path) -> bool {
        match path.extension().and_then(OsStr::to_str) {
            Some(extension) => self.transformed_extensions.contains(extension),
            None => false,
        }
    }

    /// Whether an entry name is excluded from synchronization.
    pub fn ignored(&self, name: &str) -> bool {
        name.starts_with(&self.ignore_prefix)
    }
}

fn open(path: &Path) -> Result<File> {
    match File::open(path) {
        Err(e) => Err(anyhow!("Opening project file `{}`: {}", path.display(), e)),
        Ok(file) => Ok(file),
    }
}

#[cfg(test)]
impl Config {
    /// A configuration with default knobs for tests.
    pub fn for_tests(input: &Path, output: &Path) -> Config {
        Config {
            input_path: input.to_owned(),
            output_path: output.to_owned(),
            open_tag: default_open_tag(),
            close_tag: default_close_tag(),
            transformed_extensions: default_transformed_extensions().into_iter().collect(),
            ignore_prefix: default_ignore_prefix(),
            metadata_file: default_metadata_file(),
            watch: false,
            debug: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_project_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "{}").unwrap();

        let config = Config::from_project_file(&path, None, false, false).unwrap();
        assert_eq!(config.input_path, dir.path().join("src"));
        assert_eq!(config.output_path, dir.path().join("out"));
        assert_eq!(config.open_tag, "<%");
        assert_eq!(config.close_tag, "%>");
        assert!(config.transformable(Path::new("a.md")));
        assert!(config.transformable(Path::new("a.html")));
        assert!(!config.transformable(Path::new("a.css")));
        assert!(!config.transformable(Path::new("Makefile")));
        assert!(config.ignored("_partial.html"));
        assert!(!config.ignored("page.html"));
    }

    #[test]
    fn test_discovery_walks_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "input: pages\noutput: public\n",
        )
        .unwrap();
        let nested = dir.path().join("pages/deeper");
        std::fs::create_dir_all(&nested).unwrap();

        let config = Config::from_directory(&nested, None, false, false).unwrap();
        assert_eq!(config.input_path, dir.path().join("pages"));
        assert_eq!(config.output_path, dir.path().join("public"));
    }

    #[test]
    fn test_output_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "{}").unwrap();

        let config =
            Config::from_project_file(&path, Some(Path::new("/tmp/site")), true, true).unwrap();
        assert_eq!(config.output_path, PathBuf::from("/tmp/site"));
        assert!(config.watch);
        assert!(config.debug);
    }

    #[test]
    fn test_custom_delimiters_and_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            "open_tag: \"{{\"\nclose_tag: \"}}\"\ntransformed_extensions: [txt]\n",
        )
        .unwrap();

        let config = Config::from_project_file(&path, None, false, false).unwrap();
        assert_eq!(config.open_tag, "{{");
        assert_eq!(config.close_tag, "}}");
        assert!(config.transformable(Path::new("a.txt")));
        assert!(!config.transformable(Path::new("a.md")));
    }
}
