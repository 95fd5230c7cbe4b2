use std::path::PathBuf;
use std::process;
use std::rc::Rc;
use std::sync::mpsc;

use anyhow::Result;
use clap::Parser;
use notify::{RecursiveMode, Watcher};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use writan::build;
use writan::config::Config;
use writan::pipeline::Pipeline;

/// A programmable static-content build tool: mirrors an input tree into an
/// output tree, executing embedded script regions in eligible files.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Project directory; searched upward for the project file.
    path: Option<PathBuf>,

    /// Override the output directory from the project file.
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Rebuild whenever the input tree changes.
    #[arg(long, default_value_t = false)]
    watch: bool,

    /// Write each file's compiled program text next to its destination.
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Enable verbose logging.
    #[arg(long, short, default_value_t = false)]
    verbose: bool,
}

fn main() {
    let args = Cli::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if let Err(e) = run(args) {
        eprintln!("error: {:#}", e);
        process::exit(1);
    }
}

fn run(args: Cli) -> Result<()> {
    let start = match args.path {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    let config = Rc::new(Config::from_directory(
        &start,
        args.output.as_deref(),
        args.watch,
        args.debug,
    )?);
    let pipeline = Rc::new(Pipeline::with_defaults(Rc::clone(&config)));

    if config.watch {
        // The watch loop is the error boundary: a failed pass is logged and
        // the loop keeps going, retrying on the next change.
        if let Err(e) = build::build_pass(&pipeline) {
            error!(err = %e, "build pass failed");
        }
        watch(&pipeline)
    } else {
        build::build_pass(&pipeline)?;
        Ok(())
    }
}

fn watch(pipeline: &Rc<Pipeline>) -> Result<()> {
    let config = &pipeline.config;
    let (tx, rx) = mpsc::channel();
    let mut watcher = notify::recommended_watcher(tx)?;
    watcher.watch(&config.input_path, RecursiveMode::Recursive)?;
    info!(path = %config.input_path.display(), "watching for changes");

    // Passes run on this thread, one at a time; change events arriving
    // mid-pass queue up in the channel and trigger a fresh pass afterwards.
    for result in rx {
        let event = result?;
        // If the output tree nests inside the watched tree, our own writes
        // come back as events; skip them instead of rebuilding forever.
        if !event.paths.is_empty()
            && event
                .paths
                .iter()
                .all(|path| path.starts_with(&config.output_path))
        {
            continue;
        }
        if let Err(e) = build::build_pass(pipeline) {
            error!(err = %e, "build pass failed");
        }
    }
    Ok(())
}
