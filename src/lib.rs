// src/lib.rs

//! Readiness-driven pipelines of processes and in-process filters.
//!
//! - [`stream`]: shared descriptor handles.
//! - [`reactor`]: the `poll(2)` event loop, signal dispatch and the
//!   periodic [`Driver`](reactor::Driver).
//! - [`stage`]: the [`Capability`](stage::Capability) contract with
//!   [`Process`](stage::Process) and [`Pipe`](stage::Pipe).
//! - [`endpoint`]: input/output pairs chained by
//!   [`Reactor::pipe`](reactor::Reactor::pipe).
//!
//! Everything here is single-threaded: handles are `Rc`, not `Arc`.

pub mod cli;
pub mod config;
pub mod endpoint;
pub mod errors;
pub mod logging;
pub mod reactor;
pub mod sink;
pub mod spawn;
pub mod stage;
pub mod stream;
pub mod types;

use std::cell::RefCell;
use std::io;
use std::os::fd::AsFd;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};
use signal_hook::consts::SIGINT;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::{PipelineConfig, StageSpec};
use crate::endpoint::{Endpoint, Filter, ProcessEndpoint};
use crate::reactor::{Driver, Reactor};
use crate::sink::Sink;
use crate::stream::Stream;

/// High-level entry point used by `main.rs`.
///
/// Reads the pipeline file, spawns its stages, then feeds this process's
/// stdin through them to stdout until every stage has finished. Ctrl-C
/// closes the pipeline's input so the stages drain and exit.
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)
        .with_context(|| format!("failed to load pipeline from '{}'", args.config))?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let stages = build_stages(&cfg)?;
    let source = Stream::from_fd("stdin", io::stdin().as_fd().try_clone_to_owned()?);
    let sink = Stream::from_fd("stdout", io::stdout().as_fd().try_clone_to_owned()?);

    let mut reactor = Reactor::new();
    reactor.pipe_from(Rc::clone(&source), &stages, Sink::Stream(sink))?;

    if let Some(first) = stages.first() {
        let input = first.input();
        reactor.on(SIGINT, move |_| {
            info!("interrupted; closing pipeline input");
            for stream in [&source, &input] {
                if let Err(e) = stream.close() {
                    warn!(stream = %stream, error = %e, "failed to close stream");
                }
            }
        })?;
    }

    info!(stages = stages.len(), "pipeline started");
    let reactor = Rc::new(RefCell::new(reactor));
    match args.tick {
        Some(ms) => {
            let mut driver = Driver::new();
            driver.register(&reactor);
            driver.run(Duration::from_millis(ms)).await?;
        }
        None => {
            let timeout = cfg.timeout();
            while reactor.borrow_mut().invoke(timeout)? > 0 {}
        }
    }
    info!("pipeline finished");
    Ok(())
}

fn build_stages(cfg: &PipelineConfig) -> Result<Vec<Rc<dyn Endpoint>>> {
    cfg.stages()
        .iter()
        .map(|stage| -> Result<Rc<dyn Endpoint>> {
            debug!(%stage, "building stage");
            match stage {
                StageSpec::Command(spec) => Ok(ProcessEndpoint::spawn(spec.clone())?),
                StageSpec::Filter(kind) => {
                    let kind = *kind;
                    Ok(Filter::new(move |chunk, _| Ok(kind.apply(chunk)))?)
                }
            }
        })
        .collect()
}

fn print_dry_run(cfg: &PipelineConfig) {
    println!("tickpipe dry-run");
    println!("  reactor.timeout = {:?}", cfg.timeout());
    println!();

    println!("stages ({}):", cfg.stages().len());
    for (index, stage) in cfg.stages().iter().enumerate() {
        println!("  {index}: {stage}");
        if let StageSpec::Command(spec) = stage {
            if let Some(ref cwd) = spec.cwd {
                println!("      cwd: {}", cwd.display());
            }
            if let Some(ref env) = spec.env {
                println!("      env: {env:?}");
            }
        }
    }

    debug!("dry-run complete (no execution)");
}
