//! Gofer run core: turns registered pipeline configurations into executing runs and
//! task runs, scheduled onto a pluggable container scheduler.
//!
//! The [`runner`] module contains the heart of the execution model; everything else
//! (storage, stores, events, scheduler) is a collaborator handed to it at
//! construction time.

pub mod conf;
pub mod events;
pub mod models;
pub mod object_store;
pub mod runner;
pub mod scheduler;
pub mod secret_store;
pub mod storage;

use anyhow::{Context, Result};
use std::str::FromStr;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

/// GOFER_EOF is a special string marker we include at the end of log files.
/// It denotes that no further logs will be written. This is to provide the functionality for downstream
/// applications to follow log files and not also have to monitor the container for state to know when
/// logs will no longer be printed.
pub const GOFER_EOF: &str = "GOFER_EOF";

/// Set up the process-wide tracing subscriber. Called once, before anything that logs.
pub fn init_logger(log_level: &str, pretty: bool) -> Result<()> {
    let level =
        LevelFilter::from_str(log_level).context("could not parse 'log_level' configuration")?;

    let filter = EnvFilter::from_default_env()
        // These directives filter out debug information that is too numerous and we generally
        // don't need during development.
        .add_directive("rusqlite=off".parse().expect("Invalid directive"))
        .add_directive(level.into());

    if pretty {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init();
    }

    Ok(())
}
