//! The `git fast-import` protocol: command formatting and the sinks that
//! receive the stream.

pub mod commands;
pub mod dump;
pub mod filter;
pub mod process;
pub mod sink;

use std::sync::Arc;

use crate::config::{MigrationConfig, OutputMode};

pub use dump::{FileSink, FileSinkFactory};
pub use filter::MessageFilter;
pub use process::{ProcessOptions, ProcessSink, ProcessSinkFactory};
pub use sink::{OutputLayout, Sink, SinkFactory};

/// The sink factory selected by `output.mode`.
pub fn sink_factory(config: &MigrationConfig) -> Arc<dyn SinkFactory> {
    let work_dir = config.output.work_dir.clone();
    match config.output.mode {
        OutputMode::FastImport => Arc::new(ProcessSinkFactory::new(
            work_dir,
            ProcessOptions::from_config(&config.output),
        )),
        mode @ (OutputMode::Dump | OutputMode::DryRun) => {
            Arc::new(FileSinkFactory::new(work_dir, mode))
        }
    }
}
