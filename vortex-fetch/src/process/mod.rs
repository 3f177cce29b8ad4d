//! External process execution
//!
//! Every external tool (downloader, transcoder, fingerprinter) runs through a
//! [`ProcessRunner`] so tests can substitute scripted fakes.

mod progress;
mod runner;

pub use progress::{parse_progress, ProgressThrottle};
pub use runner::{
    CommandSpec, NoProgress, ProcessOutcome, ProcessRunner, ProgressSink, ProgressStream,
    TokioProcessRunner,
};
