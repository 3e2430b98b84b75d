use std::io;

use thiserror::Error;

pub mod alarm;
pub mod canon;
pub mod driver;
pub mod heap;
pub mod matcher;
pub mod mixture;
pub mod molecule;
pub mod monitor;
pub mod params;
pub mod parsers;
pub mod reactor;
pub mod signature;
pub mod simulator;
pub mod snapshot;
pub mod system;
mod tests;

pub use heap::PropensityHeap;
pub use mixture::Mixture;
pub use molecule::Molecule;
pub use params::Parameters;
pub use signature::Signature;
pub use simulator::Simulator;
pub use system::System;

/// A default seed for seeded RNGs.
pub const DEFAULT_SEED: u64 = 0x123456789abcdef;

/// An error raised while assembling a runnable system from its input files.
///
/// Configuration errors are reported to the user and abort the run before
/// any simulation starts. Violations of internal invariants are not
/// `ConfigError`s; they are bugs and fail hard through debug assertions.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot open {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid signature: {0}")]
    Signature(String),
    #[error("could not parse {what} expression: {text}")]
    Expression { what: &'static str, text: String },
    #[error("{file}:{line}: {msg}")]
    Directive {
        file: String,
        line: usize,
        msg: String,
    },
    #[error("invalid observable {name}: {msg}")]
    Observable { name: String, msg: String },
    #[error("invalid parameter {name}: {msg}")]
    Parameter { name: String, msg: String },
}
