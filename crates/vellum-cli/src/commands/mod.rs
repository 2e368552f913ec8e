//! CLI command implementations.

pub(crate) mod config;
pub(crate) mod pattern;
pub(crate) mod plan;

/// How command results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum OutputFormat {
    /// Human-readable, colored.
    Pretty,
    /// Machine-readable JSON on stdout.
    Json,
}
