//! Vellum CLI - inspect content-script injection without a browser.
//!
//! The CLI works on extension manifests and match patterns directly: it can
//! dry-run which resources a navigation would inject, test match patterns
//! against URLs and print the resolved engine configuration.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use vellum_config::{EngineConfig, ResolvedConfig};
use vellum_inject::config_bridge;

mod commands;
mod theme;

use commands::plan::FrameArg;
use commands::{OutputFormat, config, pattern, plan};

/// Vellum - content-script injection engine
#[derive(Parser)]
#[command(name = "vellum")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Pretty)]
    format: OutputFormat,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "VELLUM_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show what a navigation would inject, phase by phase
    Plan {
        /// Extension manifest (`manifest.json`); repeat for several extensions
        #[arg(short, long = "manifest", required = true)]
        manifests: Vec<PathBuf>,

        /// URL being navigated to
        #[arg(short, long)]
        url: String,

        /// Frame kind
        #[arg(long, value_enum, default_value_t = FrameArg::Top)]
        frame: FrameArg,

        /// URL of the embedding document, for child frames
        #[arg(long)]
        parent_url: Option<String>,
    },

    /// Test a match pattern against URLs
    CheckPattern {
        /// Match pattern, e.g. `*://*.example.com/*` or `<all_urls>`
        pattern: String,

        /// URLs to test
        #[arg(required = true)]
        urls: Vec<String>,

        /// Exclude pattern; repeat for several
        #[arg(short, long)]
        exclude: Vec<String>,
    },

    /// View configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show resolved configuration with source annotations
    Show,
    /// Show config file paths being checked
    Paths,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let resolved = EngineConfig::load(cli.config.as_deref());

    // Set up logging from config, with --verbose override.
    let log_config = match &resolved {
        Ok(r) => {
            let mut lc = config_bridge::to_log_config(&r.config);
            if cli.verbose {
                "debug".clone_into(&mut lc.level);
            }
            lc
        },
        Err(_) => {
            let level = if cli.verbose { "debug" } else { "warn" };
            vellum_telemetry::LogConfig::new(level)
                .with_format(vellum_telemetry::LogFormat::Compact)
        },
    };
    if let Err(e) = vellum_telemetry::setup_logging(&log_config) {
        eprintln!("Failed to initialize logging: {e}");
    }

    match cli.command {
        Commands::Plan {
            manifests,
            url,
            frame,
            parent_url,
        } => {
            let resolved = resolved?;
            plan::run_plan(
                &manifests,
                &url,
                &frame.to_frame(parent_url),
                resolved.config.patterns.cache_capacity,
                cli.format,
            )
        },
        Commands::CheckPattern {
            pattern,
            urls,
            exclude,
        } => pattern::check_pattern(&pattern, &exclude, &urls, cli.format),
        Commands::Config { command } => handle_config(command, resolved?, cli.config, cli.format),
    }
}

fn handle_config(
    command: ConfigCommands,
    resolved: ResolvedConfig,
    explicit: Option<PathBuf>,
    format: OutputFormat,
) -> Result<()> {
    match command {
        ConfigCommands::Show => config::show_config(&resolved, format),
        ConfigCommands::Paths => {
            config::show_paths(explicit.as_deref());
            Ok(())
        },
    }
}
