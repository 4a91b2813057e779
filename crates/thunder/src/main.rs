// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Thunder - a serialized SQL worker over an asynchronous block store.
//!
//! This is the binary entry point. The host application talks to it through
//! newline-delimited JSON on stdin and stdout.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Thunder - a serialized SQL worker over an asynchronous block store.
#[derive(Parser, Debug)]
#[command(name = "thunder", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the standard locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Answer requests from stdin until it closes (the default).
    Serve,
    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => thunder_config::load_and_validate_path(path),
        None => thunder_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            thunder_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            if let Err(e) = serve::run_serve(config).await {
                eprintln!("thunder: {e}");
                std::process::exit(1);
            }
        }
        Commands::Config => match toml::to_string_pretty(&config) {
            Ok(text) => print!("{text}"),
            Err(e) => {
                eprintln!("thunder: cannot render configuration: {e}");
                std::process::exit(1);
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        // Only jemalloc answers the epoch/stats controls.
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0, "jemalloc should report non-zero allocation");
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_is_the_default_command() {
        let cli = Cli::parse_from(["thunder"]);
        assert!(cli.command.is_none());
        let cli = Cli::parse_from(["thunder", "--config", "/tmp/t.toml", "config"]);
        assert!(matches!(cli.command, Some(Commands::Config)));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/t.toml")));
    }

    #[test]
    fn default_config_renders_as_toml() {
        let config = thunder_config::load_and_validate_str("").expect("defaults are valid");
        let text = toml::to_string_pretty(&config).unwrap();
        assert!(text.contains("[vfs]"));
        assert!(text.contains("max_idle_files"));
    }
}
