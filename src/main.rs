// Copyright © 2024 Postflow. All rights reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! # Postflow CLI
//!
//! Entry point for the `postflow` binary. It initialises the logger, runs
//! the selected subcommand and turns any error into a message on stderr and
//! exit status 1.

use anyhow::Context;
use env_logger::Env;
use postflow::cli;

/// Maps the `-v` count to a default log filter; `RUST_LOG` still wins.
fn init_logger(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn run(matches: &clap::ArgMatches) -> anyhow::Result<()> {
    let command = matches.subcommand_name().unwrap_or("postflow");
    cli::execute(matches).with_context(|| format!("{} failed", command))
}

/// The main entry point for the Postflow CLI.
fn main() {
    let matches = cli::build().get_matches();
    init_logger(matches.get_count("verbose"));

    if let Err(err) = run(&matches) {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}
