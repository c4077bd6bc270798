// Copyright © 2024 Postflow. All rights reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Command-line interface for Postflow
//!
//! Two subcommands share the same site options:
//!
//! - `build` renders the site once and exits non-zero on any fatal error
//! - `watch` builds, then rebuilds on change while serving the output
//!
//! # Examples
//!
//! ```
//! use postflow::cli;
//!
//! let matches = cli::build().get_matches_from(vec![
//!     "postflow",
//!     "build",
//!     "--output",
//!     "dist",
//!     "--no-minify",
//! ]);
//!
//! let build_cmd = matches.subcommand_matches("build").unwrap();
//! assert!(build_cmd.get_flag("no-minify"));
//! ```

use std::path::{Path, PathBuf};
use std::thread;

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use log::{debug, info};
use toml::Value as TomlValue;

use crate::core::config::{Config, ConfigBuilder, CONFIG_FILE_NAME, ENV_PREFIX};
use crate::core::error::{ProcessingError, Result};
use crate::process::Pipeline;
use crate::serve::{
    DevServer, DEFAULT_INTERFACE, DEFAULT_PORT, DEFAULT_PORT_ARG,
};
use crate::watch::watch_for_changes_blocking;

/// The current version of Postflow, as defined in `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Builds and configures the Postflow command-line interface.
pub fn build() -> Command {
    debug!("Building CLI command structure");

    Command::new("postflow")
        .author("Postflow Contributors")
        .about("Builds a static blog from Markdown, front matter and Handlebars layouts.")
        .version(VERSION)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Increase log output (-v debug, -vv trace)")
                .action(ArgAction::Count)
                .global(true),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("Configuration file (defaults to ./postflow.toml when present)")
                .value_parser(value_parser!(PathBuf))
                .global(true),
        )
        .subcommand(
            site_args(Command::new("build").about("Build the site once")).arg(
                Arg::new("clean")
                    .long("clean")
                    .help("Empty the output directory before writing")
                    .action(ArgAction::SetTrue),
            ),
        )
        .subcommand(
            site_args(
                Command::new("watch")
                    .about("Build, then rebuild on change and serve the output"),
            )
            .arg(
                Arg::new("port")
                    .short('p')
                    .long("port")
                    .help("Port to serve on")
                    .value_parser(value_parser!(u16))
                    .default_value(DEFAULT_PORT_ARG),
            )
            .arg(
                Arg::new("no-serve")
                    .long("no-serve")
                    .help("Watch and rebuild without starting the server")
                    .action(ArgAction::SetTrue),
            ),
        )
}

fn site_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("content")
                .long("content")
                .help("Content directory")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .help("Output directory")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("templates")
                .short('t')
                .long("templates")
                .help("Template directory")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("no-minify")
                .long("no-minify")
                .help("Write HTML without minifying it")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("drafts")
                .long("drafts")
                .help("Include documents marked `draft: true`")
                .action(ArgAction::SetTrue),
        )
}

/// Where a command's configuration comes from: an optional file plus the
/// overrides given on the command line. Environment variables are read on
/// every load.
#[derive(Debug, Clone, Default)]
pub struct ConfigSource {
    file: Option<PathBuf>,
    overrides: Vec<(String, TomlValue)>,
}

impl ConfigSource {
    /// Collects the configuration inputs of a `build` or `watch` invocation.
    pub fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let file = match matches.get_one::<PathBuf>("config") {
            Some(path) if !path.is_file() => {
                return Err(ProcessingError::configuration(
                    "Config file not found",
                    Some(path.clone()),
                    None,
                ));
            }
            Some(path) => Some(path.clone()),
            None => Some(PathBuf::from(CONFIG_FILE_NAME))
                .filter(|default| default.is_file()),
        };

        let mut overrides = Vec::new();
        for (flag, key) in [
            ("content", "content_dir"),
            ("output", "output_dir"),
            ("templates", "template_dir"),
        ] {
            if let Some(path) = matches.get_one::<PathBuf>(flag) {
                overrides.push((
                    key.to_string(),
                    TomlValue::from(path.display().to_string()),
                ));
            }
        }
        for (flag, key, value) in [
            ("no-minify", "output.minify", false),
            ("drafts", "content.drafts", true),
            ("clean", "output.clean", true),
        ] {
            let set = matches
                .try_get_one::<bool>(flag)
                .ok()
                .flatten()
                .copied()
                .unwrap_or(false);
            if set {
                overrides.push((key.to_string(), TomlValue::from(value)));
            }
        }

        Ok(Self { file, overrides })
    }

    /// The configuration file in use, if any.
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// Builds and validates the configuration.
    pub fn load(&self) -> Result<Config> {
        let mut builder = ConfigBuilder::new().with_env_prefix(ENV_PREFIX);
        if let Some(file) = &self.file {
            builder = builder.with_file(file);
        }
        for (key, value) in &self.overrides {
            builder = builder.with_override(key.as_str(), value.clone());
        }
        builder.build()
    }
}

/// Executes the subcommand selected in `matches`.
pub fn execute(matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("build", sub_matches)) => build_site(sub_matches),
        Some(("watch", sub_matches)) => watch_site(sub_matches),
        _ => Err(ProcessingError::internal_error("Unknown command")),
    }
}

fn build_site(matches: &ArgMatches) -> Result<()> {
    let config = ConfigSource::from_matches(matches)?.load()?;
    info!(
        "building {} into {}",
        config.content_dir.display(),
        config.output_dir.display()
    );

    let report = Pipeline::new(config)?.build()?;
    if report.drafts_skipped > 0 {
        info!("skipped {} drafts", report.drafts_skipped);
    }
    Ok(())
}

fn watch_site(matches: &ArgMatches) -> Result<()> {
    let source = ConfigSource::from_matches(matches)?;
    let config = source.load()?.into_absolute()?;
    let config_file = match source.file() {
        Some(file) if file.is_relative() => {
            let cwd = std::env::current_dir()
                .map_err(|e| ProcessingError::io_error(file, e))?;
            Some(cwd.join(file))
        }
        other => other.map(Path::to_path_buf),
    };

    let mut pipeline = Pipeline::new(config)?;
    if let Err(e) = pipeline.build() {
        log::error!("initial build failed: {}", e);
    }

    let reload = {
        let source = source.clone();
        move || source.load().and_then(Config::into_absolute)
    };

    if matches.get_flag("no-serve") {
        return watch_for_changes_blocking(pipeline, config_file, reload);
    }

    let port = matches
        .get_one::<u16>("port")
        .copied()
        .unwrap_or(DEFAULT_PORT);
    let server =
        DevServer::bind(&pipeline.config().output_dir, DEFAULT_INTERFACE, port)?;
    let handle = server.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("shutting down...");
        handle.shutdown();
    })
    .map_err(|e| {
        ProcessingError::internal_error(format!(
            "Failed to set Ctrl+C handler: {}",
            e
        ))
    })?;

    _ = thread::spawn(move || {
        if let Err(e) = watch_for_changes_blocking(pipeline, config_file, reload) {
            log::error!("{}", e);
        }
    });

    server.run();
    Ok(())
}
