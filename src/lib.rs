// Copyright © 2024 Postflow. All rights reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! # Postflow Library
//!
//! Postflow turns a directory of Markdown articles with YAML front matter
//! into a static blog. The pieces, in the order a build uses them:
//!
//! - [`content`]: front-matter parsing, documents and output paths
//! - [`processors`]: Markdown rendering with code highlighting and charts
//! - [`collections`]: the dated post list and tag index
//! - [`template`]: Handlebars layouts and page contexts
//! - [`generators`]: minification and the output writer
//! - [`process`]: the build pipeline tying them together
//!
//! ```rust,no_run
//! use postflow::core::config::ConfigBuilder;
//! use postflow::process::Pipeline;
//!
//! let config = ConfigBuilder::new().build()?;
//! let report = Pipeline::new(config)?.build()?;
//! println!("{} pages", report.pages);
//! # Ok::<(), postflow::ProcessingError>(())
//! ```

#![doc = include_str!("../README.md")]
#![crate_name = "postflow"]
#![crate_type = "lib"]

/// Module containing core utilities, such as configuration and error handling.
pub mod core {
    /// Handles configuration of a Postflow build.
    pub mod config;
    /// Contains error types and handling for Postflow.
    pub mod error;
    /// Traits shared by processors and generators.
    pub mod traits;
}

/// Provides command-line interface utilities.
pub mod cli;

/// Derived site views: posts by date and the tag index.
pub mod collections;

/// Provides content parsing utilities.
pub mod content;

/// Provides output generation utilities.
pub mod generators {
    /// HTML minification and the output directory writer.
    pub mod html;
}

/// Provides the build pipeline.
pub mod process;

/// Markdown rendering and fenced-block plugins.
pub mod processors;

/// Development HTTP server.
pub mod serve;

/// Provides template rendering utilities.
pub mod template;

/// Incremental rebuilds on file changes.
pub mod watch;

pub use crate::core::error::{ProcessingError, Result};
