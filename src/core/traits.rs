//! # Core Traits Module
//!
//! The seams of the build pipeline:
//!
//! - [`Processor`]: turns one representation of a page into the next
//!   (raw text into a document, Markdown into an HTML fragment, a fenced
//!   block into markup)
//! - [`Generator`]: writes a finished artifact to the output tree
//! - [`IntoContext`]: converts a value into the JSON context handed to
//!   layouts

use std::path::Path;

use crate::core::error::Result;
use serde_json::Value as JsonValue;

/// Core trait for content processors.
///
/// # Type Parameters
///
/// * `Input`: The type of content being processed
/// * `Output`: The type of content produced
/// * `Context`: Additional information the processor needs for one call
pub trait Processor: Send + Sync + std::fmt::Debug {
    /// The type of input content for the processor.
    type Input;
    /// The type of output content produced by the processor.
    type Output;
    /// The type of per-call context used by the processor.
    type Context;

    /// Processes the input content using optional context information.
    fn process(
        &self,
        input: Self::Input,
        context: Option<&Self::Context>,
    ) -> Result<Self::Output>;
}

/// Trait for output generation.
pub trait Generator: Send + Sync + std::fmt::Debug {
    /// Writes `content` to `path`, applying any post-processing the
    /// generator is configured for.
    fn generate(
        &self,
        content: &str,
        path: &Path,
        options: Option<&JsonValue>,
    ) -> Result<()>;

    /// Checks that `path` and `options` are acceptable without writing.
    fn validate(
        &self,
        path: &Path,
        options: Option<&JsonValue>,
    ) -> Result<()>;
}

/// Trait for types that can be converted into a template context.
pub trait IntoContext {
    /// Converts the type into a JSON context value.
    fn into_context(self) -> JsonValue;
}

impl IntoContext for JsonValue {
    fn into_context(self) -> JsonValue {
        self
    }
}
