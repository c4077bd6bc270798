//! # Error Handling for Postflow
//!
//! This module defines the error type shared by every stage of the build.
//! The `thiserror` crate derives the `Display` and `Error` impls so each
//! variant reads as a complete, path-bearing message on the command line.

use std::path::PathBuf;
use thiserror::Error;

/// Boxed error source carried by several variants.
pub type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// A unified result type for the Postflow library.
pub type Result<T> = std::result::Result<T, ProcessingError>;

/// The main error type for Postflow.
///
/// Every variant that can abort a build carries the path (or template
/// name) that caused it, so the CLI can print the offending file and the
/// reason without extra context.
#[derive(Error, Debug)]
pub enum ProcessingError {
    /// Error related to configuration loading or validation.
    #[error(
        "Configuration error: {details}{}",
        .path.as_ref().map(|p| format!(" (`{}`)", p.display())).unwrap_or_default()
    )]
    Configuration {
        /// Description of the problem.
        details: String,
        /// Configuration file or directory involved, if any.
        path: Option<PathBuf>,
        /// Underlying error.
        #[source]
        source: Option<BoxedSource>,
    },

    /// A content file whose front-matter block cannot be split or parsed.
    #[error("Front matter error in `{}`: {details}", path.display())]
    FrontMatter {
        /// Source document.
        path: PathBuf,
        /// Description of the problem.
        details: String,
    },

    /// Error encountered while turning a document into HTML.
    #[error("Content processing error: {details}")]
    ContentProcessing {
        /// Description of the problem.
        details: String,
        /// Underlying error.
        #[source]
        source: Option<BoxedSource>,
    },

    /// Error raised while registering or rendering a layout.
    #[error("Template error in `{template}`: {details}")]
    Template {
        /// Description of the problem, including the document being rendered.
        details: String,
        /// Layout name or template file.
        template: String,
        /// Underlying error.
        #[source]
        source: Option<BoxedSource>,
    },

    /// Error while creating, copying or removing output files.
    #[error("File operation failed for `{}`: {details}", path.display())]
    FileOperation {
        /// Description of the problem.
        details: String,
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: Option<BoxedSource>,
    },

    /// IO error encountered while reading or writing a file.
    #[error("File IO error at `{}`: {source}", path.display())]
    Io {
        /// Path associated with the IO error.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Miscellaneous internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for ProcessingError {
    fn from(source: std::io::Error) -> Self {
        ProcessingError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

impl ProcessingError {
    /// Creates a `Configuration` error.
    pub fn configuration<S: Into<String>>(
        details: S,
        path: Option<PathBuf>,
        source: Option<BoxedSource>,
    ) -> Self {
        ProcessingError::Configuration {
            details: details.into(),
            path,
            source,
        }
    }

    /// Creates a `FrontMatter` error for the given document.
    pub fn front_matter<P: Into<PathBuf>, S: Into<String>>(
        path: P,
        details: S,
    ) -> Self {
        ProcessingError::FrontMatter {
            path: path.into(),
            details: details.into(),
        }
    }

    /// Creates a `ContentProcessing` error.
    pub fn content_processing<S: Into<String>>(
        details: S,
        source: Option<BoxedSource>,
    ) -> Self {
        ProcessingError::ContentProcessing {
            details: details.into(),
            source,
        }
    }

    /// Creates a `Template` error for a layout.
    pub fn template<S: Into<String>, T: Into<String>>(
        details: S,
        template: T,
        source: Option<BoxedSource>,
    ) -> Self {
        ProcessingError::Template {
            details: details.into(),
            template: template.into(),
            source,
        }
    }

    /// Creates a `FileOperation` error.
    pub fn file_operation<S: Into<String>, P: Into<PathBuf>>(
        details: S,
        path: P,
        source: Option<BoxedSource>,
    ) -> Self {
        ProcessingError::FileOperation {
            details: details.into(),
            path: path.into(),
            source,
        }
    }

    /// Wraps an IO error with the path it occurred on.
    pub fn io_error<P: Into<PathBuf>>(
        path: P,
        source: std::io::Error,
    ) -> Self {
        ProcessingError::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a general internal error.
    pub fn internal_error<S: Into<String>>(message: S) -> Self {
        ProcessingError::Internal(message.into())
    }

    /// Returns the file the error points at, when there is one.
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            ProcessingError::Configuration { path, .. } => {
                path.as_deref()
            }
            ProcessingError::FrontMatter { path, .. }
            | ProcessingError::FileOperation { path, .. }
            | ProcessingError::Io { path, .. } => Some(path.as_path()),
            _ => None,
        }
    }
}
