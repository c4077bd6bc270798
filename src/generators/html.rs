//! # HTML Output Generation
//!
//! Writes rendered pages and passthrough assets into the output directory.
//! Pages with an `.html` extension are minified on the way out unless
//! minification is switched off; every other file is copied byte-for-byte.
//!
//! # Examples
//!
//! ```rust,no_run
//! use postflow::core::traits::Generator;
//! use postflow::generators::html::HtmlGenerator;
//! use std::path::Path;
//!
//! let generator = HtmlGenerator::new("public").with_minification(true);
//! generator
//!     .generate(
//!         "<html><body>  <p>Hello</p>  </body></html>",
//!         Path::new("hello/index.html"),
//!         None,
//!     )
//!     .unwrap();
//! ```

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Component, Path, PathBuf};

use minify_html::{minify, Cfg};
use serde_json::Value as JsonValue;
use walkdir::WalkDir;

use crate::core::error::{ProcessingError, Result};
use crate::core::traits::Generator;

/// Minifies an HTML document.
///
/// Comments are dropped, whitespace is collapsed and inline CSS and
/// JavaScript are minified; closing tags and the `<html>`/`<head>` opening
/// tags are kept. Running it on its own output changes nothing.
pub fn minify_html(content: &str) -> Result<String> {
    let mut cfg = Cfg::new();
    cfg.keep_closing_tags = true;
    cfg.keep_html_and_head_opening_tags = true;
    cfg.keep_comments = false;
    cfg.minify_css = true;
    cfg.minify_js = true;
    cfg.remove_bangs = true;
    cfg.remove_processing_instructions = true;

    String::from_utf8(minify(content.as_bytes(), &cfg)).map_err(|e| {
        ProcessingError::content_processing(
            "HTML minification produced invalid UTF-8",
            Some(Box::new(e)),
        )
    })
}

fn is_html(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("html"))
}

/// Writer for the output directory.
#[derive(Debug, Clone)]
pub struct HtmlGenerator {
    output_dir: PathBuf,
    minify: bool,
}

impl HtmlGenerator {
    /// Creates a generator writing under `output_dir`, minifying by default.
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            minify: true,
        }
    }

    /// Enables or disables HTML minification.
    pub fn with_minification(mut self, enable: bool) -> Self {
        self.minify = enable;
        self
    }

    /// Applies post-processing to a rendered page bound for `path`.
    pub fn post_process(&self, content: &str, path: &Path) -> Result<String> {
        self.post_process_with(content, path, self.minify)
    }

    fn post_process_with(
        &self,
        content: &str,
        path: &Path,
        minify: bool,
    ) -> Result<String> {
        if minify && is_html(path) {
            minify_html(content).map_err(|e| {
                ProcessingError::file_operation(
                    e.to_string(),
                    path,
                    None,
                )
            })
        } else {
            Ok(content.to_string())
        }
    }

    /// Writes `content` to `relative` inside the output directory.
    pub fn write(&self, relative: &Path, content: &[u8]) -> Result<PathBuf> {
        let destination = self.destination(relative)?;
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ProcessingError::io_error(parent, e))?;
        }

        let file = File::create(&destination)
            .map_err(|e| ProcessingError::io_error(&destination, e))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(content)
            .and_then(|()| writer.flush())
            .map_err(|e| ProcessingError::io_error(&destination, e))?;

        log::trace!("wrote {}", destination.display());
        Ok(destination)
    }

    /// Copies a single asset to `relative` inside the output directory.
    pub fn copy_asset(&self, source: &Path, relative: &Path) -> Result<PathBuf> {
        let destination = self.destination(relative)?;
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ProcessingError::io_error(parent, e))?;
        }
        _ = fs::copy(source, &destination).map_err(|e| {
            ProcessingError::file_operation(
                format!("failed to copy to {}", destination.display()),
                source,
                Some(Box::new(e)),
            )
        })?;
        log::trace!("copied {} -> {}", source.display(), destination.display());
        Ok(destination)
    }

    /// Copies every file under `source_dir` to `prefix` inside the output
    /// directory, returning how many files were copied.
    pub fn copy_tree(&self, source_dir: &Path, prefix: &Path) -> Result<usize> {
        let mut copied = 0;
        for entry in WalkDir::new(source_dir).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(source_dir).to_path_buf();
                ProcessingError::file_operation(
                    "failed to walk asset directory",
                    path,
                    Some(Box::new(e)),
                )
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(source_dir).map_err(|_| {
                ProcessingError::file_operation(
                    "asset is outside its directory",
                    entry.path(),
                    None,
                )
            })?;
            _ = self.copy_asset(entry.path(), &prefix.join(relative))?;
            copied += 1;
        }
        Ok(copied)
    }

    /// Removes a previously written file, and its directory when that is
    /// left empty. A missing file is not an error.
    pub fn remove(&self, relative: &Path) -> Result<()> {
        let destination = self.destination(relative)?;
        match fs::remove_file(&destination) {
            Ok(()) => log::debug!("removed {}", destination.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ProcessingError::io_error(&destination, e)),
        }

        let mut dir = destination.parent();
        while let Some(current) = dir {
            if current == self.output_dir || fs::remove_dir(current).is_err() {
                break;
            }
            dir = current.parent();
        }
        Ok(())
    }

    /// Deletes the output directory and everything in it.
    pub fn clean(&self) -> Result<()> {
        if self.output_dir.exists() {
            fs::remove_dir_all(&self.output_dir)
                .map_err(|e| ProcessingError::io_error(&self.output_dir, e))?;
            log::debug!("cleaned {}", self.output_dir.display());
        }
        Ok(())
    }

    fn destination(&self, relative: &Path) -> Result<PathBuf> {
        check_relative(relative)?;
        Ok(self.output_dir.join(relative))
    }
}

fn check_relative(path: &Path) -> Result<()> {
    let escapes = path.as_os_str().is_empty()
        || path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
    if escapes {
        return Err(ProcessingError::file_operation(
            "output path must stay inside the output directory",
            path,
            None,
        ));
    }
    Ok(())
}

impl Generator for HtmlGenerator {
    /// Post-processes and writes `content` to `path`, which is relative to
    /// the output directory. `{"minify": bool}` overrides the generator's
    /// minification setting.
    fn generate(
        &self,
        content: &str,
        path: &Path,
        options: Option<&JsonValue>,
    ) -> Result<()> {
        self.validate(path, options)?;
        let minify = options
            .and_then(|opts| opts.get("minify"))
            .and_then(JsonValue::as_bool)
            .unwrap_or(self.minify);
        let processed = self.post_process_with(content, path, minify)?;
        _ = self.write(path, processed.as_bytes())?;
        Ok(())
    }

    fn validate(
        &self,
        path: &Path,
        options: Option<&JsonValue>,
    ) -> Result<()> {
        check_relative(path)?;
        if let Some(opts) = options {
            let Some(obj) = opts.as_object() else {
                return Err(ProcessingError::file_operation(
                    "Invalid options format - expected JSON object",
                    path,
                    None,
                ));
            };
            for (key, value) in obj {
                match key.as_str() {
                    "minify" if !value.is_boolean() => {
                        return Err(ProcessingError::file_operation(
                            "minify option must be a boolean",
                            path,
                            None,
                        ));
                    }
                    "minify" => {}
                    _ => log::warn!("Unknown option key: {}", key),
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    const PAGE: &str = "<!DOCTYPE html>\n<html>\n  <head>\n    <title>Post</title>\n    <style>\n      body { color : red ; }\n    </style>\n  </head>\n  <body>\n    <!-- nav -->\n    <p>Hello   <b>world</b></p>\n  </body>\n</html>\n";

    #[test]
    fn test_minify_drops_comments_and_whitespace() -> Result<()> {
        let minified = minify_html(PAGE)?;
        assert!(!minified.contains("<!-- nav -->"));
        assert!(!minified.contains("\n    "));
        assert!(minified.contains("<html>"));
        assert!(minified.contains("</p>"));
        assert!(minified.contains("color:red"));
        Ok(())
    }

    #[test]
    fn test_minify_is_idempotent() -> Result<()> {
        let once = minify_html(PAGE)?;
        let twice = minify_html(&once)?;
        assert_eq!(once, twice);
        Ok(())
    }

    #[test]
    fn test_generate_minifies_html_only() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let generator = HtmlGenerator::new(temp_dir.path());

        generator.generate(PAGE, Path::new("post/index.html"), None)?;
        generator.generate(PAGE, Path::new("feed.xml"), None)?;

        let html = fs::read_to_string(temp_dir.path().join("post/index.html"))?;
        assert_eq!(html, minify_html(PAGE)?);
        let xml = fs::read_to_string(temp_dir.path().join("feed.xml"))?;
        assert_eq!(xml, PAGE);
        Ok(())
    }

    #[test]
    fn test_minify_option_overrides_setting() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let generator = HtmlGenerator::new(temp_dir.path());
        generator.generate(
            PAGE,
            Path::new("index.html"),
            Some(&json!({"minify": false})),
        )?;
        assert_eq!(fs::read_to_string(temp_dir.path().join("index.html"))?, PAGE);

        let disabled = HtmlGenerator::new(temp_dir.path()).with_minification(false);
        assert_eq!(disabled.post_process(PAGE, Path::new("a.html"))?, PAGE);
        Ok(())
    }

    #[test]
    fn test_options_validation() {
        let generator = HtmlGenerator::new("public");
        let path = Path::new("index.html");
        assert!(generator.validate(path, Some(&json!({"minify": "yes"}))).is_err());
        assert!(generator.validate(path, Some(&json!([1]))).is_err());
        assert!(generator.validate(path, Some(&json!({"other": 1}))).is_ok());
        assert!(generator.validate(Path::new("../escape.html"), None).is_err());
        assert!(generator.validate(Path::new("/abs.html"), None).is_err());
    }

    #[test]
    fn test_assets_are_copied_byte_for_byte() -> Result<()> {
        let source = TempDir::new()?;
        let output = TempDir::new()?;
        let bytes: Vec<u8> = (0..=255).collect();
        fs::create_dir_all(source.path().join("img"))?;
        fs::write(source.path().join("img/logo.png"), &bytes)?;
        fs::write(source.path().join("site.html"), "<p>  raw  </p>")?;

        let generator = HtmlGenerator::new(output.path());
        let copied = generator.copy_tree(source.path(), Path::new("assets"))?;

        assert_eq!(copied, 2);
        assert_eq!(fs::read(output.path().join("assets/img/logo.png"))?, bytes);
        assert_eq!(
            fs::read_to_string(output.path().join("assets/site.html"))?,
            "<p>  raw  </p>"
        );
        Ok(())
    }

    #[test]
    fn test_remove_prunes_empty_directories() -> Result<()> {
        let output = TempDir::new()?;
        let generator = HtmlGenerator::new(output.path());
        _ = generator.write(Path::new("posts/a/index.html"), b"a")?;
        _ = generator.write(Path::new("posts/b/index.html"), b"b")?;

        generator.remove(Path::new("posts/a/index.html"))?;
        assert!(!output.path().join("posts/a").exists());
        assert!(output.path().join("posts/b/index.html").exists());

        generator.remove(Path::new("posts/a/index.html"))?;
        Ok(())
    }

    #[test]
    fn test_clean_removes_output() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let output = temp_dir.path().join("public");
        let generator = HtmlGenerator::new(&output);
        _ = generator.write(Path::new("stale.html"), b"old")?;
        generator.clean()?;
        assert!(!output.exists());
        generator.clean()?;
        Ok(())
    }
}
