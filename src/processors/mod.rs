//! # Content Processors Module
//!
//! Turns Markdown bodies into HTML fragments. Fenced code blocks are routed
//! to the active plugins:
//!
//! - [`highlight`]: syntax-highlighted `<pre>` blocks for recognised languages
//! - [`chart`]: inline SVG bar charts for blocks tagged `chart`
//!
//! ## Usage
//!
//! ```rust
//! use postflow::core::traits::Processor;
//! use postflow::processors::{markdown::MarkdownProcessor, PluginSet};
//! use std::path::PathBuf;
//!
//! let processor = MarkdownProcessor::new(PluginSet::chart_only())
//!     .with_tables(true);
//!
//! let body = "# Sales\n\n```chart\nmonth, total\nJan, 10\n```\n";
//! let rendered = processor
//!     .process(body.to_string(), Some(&PathBuf::from("sales.md")))
//!     .unwrap();
//! assert!(rendered.html.contains("<figure class=\"chart\">"));
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::config::Config;
use crate::core::error::{ProcessingError, Result};

/// Inline SVG chart rendering.
pub mod chart;

/// Syntax highlighting for fenced code blocks.
pub mod highlight;

/// Markdown to HTML conversion.
pub mod markdown;

use chart::ChartRenderer;
use highlight::Highlighter;

/// The fenced-block plugins a build can enable.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    /// Syntax-highlighted code blocks.
    Highlight,
    /// Bar charts from `chart` blocks.
    Chart,
}

impl FromStr for PluginKind {
    type Err = ProcessingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "highlight" => Ok(PluginKind::Highlight),
            "chart" => Ok(PluginKind::Chart),
            other => Err(ProcessingError::configuration(
                format!("Unknown plugin: {}", other),
                None,
                None,
            )),
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginKind::Highlight => f.write_str("highlight"),
            PluginKind::Chart => f.write_str("chart"),
        }
    }
}

/// Output of a fenced-block plugin.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockOutput {
    /// Markup that replaces the fenced block.
    pub html: String,
    /// Recoverable problems found in the block.
    pub warnings: Vec<String>,
}

/// The set of active plugins, shared read-only by every page render.
#[derive(Debug, Default)]
pub struct PluginSet {
    highlighter: Option<Highlighter>,
    chart: Option<ChartRenderer>,
}

impl PluginSet {
    /// Builds the plugins listed in the configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let highlighter = if config.plugin_enabled(PluginKind::Highlight)
        {
            Some(Highlighter::new(&config.highlight)?)
        } else {
            None
        };
        let chart = config
            .plugin_enabled(PluginKind::Chart)
            .then(ChartRenderer::new);
        Ok(Self::with_plugins(highlighter, chart))
    }

    /// Assembles a plugin set from already constructed plugins.
    pub fn with_plugins(
        highlighter: Option<Highlighter>,
        chart: Option<ChartRenderer>,
    ) -> Self {
        Self { highlighter, chart }
    }

    /// A plugin set with no plugins; every fenced block renders plainly.
    pub fn none() -> Self {
        Self::default()
    }

    /// A plugin set with only the chart renderer.
    pub fn chart_only() -> Self {
        Self::with_plugins(None, Some(ChartRenderer::new()))
    }

    /// The highlighter, when the highlight plugin is active.
    pub fn highlighter(&self) -> Option<&Highlighter> {
        self.highlighter.as_ref()
    }

    /// Renders a fenced block whose info string starts with `language`.
    pub fn render_block(
        &self,
        language: Option<&str>,
        code: &str,
    ) -> BlockOutput {
        if let (Some(chart), Some("chart")) = (&self.chart, language) {
            return chart.render(code);
        }
        let html = match &self.highlighter {
            Some(highlighter) => highlighter.highlight(code, language),
            None => plain_code_block(code),
        };
        BlockOutput {
            html,
            warnings: Vec::new(),
        }
    }
}

/// A code block with no highlighting, contents HTML-escaped.
pub fn plain_code_block(code: &str) -> String {
    format!("<pre><code>{}</code></pre>\n", handlebars::html_escape(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_kind_parse() {
        assert_eq!("Chart".parse::<PluginKind>().unwrap(), PluginKind::Chart);
        assert_eq!(
            " highlight ".parse::<PluginKind>().unwrap(),
            PluginKind::Highlight
        );
        assert!("mermaid".parse::<PluginKind>().is_err());
        assert_eq!(PluginKind::Chart.to_string(), "chart");
    }

    #[test]
    fn test_no_plugins_renders_plain() {
        let plugins = PluginSet::none();
        let output = plugins.render_block(Some("chart"), "a, b\nx, 1\n");
        assert_eq!(
            output.html,
            "<pre><code>a, b\nx, 1\n</code></pre>\n"
        );
        assert!(output.warnings.is_empty());
    }

    #[test]
    fn test_from_config_respects_plugin_list() {
        let config = Config {
            plugins: vec![PluginKind::Chart],
            ..Default::default()
        };
        let plugins = PluginSet::from_config(&config).unwrap();
        assert!(plugins.highlighter().is_none());
        let output = plugins.render_block(Some("chart"), "a, b\nx, 1\n");
        assert!(output.html.contains("<svg"));
    }
}
