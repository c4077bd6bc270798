//! # Markdown Processing Module
//!
//! Converts a document body to an HTML fragment with `pulldown-cmark`,
//! routing fenced code blocks through the active [`PluginSet`] and giving
//! every heading a stable `id`.
//!
//! Raw HTML in the body is passed through untouched; the body is never run
//! through the layout engine.
//!
//! ## Example Usage
//!
//! ```rust
//! use postflow::core::traits::Processor;
//! use postflow::processors::{markdown::MarkdownProcessor, PluginSet};
//!
//! let processor = MarkdownProcessor::new(PluginSet::none())
//!     .with_tables(true)
//!     .with_footnotes(true)
//!     .with_strikethrough(true);
//!
//! let rendered = processor
//!     .process("# Hello World\n\nThis is **markdown**.".to_string(), None)
//!     .unwrap();
//! assert!(rendered.html.contains("<h1 id=\"hello-world\">"));
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pulldown_cmark::{
    html, CodeBlockKind, CowStr, Event, Options as MarkdownOptions,
    Parser, Tag, TagEnd,
};

use crate::content::slugify;
use crate::core::{error::Result, traits::Processor};
use crate::processors::PluginSet;

/// A rendered document body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderedBody {
    /// The HTML fragment.
    pub html: String,
    /// Recoverable problems reported by plugins, prefixed with the document path.
    pub warnings: Vec<String>,
}

/// Processor for Markdown content.
#[derive(Debug, Clone)]
pub struct MarkdownProcessor {
    options: MarkdownOptions,
    plugins: Arc<PluginSet>,
}

impl MarkdownProcessor {
    /// Creates a processor that dispatches fenced blocks to `plugins`.
    pub fn new<P: Into<Arc<PluginSet>>>(plugins: P) -> Self {
        Self {
            options: MarkdownOptions::ENABLE_HEADING_ATTRIBUTES,
            plugins: plugins.into(),
        }
    }

    /// Creates the processor used for site builds: tables, footnotes and
    /// strikethrough enabled.
    pub fn for_site<P: Into<Arc<PluginSet>>>(plugins: P) -> Self {
        Self::new(plugins)
            .with_tables(true)
            .with_footnotes(true)
            .with_strikethrough(true)
    }

    /// Enables table support in Markdown processing.
    pub fn with_tables(mut self, enable: bool) -> Self {
        self.options.set(MarkdownOptions::ENABLE_TABLES, enable);
        self
    }

    /// Enables strikethrough support in Markdown processing.
    pub fn with_strikethrough(mut self, enable: bool) -> Self {
        self.options
            .set(MarkdownOptions::ENABLE_STRIKETHROUGH, enable);
        self
    }

    /// Enables footnote support in Markdown processing.
    pub fn with_footnotes(mut self, enable: bool) -> Self {
        self.options.set(MarkdownOptions::ENABLE_FOOTNOTES, enable);
        self
    }

    /// The plugins this processor dispatches to.
    pub fn plugins(&self) -> &PluginSet {
        &self.plugins
    }

    /// Renders `body`, attributing plugin warnings to `document`.
    pub fn render(&self, body: &str, document: &Path) -> RenderedBody {
        let mut warnings = Vec::new();
        let mut heading_ids = HeadingIds::default();
        for event in Parser::new_ext(body, self.options) {
            if let Event::Start(Tag::Heading { id: Some(id), .. }) = event {
                heading_ids.reserve(&id);
            }
        }
        let mut events: Vec<Event<'_>> = Vec::new();
        let mut parser = Parser::new_ext(body, self.options);

        while let Some(event) = parser.next() {
            match event {
                Event::Start(Tag::CodeBlock(kind)) => {
                    let language = match &kind {
                        CodeBlockKind::Fenced(info) => info
                            .split(|c: char| c.is_whitespace() || c == ',')
                            .next()
                            .filter(|lang| !lang.is_empty())
                            .map(str::to_string),
                        CodeBlockKind::Indented => None,
                    };

                    let mut code = String::new();
                    for inner in parser.by_ref() {
                        match inner {
                            Event::End(TagEnd::CodeBlock) => break,
                            Event::Text(text) => code.push_str(&text),
                            _ => {}
                        }
                    }

                    let output =
                        self.plugins.render_block(language.as_deref(), &code);
                    warnings.extend(output.warnings.into_iter().map(
                        |warning| {
                            format!("{}: {}", document.display(), warning)
                        },
                    ));
                    events.push(Event::Html(CowStr::from(output.html)));
                }
                Event::Start(Tag::Heading {
                    level,
                    id,
                    classes,
                    attrs,
                }) => {
                    let mut inner = Vec::new();
                    let mut text = String::new();
                    for event in parser.by_ref() {
                        let end =
                            matches!(event, Event::End(TagEnd::Heading(_)));
                        if let Event::Text(t) | Event::Code(t) = &event {
                            text.push_str(t);
                        }
                        inner.push(event);
                        if end {
                            break;
                        }
                    }

                    let id = id.unwrap_or_else(|| {
                        CowStr::from(
                            heading_ids.unique(self.generate_heading_id(&text)),
                        )
                    });
                    events.push(Event::Start(Tag::Heading {
                        level,
                        id: Some(id),
                        classes,
                        attrs,
                    }));
                    events.extend(inner);
                }
                other => events.push(other),
            }
        }

        let mut html_output = String::with_capacity(body.len() * 2);
        html::push_html(&mut html_output, events.into_iter());

        RenderedBody {
            html: html_output,
            warnings,
        }
    }

    /// Generates an ID for a heading.
    fn generate_heading_id(&self, text: &str) -> String {
        let slug = slugify(text);
        if slug.is_empty() {
            "section".to_string()
        } else {
            slug
        }
    }
}

/// Heading ids handed out on one page. Explicit `{#id}` attributes are
/// reserved up front so generated ids never repeat them.
#[derive(Debug, Default)]
struct HeadingIds {
    used: HashSet<String>,
    next: HashMap<String, usize>,
}

impl HeadingIds {
    fn reserve(&mut self, id: &str) {
        _ = self.used.insert(id.to_string());
    }

    fn unique(&mut self, base: String) -> String {
        let counter = self.next.entry(base.clone()).or_insert(0);
        loop {
            let id = if *counter == 0 {
                base.clone()
            } else {
                format!("{}-{}", base, counter)
            };
            *counter += 1;
            if self.used.insert(id.clone()) {
                return id;
            }
        }
    }
}

impl Default for MarkdownProcessor {
    fn default() -> Self {
        Self::new(PluginSet::none())
    }
}

impl Processor for MarkdownProcessor {
    type Input = String;
    type Output = RenderedBody;
    type Context = PathBuf;

    fn process(
        &self,
        content: String,
        context: Option<&Self::Context>,
    ) -> Result<Self::Output> {
        let document = context
            .map(PathBuf::as_path)
            .unwrap_or_else(|| Path::new("<inline>"));
        Ok(self.render(&content, document))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::HighlightConfig;
    use crate::processors::chart::ChartRenderer;
    use crate::processors::highlight::Highlighter;

    fn all_plugins() -> PluginSet {
        PluginSet::with_plugins(
            Some(Highlighter::new(&HighlightConfig::default()).unwrap()),
            Some(ChartRenderer::new()),
        )
    }

    #[test]
    fn test_markdown_processor_basic() {
        let processor = MarkdownProcessor::default();
        let input = "# Test\n\nThis is a **test**.";
        let result = processor.process(input.to_owned(), None).unwrap();
        assert!(result.html.contains("<h1 id=\"test\">"));
        assert!(result.html.contains("<strong>"));
    }

    #[test]
    fn test_markdown_processor_with_options() {
        let processor = MarkdownProcessor::for_site(PluginSet::none());

        let input =
            "# Test\n\n| A | B |\n|---|---|\n| 1 | 2 |\n\n~~strike~~";
        let result = processor.process(input.to_owned(), None).unwrap();
        assert!(result.html.contains("<table>"));
        assert!(result.html.contains("<del>"));
    }

    #[test]
    fn test_heading_ids_are_unique() {
        let processor = MarkdownProcessor::default();
        let result = processor.render(
            "## Setup\n\n## Setup\n\n## `cargo` Notes {#custom}\n\n## !!!\n",
            Path::new("post.md"),
        );
        assert!(result.html.contains("<h2 id=\"setup\">"));
        assert!(result.html.contains("<h2 id=\"setup-1\">"));
        assert!(result.html.contains("<h2 id=\"custom\">"));
        assert!(result.html.contains("<h2 id=\"section\">"));
    }

    #[test]
    fn test_generated_ids_skip_explicit_ones() {
        let processor = MarkdownProcessor::default();
        let result = processor.render(
            "## Setup {#setup}\n\n## Setup\n",
            Path::new("post.md"),
        );
        assert_eq!(result.html.matches("id=\"setup\"").count(), 1);
        assert!(result.html.contains("<h2 id=\"setup-1\">"));

        let result = processor.render(
            "## Setup\n\n## Install {#setup}\n\n## Setup {#setup-1}\n\n## Setup\n",
            Path::new("post.md"),
        );
        assert_eq!(result.html.matches("id=\"setup\"").count(), 1);
        assert_eq!(result.html.matches("id=\"setup-1\"").count(), 1);
        assert!(result.html.starts_with("<h2 id=\"setup-2\">"));
        assert!(result.html.contains("<h2 id=\"setup-3\">"));
    }

    #[test]
    fn test_heading_id_generation() {
        let processor = MarkdownProcessor::default();
        let id = processor.generate_heading_id("Hello World! 123");
        assert_eq!(id, "hello-world-123");
    }

    #[test]
    fn test_fenced_blocks_are_dispatched() {
        let processor = MarkdownProcessor::new(all_plugins());
        let body = "Intro\n\n```rust\nlet x = 1;\n```\n\n```chart\nwidth: 700, height: 300\nk, v\na, 1\n```\n\n```\nno language\n```\n";
        let result = processor.render(body, Path::new("post.md"));
        assert!(result
            .html
            .contains("<pre class=\"code-block language-rust\">"));
        assert!(result.html.contains("viewBox=\"0 0 700 300\""));
        assert!(result.html.contains("<pre><code>no language\n</code></pre>"));
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_unknown_language_renders_plainly() {
        let processor = MarkdownProcessor::new(all_plugins());
        let result = processor.render(
            "```klingon\nQapla' <3\n```\n",
            Path::new("post.md"),
        );
        assert!(result
            .html
            .contains("<pre><code>Qapla&#x27; &lt;3\n</code></pre>"));
        assert!(!result.html.contains("code-block"));
    }

    #[test]
    fn test_chart_warnings_name_document() {
        let processor = MarkdownProcessor::new(all_plugins());
        let result = processor.render(
            "```chart\nk, v\na, nope\nb, 2\n```\n",
            Path::new("posts/stats.md"),
        );
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].starts_with("posts/stats.md: chart line 2"));
    }

    #[test]
    fn test_raw_html_passes_through() {
        let processor = MarkdownProcessor::default();
        let result = processor.render(
            "<div class=\"note\">hi</div>\n",
            Path::new("post.md"),
        );
        assert!(result.html.contains("<div class=\"note\">hi</div>"));
    }
}
