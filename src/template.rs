//! # Template Rendering Module
//!
//! Layouts are Handlebars templates loaded once per build from the template
//! directory. A layout's name is its path relative to that directory without
//! the extension (`post`, `partials/header`). Every layout is also registered
//! as a partial, so one layout can wrap another with
//! `{{#> base}}...{{/base}}`.
//!
//! ## Features
//!
//! - Strict mode: an undefined variable fails the render
//! - Date, slug and tag URL helpers
//! - Page and tag page contexts built from documents and collections

use std::path::{Path, PathBuf};

use handlebars::{
    Context, Handlebars, Helper, Output, RenderContext, RenderError,
    RenderErrorReason,
};
use serde_json::{json, Map, Value as JsonValue};
use walkdir::WalkDir;

use crate::collections::{PostSummary, TagEntry};
use crate::content::{parse_date, slugify, tag_url, Document};
use crate::core::config::TemplateConfig;
use crate::core::error::{ProcessingError, Result};
use crate::core::traits::IntoContext;

/// Extensions recognised as layout files.
const TEMPLATE_EXTENSIONS: &[&str] = &["hbs", "handlebars", "html"];

/// Front-matter keys that are always present in a page context.
const STANDARD_KEYS: &[&str] =
    &["title", "date", "tags", "description", "featuredImage"];

/// Represents a custom template helper with helper name and execution.
pub trait TemplateHelper: Send + Sync {
    /// Executes the helper with the given parameters and context.
    fn execute(
        &self,
        params: &[JsonValue],
        context: &JsonValue,
    ) -> Result<JsonValue>;

    /// Returns the name of the helper for registration.
    fn name(&self) -> &str;
}

/// Renderer for the layouts of one build.
pub struct HandlebarsRenderer {
    engine: Handlebars<'static>,
    template_dir: PathBuf,
    layouts: Vec<String>,
    strict_mode: bool,
}

impl std::fmt::Debug for HandlebarsRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlebarsRenderer")
            .field("template_dir", &self.template_dir)
            .field("layouts", &self.layouts)
            .field("strict_mode", &self.strict_mode)
            .finish()
    }
}

impl HandlebarsRenderer {
    /// Creates a renderer with no layouts and the built-in helpers.
    pub fn new(options: &TemplateConfig) -> Self {
        let mut engine = Handlebars::new();
        engine.register_escape_fn(handlebars::html_escape);
        engine.set_strict_mode(options.strict_mode);
        engine.set_prevent_indent(options.prevent_indent);

        let mut renderer = Self {
            engine,
            template_dir: PathBuf::new(),
            layouts: Vec::new(),
            strict_mode: options.strict_mode,
        };
        renderer.register_helper(helpers::ReadableDate::new(
            &options.date_format,
        ));
        renderer.register_helper(helpers::HtmlDate);
        renderer.register_helper(helpers::Slugify);
        renderer.register_helper(helpers::TagUrl);
        renderer
    }

    /// Creates a renderer and loads every layout under `template_dir`.
    pub fn from_dir(
        template_dir: &Path,
        options: &TemplateConfig,
    ) -> Result<Self> {
        let mut renderer = Self::new(options);
        renderer.template_dir = template_dir.to_path_buf();
        renderer.load_templates()?;
        Ok(renderer)
    }

    /// Registers `source` as both a layout and a partial named `name`.
    pub fn with_layout(mut self, name: &str, source: &str) -> Result<Self> {
        self.register_layout(name, source)?;
        Ok(self)
    }

    /// Registers a custom helper with the renderer.
    pub fn with_helper<H>(mut self, helper: H) -> Self
    where
        H: TemplateHelper + 'static,
    {
        self.register_helper(helper);
        self
    }

    /// True when a layout named `name` was loaded.
    pub fn has_layout(&self, name: &str) -> bool {
        self.engine.has_template(name)
    }

    /// Names of the loaded layouts, sorted.
    pub fn layouts(&self) -> &[String] {
        &self.layouts
    }

    /// Renders `layout` with `context`; `document` names the page in errors.
    pub fn render(
        &self,
        layout: &str,
        context: &JsonValue,
        document: &Path,
    ) -> Result<String> {
        if !self.has_layout(layout) {
            return Err(ProcessingError::template(
                format!(
                    "unknown layout `{}` requested by {}",
                    layout,
                    document.display()
                ),
                layout,
                None,
            ));
        }

        self.engine.render(layout, context).map_err(|e| {
            ProcessingError::template(
                format!("rendering {} failed: {}", document.display(), e),
                layout,
                Some(Box::new(e)),
            )
        })
    }

    fn load_templates(&mut self) -> Result<()> {
        let walker = WalkDir::new(&self.template_dir)
            .follow_links(true)
            .sort_by_file_name();

        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e
                    .path()
                    .unwrap_or(&self.template_dir)
                    .to_path_buf();
                ProcessingError::file_operation(
                    "failed to read template directory",
                    path,
                    Some(Box::new(e)),
                )
            })?;
            let path = entry.path();
            if !entry.file_type().is_file() || !is_template_file(path) {
                continue;
            }

            let name = layout_name(&self.template_dir, path).ok_or_else(
                || {
                    ProcessingError::template(
                        "invalid template filename",
                        path.display().to_string(),
                        None,
                    )
                },
            )?;
            let source = std::fs::read_to_string(path)
                .map_err(|e| ProcessingError::io_error(path, e))?;
            self.register_layout(&name, &source)?;
            log::trace!("loaded layout `{}` from {}", name, path.display());
        }

        log::debug!(
            "loaded {} layouts from {}",
            self.layouts.len(),
            self.template_dir.display()
        );
        Ok(())
    }

    fn register_layout(&mut self, name: &str, source: &str) -> Result<()> {
        self.engine
            .register_template_string(name, source)
            .map_err(|e| {
                ProcessingError::template(
                    format!("failed to parse layout: {}", e),
                    name,
                    Some(Box::new(e)),
                )
            })?;
        self.engine.register_partial(name, source).map_err(|e| {
            ProcessingError::template(
                format!("failed to register partial: {}", e),
                name,
                Some(Box::new(e)),
            )
        })?;

        if let Err(pos) = self.layouts.binary_search_by(|n| n.as_str().cmp(name))
        {
            self.layouts.insert(pos, name.to_string());
        }
        Ok(())
    }

    /// Registers a helper function with the Handlebars engine.
    fn register_helper<H>(&mut self, helper: H)
    where
        H: TemplateHelper + 'static,
    {
        let name = helper.name().to_string();
        let helper_fn = move |h: &Helper<'_>,
                              _: &Handlebars<'_>,
                              ctx: &Context,
                              _: &mut RenderContext<'_, '_>,
                              out: &mut dyn Output|
              -> std::result::Result<(), RenderError> {
            let params: Vec<JsonValue> =
                h.params().iter().map(|p| p.value().clone()).collect();

            let result =
                helper.execute(&params, ctx.data()).map_err(|e| {
                    RenderError::from(RenderErrorReason::Other(
                        e.to_string(),
                    ))
                })?;
            match result {
                JsonValue::Null => {}
                JsonValue::String(text) => {
                    out.write(&handlebars::html_escape(&text))?
                }
                other => out.write(&other.to_string())?,
            }
            Ok(())
        };

        self.engine.register_helper(&name, Box::new(helper_fn));
    }
}

fn is_template_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| TEMPLATE_EXTENSIONS.contains(&ext))
}

fn layout_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?.with_extension("");
    let parts: Option<Vec<&str>> =
        relative.components().map(|c| c.as_os_str().to_str()).collect();
    let name = parts?.join("/");
    (!name.is_empty()).then_some(name)
}

/// Context for a content page.
#[derive(Debug)]
pub struct PageContext<'a> {
    document: &'a Document,
    metadata: JsonValue,
    content: &'a str,
    site: &'a JsonValue,
    collections: &'a JsonValue,
}

impl<'a> PageContext<'a> {
    /// Collects everything a layout sees for `document`.
    pub fn new(
        document: &'a Document,
        content: &'a str,
        site: &'a JsonValue,
        collections: &'a JsonValue,
    ) -> Result<Self> {
        Ok(Self {
            document,
            metadata: document.metadata_json()?,
            content,
            site,
            collections,
        })
    }
}

impl IntoContext for PageContext<'_> {
    fn into_context(self) -> JsonValue {
        let mut context = match self.metadata {
            JsonValue::Object(map) => map,
            _ => Map::new(),
        };
        for key in STANDARD_KEYS {
            _ = context.entry(key.to_string()).or_insert(JsonValue::Null);
        }

        let target = &self.document.target;
        let date = self
            .document
            .meta
            .date
            .map(|d| d.format("%Y-%m-%d").to_string());
        _ = context.insert(
            "content".to_string(),
            JsonValue::String(self.content.to_string()),
        );
        _ = context.insert(
            "page".to_string(),
            json!({
                "url": target.url,
                "input_path": self.document.path.display().to_string(),
                "output_path": target.path.display().to_string(),
                "slug": self.document.slug(),
                "date": date,
            }),
        );
        _ = context.insert("site".to_string(), self.site.clone());
        _ = context
            .insert("collections".to_string(), self.collections.clone());
        JsonValue::Object(context)
    }
}

/// Context for a generated tag listing page.
#[derive(Debug)]
pub struct TagPageContext<'a> {
    tag: &'a TagEntry,
    posts: &'a [PostSummary],
    output_path: &'a Path,
    site: &'a JsonValue,
    collections: &'a JsonValue,
}

impl<'a> TagPageContext<'a> {
    /// Collects what the `tag` layout sees for one tag.
    pub fn new(
        tag: &'a TagEntry,
        posts: &'a [PostSummary],
        output_path: &'a Path,
        site: &'a JsonValue,
        collections: &'a JsonValue,
    ) -> Self {
        Self {
            tag,
            posts,
            output_path,
            site,
            collections,
        }
    }
}

impl IntoContext for TagPageContext<'_> {
    fn into_context(self) -> JsonValue {
        let url = tag_url(&self.tag.name);
        json!({
            "title": self.tag.name,
            "tag": self.tag.name,
            "posts": self.posts,
            "page": {
                "url": url,
                "input_path": JsonValue::Null,
                "output_path": self.output_path.display().to_string(),
                "slug": self.tag.slug,
                "date": JsonValue::Null,
            },
            "site": self.site,
            "collections": self.collections,
        })
    }
}

/// Built-in helpers for template processing.
pub mod helpers {
    use super::*;

    fn first_string<'p>(
        params: &'p [JsonValue],
        helper: &str,
    ) -> Result<Option<&'p str>> {
        match params.first() {
            None => Err(ProcessingError::template(
                format!("`{}` expects one argument", helper),
                helper,
                None,
            )),
            Some(JsonValue::Null) => Ok(None),
            Some(JsonValue::String(text)) => Ok(Some(text)),
            Some(other) => Err(ProcessingError::template(
                format!("`{}` expects a string, got {}", helper, other),
                helper,
                None,
            )),
        }
    }

    fn format_date(
        params: &[JsonValue],
        helper: &str,
        format: &str,
    ) -> Result<JsonValue> {
        let Some(text) = first_string(params, helper)? else {
            return Ok(JsonValue::Null);
        };
        let date = parse_date(text).ok_or_else(|| {
            ProcessingError::template(
                format!("`{}` cannot parse date '{}'", helper, text),
                helper,
                None,
            )
        })?;
        Ok(JsonValue::String(date.format(format).to_string()))
    }

    /// `{{readable_date date}}` in the configured format.
    #[derive(Debug, Clone)]
    pub struct ReadableDate {
        format: String,
    }

    impl ReadableDate {
        /// A helper formatting with the strftime pattern `format`.
        pub fn new(format: &str) -> Self {
            Self {
                format: format.to_string(),
            }
        }
    }

    impl TemplateHelper for ReadableDate {
        fn execute(
            &self,
            params: &[JsonValue],
            _context: &JsonValue,
        ) -> Result<JsonValue> {
            format_date(params, self.name(), &self.format)
        }

        fn name(&self) -> &str {
            "readable_date"
        }
    }

    /// `{{html_date date}}`: `YYYY-MM-DD`, for `<time datetime>`.
    #[derive(Debug, Clone, Copy)]
    pub struct HtmlDate;

    impl TemplateHelper for HtmlDate {
        fn execute(
            &self,
            params: &[JsonValue],
            _context: &JsonValue,
        ) -> Result<JsonValue> {
            format_date(params, self.name(), "%Y-%m-%d")
        }

        fn name(&self) -> &str {
            "html_date"
        }
    }

    /// `{{slugify text}}`
    #[derive(Debug, Clone, Copy)]
    pub struct Slugify;

    impl TemplateHelper for Slugify {
        fn execute(
            &self,
            params: &[JsonValue],
            _context: &JsonValue,
        ) -> Result<JsonValue> {
            Ok(first_string(params, self.name())?
                .map(|text| JsonValue::String(slugify(text)))
                .unwrap_or(JsonValue::Null))
        }

        fn name(&self) -> &str {
            "slugify"
        }
    }

    /// `{{tag_url tag}}`
    #[derive(Debug, Clone, Copy)]
    pub struct TagUrl;

    impl TemplateHelper for TagUrl {
        fn execute(
            &self,
            params: &[JsonValue],
            _context: &JsonValue,
        ) -> Result<JsonValue> {
            Ok(first_string(params, self.name())?
                .map(|tag| JsonValue::String(tag_url(tag)))
                .unwrap_or(JsonValue::Null))
        }

        fn name(&self) -> &str {
            "tag_url"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::Collections;
    use std::fs;
    use tempfile::TempDir;

    fn document(raw: &str) -> Document {
        let root = Path::new("content");
        Document::from_source(root, &root.join("posts/hello.md"), raw, true)
            .unwrap()
    }

    fn render_page(
        renderer: &HandlebarsRenderer,
        layout: &str,
        raw: &str,
    ) -> Result<String> {
        let doc = document(raw);
        let site = json!({"title": "Notes"});
        let collections =
            Collections::build(std::slice::from_ref(&doc)).to_context();
        let context = PageContext::new(&doc, "<p>Body</p>", &site, &collections)?
            .into_context();
        renderer.render(layout, &context, &doc.path)
    }

    #[test]
    fn test_page_context_fields() {
        let renderer = HandlebarsRenderer::new(&TemplateConfig::default())
            .with_layout(
                "post",
                "<h1>{{title}}</h1>{{{content}}}|{{page.url}}|{{site.title}}|{{mood}}|{{#if description}}d{{else}}nd{{/if}}",
            )
            .unwrap();

        let html = render_page(
            &renderer,
            "post",
            "---\ntitle: Hello & bye\nmood: calm\n---\nbody\n",
        )
        .unwrap();
        assert_eq!(
            html,
            "<h1>Hello &amp; bye</h1><p>Body</p>|/posts/hello/|Notes|calm|nd"
        );
    }

    #[test]
    fn test_strict_mode_rejects_missing_variable() {
        let renderer = HandlebarsRenderer::new(&TemplateConfig::default())
            .with_layout("post", "{{subtitle}}")
            .unwrap();
        let err = render_page(&renderer, "post", "body\n").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("post"));
        assert!(message.contains("posts/hello.md"));
    }

    #[test]
    fn test_lenient_mode_renders_missing_as_empty() {
        let options = TemplateConfig {
            strict_mode: false,
            ..Default::default()
        };
        let renderer = HandlebarsRenderer::new(&options)
            .with_layout("post", "[{{subtitle}}]")
            .unwrap();
        assert_eq!(render_page(&renderer, "post", "body\n").unwrap(), "[]");
    }

    #[test]
    fn test_unknown_layout_names_document() {
        let renderer = HandlebarsRenderer::new(&TemplateConfig::default());
        let err = render_page(&renderer, "gallery", "body\n").unwrap_err();
        assert!(err.to_string().contains("gallery"));
        assert!(err.to_string().contains("posts/hello.md"));
    }

    #[test]
    fn test_helpers() {
        let renderer = HandlebarsRenderer::new(&TemplateConfig::default())
            .with_layout(
                "post",
                "{{readable_date date}}|{{html_date date}}|{{#each tags}}{{tag_url this}} {{/each}}|{{slugify title}}",
            )
            .unwrap();
        let html = render_page(
            &renderer,
            "post",
            "---\ntitle: Hello World\ndate: 2024-03-05\ntags: [Rust Lang]\n---\n",
        )
        .unwrap();
        assert_eq!(
            html,
            "March 5, 2024|2024-03-05|/tags/rust-lang/ |hello-world"
        );
    }

    #[derive(Debug)]
    struct Shout;

    impl TemplateHelper for Shout {
        fn execute(
            &self,
            params: &[JsonValue],
            _context: &JsonValue,
        ) -> Result<JsonValue> {
            let text = params.first().and_then(JsonValue::as_str).unwrap_or("");
            Ok(JsonValue::String(format!("{}!", text.to_uppercase())))
        }

        fn name(&self) -> &str {
            "shout"
        }
    }

    #[test]
    fn test_custom_helper_output_is_escaped() {
        let renderer = HandlebarsRenderer::new(&TemplateConfig::default())
            .with_helper(Shout)
            .with_layout("post", "<h1>{{shout title}}</h1>")
            .unwrap();
        let html = render_page(&renderer, "post", "---\ntitle: a <b>\n---\n")
            .unwrap();
        assert_eq!(html, "<h1>A &lt;B&gt;!</h1>");
    }

    #[test]
    fn test_layouts_load_recursively_as_partials() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("partials")).unwrap();
        fs::write(
            root.join("base.hbs"),
            "<main>{{> @partial-block}}</main>",
        )
        .unwrap();
        fs::write(root.join("partials/footer.html"), "<footer/>").unwrap();
        fs::write(
            root.join("post.hbs"),
            "{{#> base}}{{{content}}}{{> partials/footer}}{{/base}}",
        )
        .unwrap();
        fs::write(root.join("notes.txt"), "ignored").unwrap();

        let renderer =
            HandlebarsRenderer::from_dir(root, &TemplateConfig::default())
                .unwrap();
        assert_eq!(renderer.layouts(), ["base", "partials/footer", "post"]);
        assert!(!renderer.has_layout("notes"));

        let html = render_page(&renderer, "post", "body\n").unwrap();
        assert_eq!(html, "<main><p>Body</p><footer/></main>");
    }

    #[test]
    fn test_invalid_layout_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("post.hbs"), "{{#if}}").unwrap();
        let err = HandlebarsRenderer::from_dir(
            temp_dir.path(),
            &TemplateConfig::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("post"));
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let renderer = HandlebarsRenderer::new(&TemplateConfig::default())
            .with_layout("post", "{{#each collections.posts}}{{url}}{{/each}}")
            .unwrap();
        let raw = "---\ntitle: T\ndate: 2024-01-01\n---\n";
        let first = render_page(&renderer, "post", raw).unwrap();
        let second = render_page(&renderer, "post", raw).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, "/posts/hello/");
    }
}
