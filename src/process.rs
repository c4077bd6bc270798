// Copyright © 2024 Postflow. All rights reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! # Build Orchestration
//!
//! A [`Pipeline`] owns everything one site build needs: the configuration,
//! the loaded layouts, the Markdown processor with its plugins and the output
//! generator. A full build moves through the stages in [`BuildStage`]:
//!
//! 1. **Scanning**: every document is read and parsed. A bad front-matter
//!    block aborts the build here, before anything is written.
//! 2. **Rendering**: pages render in parallel into memory.
//! 3. **PostProcessing**: HTML pages are minified.
//! 4. **Written**: pages, passthrough assets and the highlight stylesheet
//!    land in the output directory.
//!
//! After a build the pipeline remembers the documents it published, so that
//! watch mode can re-render a single page when nothing other pages depend on
//! has changed.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rayon::prelude::*;
use serde_json::Value as JsonValue;

use crate::collections::Collections;
use crate::content::{scan_documents, tag_url, Document};
use crate::core::config::Config;
use crate::core::error::{ProcessingError, Result};
use crate::core::traits::{Generator, IntoContext};
use crate::generators::html::HtmlGenerator;
use crate::processors::markdown::MarkdownProcessor;
use crate::processors::PluginSet;
use crate::template::{HandlebarsRenderer, PageContext, TagPageContext};

/// Layout used for generated tag pages, when the site provides one.
pub const TAG_LAYOUT: &str = "tag";

/// Where the pipeline is in a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildStage {
    /// No build running.
    #[default]
    Idle,
    /// Reading and parsing documents.
    Scanning,
    /// Rendering pages in memory.
    Rendering,
    /// Minifying rendered pages.
    PostProcessing,
    /// Writing pages and assets.
    Written,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildStage::Idle => "idle",
            BuildStage::Scanning => "scanning",
            BuildStage::Rendering => "rendering",
            BuildStage::PostProcessing => "post-processing",
            BuildStage::Written => "written",
        };
        f.write_str(name)
    }
}

/// Summary of a build.
#[derive(Debug, Default)]
pub struct BuildReport {
    /// Content pages written.
    pub pages: usize,
    /// Tag listing pages written.
    pub tag_pages: usize,
    /// Passthrough files copied.
    pub assets: usize,
    /// Draft documents left out.
    pub drafts_skipped: usize,
    warnings: Mutex<Vec<String>>,
}

impl BuildReport {
    /// Records and logs a recoverable problem.
    pub fn warn(&self, warning: String) {
        log::warn!("{}", warning);
        self.warnings.lock().push(warning);
    }

    /// Warnings recorded so far, in the order they were raised.
    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().clone()
    }
}

/// A page rendered in memory, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPage {
    /// Source document, `None` for generated pages.
    pub source: Option<PathBuf>,
    /// Output path relative to the output directory.
    pub path: PathBuf,
    /// Public URL.
    pub url: String,
    /// Final markup.
    pub html: String,
}

/// What an incremental update did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildOutcome {
    /// Only the page at this output path was re-rendered.
    Page(PathBuf),
    /// The whole site was rebuilt.
    Site,
    /// The output at this path was removed.
    Removed(PathBuf),
    /// A passthrough file was copied or removed at this output path.
    Asset(PathBuf),
    /// Nothing needed doing.
    Skipped,
}

#[derive(Debug, Default)]
struct SiteState {
    documents: BTreeMap<PathBuf, Document>,
    collections: JsonValue,
}

/// Builds a site from its configuration.
#[derive(Debug)]
pub struct Pipeline {
    config: Config,
    renderer: HandlebarsRenderer,
    markdown: MarkdownProcessor,
    generator: HtmlGenerator,
    site: JsonValue,
    stage: BuildStage,
    state: Option<SiteState>,
}

impl Pipeline {
    /// Loads layouts and plugins for `config`.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let renderer =
            HandlebarsRenderer::from_dir(&config.template_dir, &config.template)?;
        let markdown = MarkdownProcessor::for_site(PluginSet::from_config(&config)?);
        let generator = HtmlGenerator::new(&config.output_dir)
            .with_minification(config.output.minify);
        let site = config.site_context();

        Ok(Self {
            config,
            renderer,
            markdown,
            generator,
            site,
            stage: BuildStage::Idle,
            state: None,
        })
    }

    /// The configuration this pipeline was built from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The current stage.
    pub fn stage(&self) -> BuildStage {
        self.stage
    }

    /// Runs a full build.
    pub fn build(&mut self) -> Result<BuildReport> {
        let result = self.run_build();
        self.set_stage(BuildStage::Idle);
        result
    }

    fn set_stage(&mut self, stage: BuildStage) {
        log::debug!("build stage: {} -> {}", self.stage, stage);
        self.stage = stage;
    }

    fn run_build(&mut self) -> Result<BuildReport> {
        let mut report = BuildReport::default();

        self.set_stage(BuildStage::Scanning);
        let mut documents = scan_documents(&self.config)?;
        let scanned = documents.len();
        if !self.config.content.drafts {
            documents.retain(|doc| !doc.meta.draft);
        }
        report.drafts_skipped = scanned - documents.len();

        let collections = Collections::build(&documents);
        let tag_pages_enabled = self.renderer.has_layout(TAG_LAYOUT);
        let tag_paths: Vec<PathBuf> = if tag_pages_enabled {
            collections
                .tags()
                .iter()
                .map(|entry| tag_page_path(&entry.slug))
                .collect()
        } else {
            Vec::new()
        };
        check_output_conflicts(&documents, &tag_paths)?;
        let collections_context = collections.to_context();

        self.set_stage(BuildStage::Rendering);
        let mut pages = documents
            .par_iter()
            .map(|doc| self.render_document(doc, &collections_context, &report))
            .collect::<Result<Vec<_>>>()?;
        report.pages = pages.len();

        if tag_pages_enabled {
            let tag_pages = collections
                .tags()
                .iter()
                .collect::<Vec<_>>()
                .into_par_iter()
                .map(|entry| {
                    let path = tag_page_path(&entry.slug);
                    let context = TagPageContext::new(
                        entry,
                        collections.posts_for_tag(&entry.slug),
                        &path,
                        &self.site,
                        &collections_context,
                    )
                    .into_context();
                    let html = self.renderer.render(TAG_LAYOUT, &context, &path)?;
                    Ok(RenderedPage {
                        source: None,
                        url: tag_url(&entry.name),
                        path,
                        html,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            report.tag_pages = tag_pages.len();
            pages.extend(tag_pages);
        }

        self.set_stage(BuildStage::PostProcessing);
        pages.par_iter_mut().try_for_each(|page| -> Result<()> {
            page.html = self.generator.post_process(&page.html, &page.path)?;
            Ok(())
        })?;

        self.set_stage(BuildStage::Written);
        if self.config.output.clean {
            self.generator.clean()?;
        }
        for page in &pages {
            _ = self.generator.write(&page.path, page.html.as_bytes())?;
        }
        report.assets = self.copy_passthrough()?;
        if let Some(path) = self.write_stylesheet()? {
            log::debug!("wrote highlight stylesheet {}", path.display());
        }

        self.state = Some(SiteState {
            documents: documents
                .into_iter()
                .map(|doc| (doc.path.clone(), doc))
                .collect(),
            collections: collections_context,
        });

        log::info!(
            "built {} pages, {} tag pages, {} assets into {} ({} warnings)",
            report.pages,
            report.tag_pages,
            report.assets,
            self.config.output_dir.display(),
            report.warnings.lock().len()
        );
        Ok(report)
    }

    /// Renders one document into memory.
    pub fn render_document(
        &self,
        document: &Document,
        collections: &JsonValue,
        report: &BuildReport,
    ) -> Result<RenderedPage> {
        let body = self.markdown.render(&document.body, &document.path);
        for warning in body.warnings {
            report.warn(warning);
        }

        let layout = document
            .meta
            .layout
            .as_deref()
            .unwrap_or(&self.config.template.default_layout);
        let context =
            PageContext::new(document, &body.html, &self.site, collections)?
                .into_context();
        let html = self
            .renderer
            .render(layout, &context, &document.source_path)?;

        log::trace!("rendered {} with `{}`", document.path.display(), layout);
        Ok(RenderedPage {
            source: Some(document.path.clone()),
            path: document.target.path.clone(),
            url: document.target.url.clone(),
            html,
        })
    }

    /// Re-reads a changed document. Only its own page is re-rendered when
    /// the fields other pages see are unchanged; otherwise the site is
    /// rebuilt.
    pub fn rebuild_document(&mut self, source_path: &Path) -> Result<RebuildOutcome> {
        if self.state.is_none() {
            _ = self.build()?;
            return Ok(RebuildOutcome::Site);
        }

        let document = Document::load(&self.config, source_path)?;
        if document.meta.draft && !self.config.content.drafts {
            return self.remove_document(source_path);
        }

        let page = match &self.state {
            Some(state) => match state.documents.get(&document.path) {
                Some(previous)
                    if previous.listing_key() == document.listing_key() =>
                {
                    let report = BuildReport::default();
                    Some(self.render_document(
                        &document,
                        &state.collections,
                        &report,
                    )?)
                }
                _ => None,
            },
            None => None,
        };

        let Some(page) = page else {
            log::debug!(
                "{} changed listing metadata, rebuilding site",
                document.path.display()
            );
            _ = self.build()?;
            return Ok(RebuildOutcome::Site);
        };

        self.generator.generate(&page.html, &page.path, None)?;
        if let Some(state) = self.state.as_mut() {
            _ = state.documents.insert(document.path.clone(), document);
        }
        log::info!("re-rendered {}", page.path.display());
        Ok(RebuildOutcome::Page(page.path))
    }

    /// Drops a deleted document and its output page.
    pub fn remove_document(&mut self, source_path: &Path) -> Result<RebuildOutcome> {
        let relative = source_path
            .strip_prefix(&self.config.content_dir)
            .map_err(|_| {
                ProcessingError::file_operation(
                    "document is outside the content directory",
                    source_path,
                    None,
                )
            })?
            .to_path_buf();

        let previous = self
            .state
            .as_mut()
            .and_then(|state| state.documents.remove(&relative));
        let Some(previous) = previous else {
            return Ok(RebuildOutcome::Skipped);
        };

        self.generator.remove(&previous.target.path)?;
        log::info!("removed {}", previous.target.path.display());

        if previous.meta.is_listable() || !previous.meta.tags.is_empty() {
            _ = self.build()?;
            return Ok(RebuildOutcome::Site);
        }
        Ok(RebuildOutcome::Removed(previous.target.path))
    }

    /// Copies a changed passthrough file, or removes its copy when the
    /// source is gone.
    pub fn copy_asset(&self, source_path: &Path) -> Result<RebuildOutcome> {
        let Some(relative) = self.passthrough_destination(source_path) else {
            return Ok(RebuildOutcome::Skipped);
        };

        if source_path.is_file() {
            _ = self.generator.copy_asset(source_path, &relative)?;
            log::info!("copied {}", relative.display());
        } else {
            self.generator.remove(&relative)?;
        }
        Ok(RebuildOutcome::Asset(relative))
    }

    /// Output path of a file inside one of the passthrough directories.
    pub fn passthrough_destination(&self, source_path: &Path) -> Option<PathBuf> {
        self.config.passthrough.iter().find_map(|dir| {
            let relative = source_path.strip_prefix(dir).ok()?;
            Some(passthrough_prefix(dir).join(relative))
        })
    }

    fn copy_passthrough(&self) -> Result<usize> {
        let mut copied = 0;
        for dir in &self.config.passthrough {
            if !dir.is_dir() {
                log::debug!(
                    "passthrough directory {} not found, skipping",
                    dir.display()
                );
                continue;
            }
            copied += self.generator.copy_tree(dir, &passthrough_prefix(dir))?;
        }
        Ok(copied)
    }

    fn write_stylesheet(&self) -> Result<Option<PathBuf>> {
        let stylesheet = self
            .markdown
            .plugins()
            .highlighter()
            .and_then(|highlighter| highlighter.stylesheet());
        match stylesheet {
            Some(css) => self
                .generator
                .write(&self.config.highlight.stylesheet, css.as_bytes())
                .map(Some),
            None => Ok(None),
        }
    }
}

fn passthrough_prefix(dir: &Path) -> PathBuf {
    dir.file_name().map(PathBuf::from).unwrap_or_default()
}

/// Output path of the listing page for the tag with `slug`.
pub fn tag_page_path(slug: &str) -> PathBuf {
    Path::new("tags").join(slug).join("index.html")
}

fn check_output_conflicts(documents: &[Document], generated: &[PathBuf]) -> Result<()> {
    let mut seen: HashMap<&Path, &Path> = HashMap::new();
    for doc in documents {
        if let Some(first) = seen.insert(&doc.target.path, &doc.source_path) {
            return Err(ProcessingError::file_operation(
                format!(
                    "output {} is also produced by {}",
                    doc.target.path.display(),
                    first.display()
                ),
                &doc.source_path,
                None,
            ));
        }
    }
    for path in generated {
        if let Some(source) = seen.get(path.as_path()) {
            return Err(ProcessingError::file_operation(
                format!("output {} collides with a generated tag page", path.display()),
                *source,
                None,
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const POST_LAYOUT: &str = "<!DOCTYPE html>\n<html>\n<head><title>{{title}}</title></head>\n<body>\n  <!-- layout -->\n  <article>{{{content}}}</article>\n  <nav>{{#each collections.posts}}<a href=\"{{url}}\">{{title}}</a>{{/each}}</nav>\n</body>\n</html>\n";
    const TAG_LAYOUT_SOURCE: &str = "<h1>{{tag}}</h1><ul>{{#each posts}}<li>{{input_path}}</li>{{/each}}</ul>";

    struct Site {
        _dir: TempDir,
        root: PathBuf,
    }

    impl Site {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let root = dir.path().to_path_buf();
            for sub in ["content/posts", "templates", "assets/img"] {
                fs::create_dir_all(root.join(sub)).unwrap();
            }
            fs::write(root.join("templates/post.hbs"), POST_LAYOUT).unwrap();
            fs::write(root.join("assets/img/dot.bin"), [0u8, 159, 146, 150]).unwrap();
            Site { _dir: dir, root }
        }

        fn write(&self, path: &str, contents: &str) {
            let path = self.root.join(path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, contents).unwrap();
        }

        fn config(&self) -> Config {
            Config {
                content_dir: self.root.join("content"),
                output_dir: self.root.join("public"),
                template_dir: self.root.join("templates"),
                passthrough: vec![self.root.join("assets")],
                ..Default::default()
            }
        }

        fn output(&self, path: &str) -> String {
            fs::read_to_string(self.root.join("public").join(path)).unwrap()
        }

        fn exists(&self, path: &str) -> bool {
            self.root.join("public").join(path).exists()
        }
    }

    fn post(title: &str, date: &str, tags: &str, body: &str) -> String {
        format!("---\ntitle: {title}\ndate: {date}\ntags: [{tags}]\n---\n{body}\n")
    }

    #[test]
    fn test_full_build_writes_site() {
        let site = Site::new();
        site.write("content/index.md", "---\ntitle: Home\n---\nWelcome\n");
        site.write(
            "content/posts/first.md",
            &post("First", "2024-01-01", "rust", "Hello"),
        );
        site.write(
            "content/posts/second.md",
            &post("Second", "2024-02-01", "rust, web", "```chart\nk, v\na, x\nb, 2\n```"),
        );
        site.write("templates/tag.hbs", TAG_LAYOUT_SOURCE);

        let mut pipeline = Pipeline::new(site.config()).unwrap();
        let report = pipeline.build().unwrap();

        assert_eq!(report.pages, 3);
        assert_eq!(report.tag_pages, 2);
        assert_eq!(report.assets, 1);
        assert_eq!(report.warnings().len(), 1);
        assert!(report.warnings()[0].contains("posts/second.md"));
        assert_eq!(pipeline.stage(), BuildStage::Idle);

        let first = site.output("posts/first/index.html");
        assert!(first.contains("<article><p>Hello</p>"));
        assert!(!first.contains("<!-- layout -->"));
        assert!(first.find("/posts/second/").unwrap() < first.find("/posts/first/").unwrap());
        assert!(site.exists("index.html"));

        let rust = site.output("tags/rust/index.html");
        assert!(rust.contains("posts/first.md"));
        assert!(rust.contains("posts/second.md"));
        let web = site.output("tags/web/index.html");
        assert!(!web.contains("posts/first.md"));

        assert_eq!(
            fs::read(site.root.join("public/assets/img/dot.bin")).unwrap(),
            [0u8, 159, 146, 150]
        );
    }

    #[test]
    fn test_bad_front_matter_aborts_before_writing() {
        let site = Site::new();
        site.write("content/good.md", "---\ntitle: Good\n---\nok\n");
        site.write("content/posts/broken.md", "---\ntitle: Broken\nbody\n");

        let mut pipeline = Pipeline::new(site.config()).unwrap();
        let err = pipeline.build().unwrap_err();
        assert!(err.to_string().contains("broken.md"));
        assert!(!site.root.join("public").exists());
        assert_eq!(pipeline.stage(), BuildStage::Idle);
    }

    #[test]
    fn test_render_error_leaves_no_partial_site() {
        let site = Site::new();
        site.write("content/a.md", "---\ntitle: A\n---\nok\n");
        site.write("content/b.md", "---\ntitle: B\nlayout: missing\n---\nok\n");

        let mut pipeline = Pipeline::new(site.config()).unwrap();
        let err = pipeline.build().unwrap_err();
        assert!(err.to_string().contains("b.md"));
        assert!(!site.exists("a/index.html"));
    }

    #[test]
    fn test_duplicate_output_is_fatal() {
        let site = Site::new();
        site.write("content/about.md", "about\n");
        site.write("content/about/index.md", "also about\n");

        let mut pipeline = Pipeline::new(site.config()).unwrap();
        let err = pipeline.build().unwrap_err();
        assert!(err.to_string().contains("about/index.html"));
    }

    #[test]
    fn test_drafts_are_skipped_unless_enabled() {
        let site = Site::new();
        site.write("content/wip.md", "---\ntitle: WIP\ndraft: true\n---\nsoon\n");

        let mut pipeline = Pipeline::new(site.config()).unwrap();
        let report = pipeline.build().unwrap();
        assert_eq!(report.pages, 0);
        assert_eq!(report.drafts_skipped, 1);
        assert!(!site.exists("wip/index.html"));

        let mut config = site.config();
        config.content.drafts = true;
        let report = Pipeline::new(config).unwrap().build().unwrap();
        assert_eq!(report.pages, 1);
        assert!(site.exists("wip/index.html"));
    }

    #[test]
    fn test_builds_are_deterministic() {
        let site = Site::new();
        for i in 0..8 {
            site.write(
                &format!("content/posts/p{i}.md"),
                &post(&format!("P{i}"), "2024-01-01", "same", "```rust\nfn main() {}\n```"),
            );
        }

        let mut pipeline = Pipeline::new(site.config()).unwrap();
        _ = pipeline.build().unwrap();
        let first = site.output("posts/p3/index.html");
        _ = pipeline.build().unwrap();
        assert_eq!(first, site.output("posts/p3/index.html"));
        assert!(first.find("/posts/p0/").unwrap() < first.find("/posts/p7/").unwrap());
    }

    #[test]
    fn test_body_edit_rerenders_single_page() {
        let site = Site::new();
        site.write("content/a.md", &post("A", "2024-01-01", "x", "one"));
        site.write("content/b.md", &post("B", "2024-01-02", "x", "two"));

        let mut pipeline = Pipeline::new(site.config()).unwrap();
        _ = pipeline.build().unwrap();
        let b_before = site.output("b/index.html");

        site.write("content/a.md", &post("A", "2024-01-01", "x", "changed"));
        let outcome = pipeline
            .rebuild_document(&site.root.join("content/a.md"))
            .unwrap();
        assert_eq!(outcome, RebuildOutcome::Page(PathBuf::from("a/index.html")));
        assert!(site.output("a/index.html").contains("changed"));
        assert_eq!(site.output("b/index.html"), b_before);

        site.write("content/a.md", &post("Renamed", "2024-01-01", "x", "changed"));
        let outcome = pipeline
            .rebuild_document(&site.root.join("content/a.md"))
            .unwrap();
        assert_eq!(outcome, RebuildOutcome::Site);
        assert!(site.output("b/index.html").contains("Renamed"));
    }

    #[test]
    fn test_deleted_document_removes_output() {
        let site = Site::new();
        site.write("content/notes.md", "plain notes\n");
        site.write("content/a.md", &post("A", "2024-01-01", "x", "one"));

        let mut pipeline = Pipeline::new(site.config()).unwrap();
        _ = pipeline.build().unwrap();
        assert!(site.exists("notes/index.html"));

        let notes = site.root.join("content/notes.md");
        fs::remove_file(&notes).unwrap();
        let outcome = pipeline.remove_document(&notes).unwrap();
        assert_eq!(outcome, RebuildOutcome::Removed(PathBuf::from("notes/index.html")));
        assert!(!site.exists("notes/index.html"));

        let a = site.root.join("content/a.md");
        fs::remove_file(&a).unwrap();
        assert_eq!(pipeline.remove_document(&a).unwrap(), RebuildOutcome::Site);
        assert!(!site.exists("a/index.html"));
    }

    #[test]
    fn test_clean_never_touches_sources() {
        let site = Site::new();
        site.write("content/a.md", "---\ntitle: A\n---\nok\n");
        let mut config = site.config();
        config.output_dir = site.root.clone();
        config.output.clean = true;

        let err = Pipeline::new(config).unwrap_err();
        assert!(err.to_string().contains("overlaps"));
        assert!(site.root.join("content/a.md").is_file());
        assert!(site.root.join("templates/post.hbs").is_file());
    }

    #[test]
    fn test_asset_change_copies_only_that_asset() {
        let site = Site::new();
        let pipeline = Pipeline::new(site.config()).unwrap();
        let source = site.root.join("assets/img/new.txt");
        fs::write(&source, "fresh").unwrap();

        let outcome = pipeline.copy_asset(&source).unwrap();
        assert_eq!(outcome, RebuildOutcome::Asset(PathBuf::from("assets/img/new.txt")));
        assert_eq!(site.output("assets/img/new.txt"), "fresh");
        assert!(!site.exists("assets/img/dot.bin"));

        fs::remove_file(&source).unwrap();
        _ = pipeline.copy_asset(&source).unwrap();
        assert!(!site.exists("assets/img/new.txt"));
        assert_eq!(
            pipeline.copy_asset(&site.root.join("content/x.md")).unwrap(),
            RebuildOutcome::Skipped
        );
    }

    #[test]
    fn test_highlight_stylesheet_written_when_themed() {
        let site = Site::new();
        site.write("content/a.md", "```rust\nlet a = 1;\n```\n");
        let mut config = site.config();
        config.highlight.theme = Some("InspiredGitHub".to_string());

        _ = Pipeline::new(config).unwrap().build().unwrap();
        assert!(site.output("css/syntax.css").contains(".hl-"));
        assert!(site
            .output("a/index.html")
            .contains("code-block language-rust"));
    }
}
