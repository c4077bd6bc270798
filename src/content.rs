// Copyright © 2024 Postflow. All rights reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! # Content Module
//!
//! Source documents: splitting the YAML front-matter block from the body,
//! reading the well-known keys, and deriving where each document lands in
//! the output tree.
//!
//! A front-matter block starts on the first line with `---` and ends at the
//! next line that is exactly `---` (or `...`). Files without the opening
//! delimiter have empty metadata.
//!
//! ```rust
//! use postflow::content::FrontMatter;
//! use std::path::Path;
//!
//! let raw = "---\ntitle: Hello\ntags: [rust]\n---\nBody text\n";
//! let front = FrontMatter::parse(Path::new("hello.md"), raw).unwrap();
//! assert_eq!(front.body, "Body text\n");
//! assert_eq!(front.metadata.len(), 2);
//! ```

use std::fs;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rayon::prelude::*;
use serde::Serialize;
use serde_json::Value as JsonValue;
use serde_yml::{Mapping, Value as YamlValue};
use walkdir::WalkDir;

use crate::core::config::Config;
use crate::core::error::{ProcessingError, Result};
use crate::core::traits::Processor;

const DELIMITER: &str = "---";
const ALT_CLOSING_DELIMITER: &str = "...";

/// Formats accepted for `date` values without an offset.
const DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

/// Front-matter metadata and the body that follows it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrontMatter {
    /// Keys in source order.
    pub metadata: Mapping,
    /// Everything after the closing delimiter.
    pub body: String,
}

impl FrontMatter {
    /// Splits `raw` into metadata and body. `path` is only used in errors.
    pub fn parse(path: &Path, raw: &str) -> Result<Self> {
        let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
        let Some((header, body)) = split_front_matter(path, raw)? else {
            return Ok(Self {
                metadata: Mapping::new(),
                body: raw.to_string(),
            });
        };

        let metadata = if header.trim().is_empty() {
            Mapping::new()
        } else {
            match serde_yml::from_str::<YamlValue>(header) {
                Ok(YamlValue::Mapping(mapping)) => mapping,
                Ok(YamlValue::Null) => Mapping::new(),
                Ok(_) => {
                    return Err(ProcessingError::front_matter(
                        path,
                        "front matter must be a mapping of keys to values",
                    ))
                }
                Err(e) => {
                    return Err(ProcessingError::front_matter(
                        path,
                        format!("invalid YAML: {}", e),
                    ))
                }
            }
        };

        Ok(Self {
            metadata,
            body: body.to_string(),
        })
    }

    /// Writes the metadata back out as a front-matter block followed by the
    /// body. Parsing the result yields an equal value.
    pub fn to_source(&self) -> Result<String> {
        if self.metadata.is_empty() {
            return Ok(self.body.clone());
        }
        let yaml = serde_yml::to_string(&self.metadata).map_err(|e| {
            ProcessingError::content_processing(
                "Failed to serialize front matter",
                Some(Box::new(e)),
            )
        })?;
        let mut out = String::with_capacity(yaml.len() + self.body.len() + 8);
        out.push_str(DELIMITER);
        out.push('\n');
        out.push_str(&yaml);
        if !yaml.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(DELIMITER);
        out.push('\n');
        out.push_str(&self.body);
        Ok(out)
    }
}

/// Returns the header and body slices, or `None` when there is no opening
/// delimiter.
fn split_front_matter<'a>(
    path: &Path,
    raw: &'a str,
) -> Result<Option<(&'a str, &'a str)>> {
    let mut lines = raw.split_inclusive('\n');
    let Some(first) = lines.next() else {
        return Ok(None);
    };
    if first.trim_end() != DELIMITER {
        return Ok(None);
    }

    let header_start = first.len();
    let mut offset = header_start;
    for line in lines {
        let trimmed = line.trim_end();
        if trimmed == DELIMITER || trimmed == ALT_CLOSING_DELIMITER {
            return Ok(Some((
                &raw[header_start..offset],
                &raw[offset + line.len()..],
            )));
        }
        offset += line.len();
    }

    Err(ProcessingError::front_matter(
        path,
        "front matter opened with `---` but never closed",
    ))
}

/// Parses raw file text into [`FrontMatter`]; the context is the source path.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrontMatterParser;

impl Processor for FrontMatterParser {
    type Input = String;
    type Output = FrontMatter;
    type Context = PathBuf;

    fn process(
        &self,
        input: Self::Input,
        context: Option<&Self::Context>,
    ) -> Result<Self::Output> {
        let path = context
            .map(PathBuf::as_path)
            .unwrap_or_else(|| Path::new("<inline>"));
        FrontMatter::parse(path, &input)
    }
}

/// The well-known front-matter keys, typed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostMeta {
    /// `title`
    pub title: Option<String>,
    /// `date`
    pub date: Option<NaiveDateTime>,
    /// `tags`, trimmed and de-duplicated in source order.
    pub tags: Vec<String>,
    /// `description`
    pub description: Option<String>,
    /// `featuredImage`
    pub featured_image: Option<String>,
    /// `layout`
    pub layout: Option<String>,
    /// `permalink`
    pub permalink: Option<String>,
    /// `draft`
    pub draft: bool,
}

impl PostMeta {
    /// Reads the well-known keys out of `metadata`.
    pub fn from_metadata(path: &Path, metadata: &Mapping) -> Result<Self> {
        let date = match metadata.get("date") {
            None | Some(YamlValue::Null) => None,
            Some(value) => {
                let text = scalar_string(value).ok_or_else(|| {
                    ProcessingError::front_matter(
                        path,
                        "`date` must be a scalar value",
                    )
                })?;
                Some(parse_date(&text).ok_or_else(|| {
                    ProcessingError::front_matter(
                        path,
                        format!("unrecognised date '{}'", text),
                    )
                })?)
            }
        };

        let tags = match metadata.get("tags") {
            None | Some(YamlValue::Null) => Vec::new(),
            Some(YamlValue::Sequence(items)) => {
                let mut tags: Vec<String> = Vec::with_capacity(items.len());
                for item in items {
                    let tag = scalar_string(item).ok_or_else(|| {
                        ProcessingError::front_matter(
                            path,
                            "`tags` entries must be strings",
                        )
                    })?;
                    let tag = tag.trim().to_string();
                    if !tag.is_empty() && !tags.contains(&tag) {
                        tags.push(tag);
                    }
                }
                tags
            }
            Some(value) => scalar_string(value)
                .map(|tag| tag.trim().to_string())
                .filter(|tag| !tag.is_empty())
                .into_iter()
                .collect(),
        };

        let draft = match metadata.get("draft") {
            None | Some(YamlValue::Null) => false,
            Some(YamlValue::Bool(flag)) => *flag,
            Some(_) => {
                return Err(ProcessingError::front_matter(
                    path,
                    "`draft` must be true or false",
                ))
            }
        };

        Ok(Self {
            title: string_key(metadata, "title"),
            date,
            tags,
            description: string_key(metadata, "description"),
            featured_image: string_key(metadata, "featuredImage"),
            layout: string_key(metadata, "layout"),
            permalink: string_key(metadata, "permalink"),
            draft,
        })
    }

    /// A document with both a title and a date appears in the post list.
    pub fn is_listable(&self) -> bool {
        self.title.is_some() && self.date.is_some()
    }
}

fn scalar_string(value: &YamlValue) -> Option<String> {
    match value {
        YamlValue::String(s) => Some(s.clone()),
        YamlValue::Number(n) => Some(n.to_string()),
        YamlValue::Bool(b) => Some(b.to_string()),
        YamlValue::Tagged(tagged) => scalar_string(&tagged.value),
        _ => None,
    }
}

fn string_key(metadata: &Mapping, key: &str) -> Option<String> {
    metadata
        .get(key)
        .and_then(scalar_string)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Parses the date formats accepted in front matter.
pub fn parse_date(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    for format in DATE_TIME_FORMATS {
        if let Ok(date_time) = NaiveDateTime::parse_from_str(text, format) {
            return Some(date_time);
        }
    }
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|date_time| date_time.naive_local())
}

/// Lowercases `text` and joins its alphanumeric runs with `-`.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// URL of the listing page for `tag`.
pub fn tag_url(tag: &str) -> String {
    format!("/tags/{}/", slugify(tag))
}

/// Where a document is written and the URL it is served at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct OutputTarget {
    /// Path relative to the output directory.
    pub path: PathBuf,
    /// Site-absolute URL.
    pub url: String,
}

impl OutputTarget {
    /// Derives the target for a content-relative source path.
    ///
    /// `posts/hello.md` becomes `posts/hello/index.html` (`/posts/hello/`)
    /// with pretty URLs, `posts/hello.html` without. `index.md` stays the
    /// index of its directory. A permalink replaces the derivation; one
    /// ending in `/` or without an extension gets an `index.html`.
    pub fn resolve(
        source: &Path,
        relative: &Path,
        permalink: Option<&str>,
        pretty_urls: bool,
    ) -> Result<Self> {
        if let Some(permalink) = permalink {
            return Self::from_permalink(source, permalink);
        }

        let stem = relative.with_extension("");
        let is_index =
            stem.file_name().and_then(|name| name.to_str()) == Some("index");
        let dir = url_segments(stem.parent().unwrap_or(Path::new("")));

        if is_index {
            let path = stem.with_file_name("index.html");
            let url = format!("/{}", with_trailing_slash(&dir));
            Ok(Self { path, url })
        } else if pretty_urls {
            let path = stem.join("index.html");
            let url = format!("/{}/", url_segments(&stem));
            Ok(Self { path, url })
        } else {
            let path = stem.with_extension("html");
            let url = format!("/{}", url_segments(&path));
            Ok(Self { path, url })
        }
    }

    fn from_permalink(source: &Path, permalink: &str) -> Result<Self> {
        let trimmed = permalink.trim().trim_start_matches('/');
        let relative = Path::new(trimmed);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(ProcessingError::front_matter(
                source,
                format!("permalink '{}' must stay inside the site", permalink),
            ));
        }

        let has_extension = relative.extension().is_some();
        if trimmed.is_empty() || trimmed.ends_with('/') || !has_extension {
            let dir = url_segments(relative);
            Ok(Self {
                path: relative.join("index.html"),
                url: format!("/{}", with_trailing_slash(&dir)),
            })
        } else {
            Ok(Self {
                path: relative.to_path_buf(),
                url: format!("/{}", url_segments(relative)),
            })
        }
    }
}

fn url_segments(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn with_trailing_slash(dir: &str) -> String {
    if dir.is_empty() {
        String::new()
    } else {
        format!("{}/", dir)
    }
}

/// A parsed source document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Path relative to the content directory; the document's identity.
    pub path: PathBuf,
    /// Path on disk.
    pub source_path: PathBuf,
    /// Front-matter keys in source order.
    pub metadata: Mapping,
    /// Raw Markdown body.
    pub body: String,
    /// Typed well-known keys.
    pub meta: PostMeta,
    /// Output location.
    pub target: OutputTarget,
}

/// The parts of a document that other pages can see through collections.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingKey {
    title: Option<String>,
    date: Option<NaiveDateTime>,
    tags: Vec<String>,
    description: Option<String>,
    featured_image: Option<String>,
    url: String,
    draft: bool,
}

impl Document {
    /// Parses a document from its raw text.
    pub fn from_source(
        content_dir: &Path,
        source_path: &Path,
        raw: &str,
        pretty_urls: bool,
    ) -> Result<Self> {
        let path = source_path
            .strip_prefix(content_dir)
            .map_err(|_| {
                ProcessingError::file_operation(
                    format!(
                        "document is outside the content directory {}",
                        content_dir.display()
                    ),
                    source_path,
                    None,
                )
            })?
            .to_path_buf();

        let front = FrontMatterParser
            .process(raw.to_string(), Some(&source_path.to_path_buf()))?;
        let meta = PostMeta::from_metadata(source_path, &front.metadata)?;
        let target = OutputTarget::resolve(
            source_path,
            &path,
            meta.permalink.as_deref(),
            pretty_urls,
        )?;

        Ok(Self {
            path,
            source_path: source_path.to_path_buf(),
            metadata: front.metadata,
            body: front.body,
            meta,
            target,
        })
    }

    /// Reads and parses the document at `source_path`.
    pub fn load(config: &Config, source_path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(source_path)
            .map_err(|e| ProcessingError::io_error(source_path, e))?;
        Self::from_source(
            &config.content_dir,
            source_path,
            &raw,
            config.output.pretty_urls,
        )
    }

    /// Last path segment of the URL, used as the page slug.
    pub fn slug(&self) -> String {
        self.target
            .url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .map(|segment| segment.trim_end_matches(".html").to_string())
            .filter(|segment| !segment.is_empty())
            .unwrap_or_else(|| "index".to_string())
    }

    /// The fields that feed collections; if these are unchanged after an
    /// edit, no other page needs re-rendering.
    pub fn listing_key(&self) -> ListingKey {
        ListingKey {
            title: self.meta.title.clone(),
            date: self.meta.date,
            tags: self.meta.tags.clone(),
            description: self.meta.description.clone(),
            featured_image: self.meta.featured_image.clone(),
            url: self.target.url.clone(),
            draft: self.meta.draft,
        }
    }

    /// Metadata as a JSON object, for template contexts.
    pub fn metadata_json(&self) -> Result<JsonValue> {
        serde_json::to_value(&self.metadata).map_err(|e| {
            ProcessingError::front_matter(
                &self.source_path,
                format!("front matter cannot be exposed to layouts: {}", e),
            )
        })
    }
}

/// Lists content files under the content directory, sorted by path.
pub fn discover_documents(config: &Config) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(&config.content_dir)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_name().to_string_lossy().starts_with('.')
        });

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| config.content_dir.clone());
            ProcessingError::file_operation(
                format!("Failed to walk content directory: {}", e),
                path,
                None,
            )
        })?;
        if entry.file_type().is_file() && config.is_content_file(entry.path())
        {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Discovers and parses every document. Any parse failure aborts the scan.
pub fn scan_documents(config: &Config) -> Result<Vec<Document>> {
    discover_documents(config)?
        .par_iter()
        .map(|path| Document::load(config, path))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(raw: &str) -> Result<FrontMatter> {
        FrontMatter::parse(Path::new("post.md"), raw)
    }

    #[test]
    fn test_front_matter_split() {
        let front = parse("---\ntitle: Hello\ndate: 2024-03-01\n---\n# Body\n")
            .unwrap();
        assert_eq!(front.body, "# Body\n");
        assert_eq!(
            front.metadata.get("title"),
            Some(&YamlValue::String("Hello".to_string()))
        );
    }

    #[test]
    fn test_no_front_matter() {
        let front = parse("# Just a body\n---\n").unwrap();
        assert!(front.metadata.is_empty());
        assert_eq!(front.body, "# Just a body\n---\n");
    }

    #[test]
    fn test_empty_front_matter_and_dots_closing() {
        let front = parse("---\n---\nbody").unwrap();
        assert!(front.metadata.is_empty());
        assert_eq!(front.body, "body");

        let front = parse("---\ntitle: x\n...\nbody").unwrap();
        assert_eq!(front.metadata.len(), 1);
        assert_eq!(front.body, "body");
    }

    #[test]
    fn test_crlf_line_endings() {
        let front = parse("---\r\ntitle: Hi\r\n---\r\nbody\r\n").unwrap();
        assert_eq!(front.metadata.len(), 1);
        assert_eq!(front.body, "body\r\n");
    }

    #[test]
    fn test_missing_closing_delimiter_names_path() {
        let err = FrontMatter::parse(
            Path::new("content/broken.md"),
            "---\ntitle: Broken\n\nNo closing line\n",
        )
        .unwrap_err();
        assert!(matches!(err, ProcessingError::FrontMatter { .. }));
        assert!(err.to_string().contains("content/broken.md"));
    }

    #[test]
    fn test_non_mapping_header_is_rejected() {
        assert!(parse("---\n- a\n- b\n---\nbody").is_err());
        assert!(parse("---\ntitle: [unclosed\n---\nbody").is_err());
    }

    #[test]
    fn test_round_trip_preserves_order_and_nesting() {
        let raw = "---\nzeta: 1\ntitle: Ordered\nauthor:\n  name: Ada\n  links: [a, b]\ntags:\n  - rust\n  - web\n---\nBody\n";
        let front = parse(raw).unwrap();
        let keys: Vec<_> = front
            .metadata
            .keys()
            .filter_map(|k| k.as_str().map(str::to_string))
            .collect();
        assert_eq!(keys, vec!["zeta", "title", "author", "tags"]);

        let reparsed = parse(&front.to_source().unwrap()).unwrap();
        assert_eq!(reparsed, front);
    }

    #[test]
    fn test_post_meta() {
        let front = parse(
            "---\ntitle: ' Spaced '\ndate: 2024-02-03 10:30\ntags: [rust, rust, ' web ']\nfeaturedImage: /img/a.png\ndraft: true\n---\n",
        )
        .unwrap();
        let meta = PostMeta::from_metadata(Path::new("p.md"), &front.metadata)
            .unwrap();
        assert_eq!(meta.title.as_deref(), Some("Spaced"));
        assert_eq!(meta.tags, vec!["rust", "web"]);
        assert_eq!(meta.featured_image.as_deref(), Some("/img/a.png"));
        assert!(meta.draft);
        assert!(meta.is_listable());
        assert_eq!(
            meta.date.unwrap().format("%Y-%m-%d %H:%M").to_string(),
            "2024-02-03 10:30"
        );
    }

    #[test]
    fn test_single_string_tag() {
        let front = parse("---\ntags: notes\n---\n").unwrap();
        let meta = PostMeta::from_metadata(Path::new("p.md"), &front.metadata)
            .unwrap();
        assert_eq!(meta.tags, vec!["notes"]);
        assert!(!meta.is_listable());
    }

    #[test]
    fn test_bad_date_is_fatal() {
        let front = parse("---\ndate: last tuesday\n---\n").unwrap();
        let err = PostMeta::from_metadata(Path::new("p.md"), &front.metadata)
            .unwrap_err();
        assert!(err.to_string().contains("last tuesday"));
    }

    #[test]
    fn test_parse_date_formats() {
        assert!(parse_date("2024-01-05").is_some());
        assert!(parse_date("2024-01-05T08:00:00").is_some());
        assert!(parse_date("2024-01-05 08:00").is_some());
        assert!(parse_date("2024-01-05T08:00:00+02:00").is_some());
        assert!(parse_date("05/01/2024").is_none());
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  Rust & WebAssembly  "), "rust-webassembly");
        assert_eq!(slugify("Ünïcode Tags"), "ünïcode-tags");
        assert_eq!(slugify("!!!"), "");
        assert_eq!(tag_url("Machine Learning"), "/tags/machine-learning/");
    }

    #[test]
    fn test_output_targets() {
        let source = Path::new("content/x.md");
        let target =
            OutputTarget::resolve(source, Path::new("posts/hello.md"), None, true)
                .unwrap();
        assert_eq!(target.path, PathBuf::from("posts/hello/index.html"));
        assert_eq!(target.url, "/posts/hello/");

        let target =
            OutputTarget::resolve(source, Path::new("posts/hello.md"), None, false)
                .unwrap();
        assert_eq!(target.path, PathBuf::from("posts/hello.html"));
        assert_eq!(target.url, "/posts/hello.html");

        let target =
            OutputTarget::resolve(source, Path::new("index.md"), None, true).unwrap();
        assert_eq!(target.path, PathBuf::from("index.html"));
        assert_eq!(target.url, "/");

        let target =
            OutputTarget::resolve(source, Path::new("blog/index.md"), None, true)
                .unwrap();
        assert_eq!(target.path, PathBuf::from("blog/index.html"));
        assert_eq!(target.url, "/blog/");
    }

    #[test]
    fn test_permalinks() {
        let source = Path::new("content/x.md");
        let relative = Path::new("x.md");
        let target =
            OutputTarget::resolve(source, relative, Some("/about/"), true).unwrap();
        assert_eq!(target.path, PathBuf::from("about/index.html"));
        assert_eq!(target.url, "/about/");

        let target =
            OutputTarget::resolve(source, relative, Some("/feed.xml"), true).unwrap();
        assert_eq!(target.path, PathBuf::from("feed.xml"));
        assert_eq!(target.url, "/feed.xml");

        assert!(
            OutputTarget::resolve(source, relative, Some("/../etc/x"), true).is_err()
        );
    }

    #[test]
    fn test_scan_documents() {
        let temp_dir = TempDir::new().unwrap();
        let content = temp_dir.path().join("content");
        fs::create_dir_all(content.join("posts")).unwrap();
        fs::create_dir_all(content.join(".hidden")).unwrap();
        fs::write(content.join("posts/b.md"), "---\ntitle: B\n---\nb").unwrap();
        fs::write(content.join("a.markdown"), "a").unwrap();
        fs::write(content.join("notes.txt"), "skip").unwrap();
        fs::write(content.join(".hidden/c.md"), "skip").unwrap();

        let config = Config {
            content_dir: content.clone(),
            ..Default::default()
        };
        let documents = scan_documents(&config).unwrap();
        let paths: Vec<_> = documents.iter().map(|d| d.path.clone()).collect();
        assert_eq!(
            paths,
            vec![PathBuf::from("a.markdown"), PathBuf::from("posts/b.md")]
        );
        assert_eq!(documents[1].slug(), "b");
        assert_eq!(documents[1].target.url, "/posts/b/");
    }

    #[test]
    fn test_scan_aborts_on_bad_document() {
        let temp_dir = TempDir::new().unwrap();
        let content = temp_dir.path().join("content");
        fs::create_dir_all(&content).unwrap();
        fs::write(content.join("ok.md"), "fine").unwrap();
        fs::write(content.join("bad.md"), "---\ntitle: x\n").unwrap();

        let config = Config {
            content_dir: content.clone(),
            ..Default::default()
        };
        let err = scan_documents(&config).unwrap_err();
        assert_eq!(err.path(), Some(content.join("bad.md").as_path()));
    }
}
