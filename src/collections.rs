//! Derived views over the whole site: the dated post list and the tag index.
//!
//! Both are rebuilt from the parsed documents on every full build and are
//! handed to layouts under `collections`.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{json, Value as JsonValue};

use crate::content::{slugify, tag_url, Document};

/// What layouts see for each post in a listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostSummary {
    /// `title` from front matter.
    pub title: Option<String>,
    /// Page URL.
    pub url: String,
    /// Publication date as `YYYY-MM-DD`.
    pub date: Option<String>,
    /// Publication date and time as `YYYY-MM-DDTHH:MM:SS`.
    pub datetime: Option<String>,
    /// Tags in source order.
    pub tags: Vec<String>,
    /// `description` from front matter.
    pub description: Option<String>,
    /// `featuredImage` from front matter.
    #[serde(rename = "featuredImage")]
    pub featured_image: Option<String>,
    /// Source path relative to the content directory.
    pub input_path: String,
    /// Last segment of the URL.
    pub slug: String,
}

impl PostSummary {
    fn from_document(document: &Document) -> Self {
        Self {
            title: document.meta.title.clone(),
            url: document.target.url.clone(),
            date: document
                .meta
                .date
                .map(|d| d.format("%Y-%m-%d").to_string()),
            datetime: document
                .meta
                .date
                .map(|d| d.format("%Y-%m-%dT%H:%M:%S").to_string()),
            tags: document.meta.tags.clone(),
            description: document.meta.description.clone(),
            featured_image: document.meta.featured_image.clone(),
            input_path: document.path.display().to_string(),
            slug: document.slug(),
        }
    }
}

/// Newest first; undated documents after dated ones; ties by source path.
fn listing_order(a: &Document, b: &Document) -> Ordering {
    match (a.meta.date, b.meta.date) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.path.cmp(&b.path))
}

/// One tag and the documents carrying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagEntry {
    /// Tag as first written (in source path order).
    pub name: String,
    /// URL-safe form; tags differing only in case or punctuation share it.
    pub slug: String,
    /// Content-relative paths of the tagged documents.
    pub documents: BTreeSet<PathBuf>,
}

/// Tag to documents mapping, keyed by tag slug.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagIndex {
    entries: BTreeMap<String, TagEntry>,
}

impl TagIndex {
    /// Indexes every tag of every document.
    pub fn build<'a, I>(documents: I) -> Self
    where
        I: IntoIterator<Item = &'a Document>,
    {
        let mut index = TagIndex::default();
        for document in documents {
            for tag in &document.meta.tags {
                let slug = slugify(tag);
                if slug.is_empty() {
                    continue;
                }
                let entry =
                    index.entries.entry(slug.clone()).or_insert_with(|| {
                        TagEntry {
                            name: tag.clone(),
                            slug,
                            documents: BTreeSet::new(),
                        }
                    });
                _ = entry.documents.insert(document.path.clone());
            }
        }
        index
    }

    /// The entry for a tag name or slug.
    pub fn get(&self, tag: &str) -> Option<&TagEntry> {
        self.entries.get(&slugify(tag))
    }

    /// True when `document` carries `tag`.
    pub fn contains(&self, tag: &str, document: &Path) -> bool {
        self.get(tag)
            .is_some_and(|entry| entry.documents.contains(document))
    }

    /// Entries ordered by slug.
    pub fn iter(&self) -> impl Iterator<Item = &TagEntry> {
        self.entries.values()
    }

    /// Number of distinct tags.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no document has a tag.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The post list and tag index for one build.
#[derive(Debug, Clone, Default)]
pub struct Collections {
    posts: Vec<PostSummary>,
    tags: TagIndex,
    tagged: BTreeMap<String, Vec<PostSummary>>,
}

impl Collections {
    /// Builds the collections from the documents being published.
    pub fn build(documents: &[Document]) -> Self {
        let mut ordered: Vec<&Document> = documents.iter().collect();
        ordered.sort_by(|a, b| listing_order(a, b));

        let posts = ordered
            .iter()
            .filter(|d| d.meta.is_listable())
            .map(|d| PostSummary::from_document(d))
            .collect();

        let tags = TagIndex::build(ordered.iter().copied());
        let tagged = tags
            .iter()
            .map(|entry| {
                let summaries = ordered
                    .iter()
                    .filter(|d| entry.documents.contains(&d.path))
                    .map(|d| PostSummary::from_document(d))
                    .collect();
                (entry.slug.clone(), summaries)
            })
            .collect();

        Self {
            posts,
            tags,
            tagged,
        }
    }

    /// Listable posts, newest first.
    pub fn posts(&self) -> &[PostSummary] {
        &self.posts
    }

    /// The tag index.
    pub fn tags(&self) -> &TagIndex {
        &self.tags
    }

    /// Documents carrying the tag with `slug`, in listing order.
    pub fn posts_for_tag(&self, slug: &str) -> &[PostSummary] {
        self.tagged.get(slug).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The `collections` object exposed to layouts.
    pub fn to_context(&self) -> JsonValue {
        let tags: serde_json::Map<String, JsonValue> = self
            .tags
            .iter()
            .map(|entry| {
                (
                    entry.name.clone(),
                    json!(self.posts_for_tag(&entry.slug)),
                )
            })
            .collect();

        let tag_list: Vec<JsonValue> = self
            .tags
            .iter()
            .map(|entry| {
                json!({
                    "name": entry.name,
                    "slug": entry.slug,
                    "url": tag_url(&entry.name),
                    "count": entry.documents.len(),
                })
            })
            .collect();

        json!({
            "posts": self.posts,
            "tags": tags,
            "tag_list": tag_list,
        })
    }
}
