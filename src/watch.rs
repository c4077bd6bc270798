//! File system watcher for incremental rebuilds.
//!
//! Monitors the content, template and passthrough directories and the
//! configuration file. Events are batched by a debouncer and then applied
//! to the [`Pipeline`]:
//!
//! ```text
//!  notify events ──▶ Debouncer (300ms) ──▶ handle_changes()
//!                                            ├─ config/template: reload + full build
//!                                            ├─ content: re-render page or rebuild
//!                                            └─ asset: copy one file
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecursiveMode, Watcher};

use crate::core::config::Config;
use crate::core::error::{ProcessingError, Result};
use crate::process::{Pipeline, RebuildOutcome};

const DEBOUNCE_MS: u64 = 300;
const REBUILD_COOLDOWN_MS: u64 = 800;

/// What a changed path means for the site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCategory {
    /// The configuration file.
    Config,
    /// A layout or partial.
    Template,
    /// A Markdown document.
    Content,
    /// A passthrough file.
    Asset,
    /// Anything else; ignored.
    Unknown,
}

/// Classifies `path` against the directories in `config`.
pub fn categorize_path(
    path: &Path,
    config: &Config,
    config_file: Option<&Path>,
) -> FileCategory {
    if config_file.is_some_and(|file| file == path) {
        return FileCategory::Config;
    }
    if path.starts_with(&config.output_dir) {
        return FileCategory::Unknown;
    }
    if path.starts_with(&config.template_dir) {
        return FileCategory::Template;
    }
    if path.starts_with(&config.content_dir) {
        return if config.is_content_file(path) {
            FileCategory::Content
        } else {
            FileCategory::Unknown
        };
    }
    if config.passthrough.iter().any(|dir| path.starts_with(dir)) {
        return FileCategory::Asset;
    }
    FileCategory::Unknown
}

/// Check if path is a temp/backup file (editor artifacts).
fn is_temp_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    matches!(ext, "bck" | "bak" | "backup" | "swp" | "swo" | "tmp")
        || name.ends_with('~')
        || name.starts_with('.')
}

/// Batches rapid file events with debouncing and rebuild cooldown.
#[derive(Debug)]
struct Debouncer {
    pending: HashSet<PathBuf>,
    last_event: Option<Instant>,
    last_rebuild: Option<Instant>,
}

impl Debouncer {
    fn new() -> Self {
        Self {
            pending: HashSet::new(),
            last_event: None,
            last_rebuild: None,
        }
    }

    fn in_cooldown(&self) -> bool {
        self.last_rebuild.is_some_and(|t| {
            t.elapsed() < Duration::from_millis(REBUILD_COOLDOWN_MS)
        })
    }

    fn add(&mut self, event: Event) {
        for path in event.paths {
            if !is_temp_file(&path) {
                _ = self.pending.insert(path);
            }
        }
        self.last_event = Some(Instant::now());
    }

    fn ready(&self) -> bool {
        !self.pending.is_empty()
            && self.last_event.is_some_and(|t| {
                t.elapsed() >= Duration::from_millis(DEBOUNCE_MS)
            })
    }

    fn take(&mut self) -> Vec<PathBuf> {
        self.last_event = None;
        let mut paths: Vec<PathBuf> = self.pending.drain().collect();
        paths.sort();
        paths
    }

    fn mark_rebuild(&mut self) {
        self.last_rebuild = Some(Instant::now());
    }

    fn timeout(&self) -> Duration {
        if self.pending.is_empty() {
            Duration::from_secs(60)
        } else {
            Duration::from_millis(DEBOUNCE_MS)
        }
    }
}

fn full_rebuild<F>(pipeline: &mut Pipeline, reload: &F, reason: &str) -> bool
where
    F: Fn() -> Result<Config>,
{
    log::info!("{}, rebuilding site", reason);
    let fresh = match reload().and_then(Pipeline::new) {
        Ok(fresh) => fresh,
        Err(e) => {
            log::error!("rebuild failed: {}", e);
            return false;
        }
    };
    *pipeline = fresh;
    match pipeline.build() {
        Ok(_) => true,
        Err(e) => {
            log::error!("rebuild failed: {}", e);
            false
        }
    }
}

/// Applies a batch of changed paths. Returns true when the whole site was
/// rebuilt.
pub fn handle_changes<F>(
    paths: &[PathBuf],
    pipeline: &mut Pipeline,
    config_file: Option<&Path>,
    reload: &F,
) -> bool
where
    F: Fn() -> Result<Config>,
{
    let mut full_reason: Option<String> = None;
    let mut documents = Vec::new();
    let mut assets = Vec::new();

    for path in paths {
        match categorize_path(path, pipeline.config(), config_file) {
            FileCategory::Config => {
                full_reason = Some("configuration changed".to_string());
            }
            FileCategory::Template => {
                _ = full_reason.get_or_insert_with(|| {
                    format!("layout {} changed", path.display())
                });
            }
            FileCategory::Content => documents.push(path),
            FileCategory::Asset => assets.push(path),
            FileCategory::Unknown => {}
        }
    }

    if let Some(reason) = full_reason {
        return full_rebuild(pipeline, reload, &reason);
    }

    let mut rebuilt = false;
    for path in documents {
        let result = if path.is_file() {
            pipeline.rebuild_document(path)
        } else {
            pipeline.remove_document(path)
        };
        match result {
            Ok(RebuildOutcome::Site) => {
                rebuilt = true;
                break;
            }
            Ok(outcome) => log::debug!("{}: {:?}", path.display(), outcome),
            Err(e) => log::error!("{}", e),
        }
    }

    for path in assets {
        if path.is_dir() {
            continue;
        }
        if let Err(e) = pipeline.copy_asset(path) {
            log::error!("{}", e);
        }
    }

    rebuilt
}

fn setup_watchers(
    watcher: &mut impl Watcher,
    config: &Config,
    config_file: Option<&Path>,
) -> Result<()> {
    let dirs = [&config.content_dir, &config.template_dir]
        .into_iter()
        .chain(config.passthrough.iter());
    for dir in dirs.filter(|dir| dir.is_dir()) {
        watcher
            .watch(dir, RecursiveMode::Recursive)
            .map_err(|e| watch_error(dir, e))?;
        log::debug!("watching {}", dir.display());
    }
    if let Some(file) = config_file.filter(|file| file.is_file()) {
        watcher
            .watch(file, RecursiveMode::NonRecursive)
            .map_err(|e| watch_error(file, e))?;
        log::debug!("watching {}", file.display());
    }
    Ok(())
}

fn watch_error(path: &Path, e: notify::Error) -> ProcessingError {
    ProcessingError::file_operation(
        "failed to watch for changes",
        path,
        Some(Box::new(e)),
    )
}

const fn is_relevant(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
    )
}

/// Watches the site sources and keeps the output up to date. Blocks until
/// the watcher shuts down.
///
/// `reload` produces a fresh configuration when the configuration file or a
/// layout changes.
pub fn watch_for_changes_blocking<F>(
    mut pipeline: Pipeline,
    config_file: Option<PathBuf>,
    reload: F,
) -> Result<()>
where
    F: Fn() -> Result<Config>,
{
    let (tx, rx) = mpsc::channel();
    let mut watcher = notify::recommended_watcher(tx).map_err(|e| {
        ProcessingError::internal_error(format!(
            "failed to create file watcher: {}",
            e
        ))
    })?;
    setup_watchers(&mut watcher, pipeline.config(), config_file.as_deref())?;
    log::info!("watching for changes");

    let mut debouncer = Debouncer::new();
    loop {
        match rx.recv_timeout(debouncer.timeout()) {
            Ok(Ok(event)) if is_relevant(&event) && !debouncer.in_cooldown() => {
                debouncer.add(event);
            }
            Ok(Err(e)) => log::warn!("watch error: {}", e),
            Err(RecvTimeoutError::Timeout) if debouncer.ready() => {
                let paths = debouncer.take();
                if handle_changes(
                    &paths,
                    &mut pipeline,
                    config_file.as_deref(),
                    &reload,
                ) {
                    debouncer.mark_rebuild();
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
            _ => {}
        }
    }

    Ok(())
}
