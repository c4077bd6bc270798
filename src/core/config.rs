//! # Configuration Module
//!
//! Configuration for a Postflow build. Values come from three sources, applied
//! in order:
//!
//! 1. a `postflow.toml` file (relative directories resolve against the file)
//! 2. environment variables with a prefix (`POSTFLOW_OUTPUT_DIR`,
//!    `POSTFLOW_OUTPUT__MINIFY` for `output.minify`)
//! 3. programmatic overrides (the CLI flags end up here)
//!
//! ## Example
//!
//! ```rust,no_run
//! use postflow::core::config::ConfigBuilder;
//!
//! let config = ConfigBuilder::new()
//!     .with_file("postflow.toml")
//!     .with_env_prefix("POSTFLOW_")
//!     .with_override("output.minify", false)
//!     .build()
//!     .unwrap();
//!
//! assert!(!config.output.minify);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};

use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use toml::Value as TomlValue;

use crate::core::error::{ProcessingError, Result};
use crate::processors::PluginKind;

/// Name of the configuration file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "postflow.toml";

/// Default environment variable prefix.
pub const ENV_PREFIX: &str = "POSTFLOW_";

/// The complete build configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_content_dir")]
    /// Directory containing Markdown sources.
    pub content_dir: PathBuf,

    #[serde(default = "default_output_dir")]
    /// Directory the site is written to.
    pub output_dir: PathBuf,

    #[serde(default = "default_template_dir")]
    /// Directory containing Handlebars layouts.
    pub template_dir: PathBuf,

    #[serde(default = "default_passthrough")]
    /// Directories copied byte-for-byte into the output tree.
    pub passthrough: Vec<PathBuf>,

    #[serde(default = "default_plugins")]
    /// Fenced-block plugins that are active for this build.
    pub plugins: Vec<PluginKind>,

    #[serde(default)]
    /// Content discovery settings.
    pub content: ContentConfig,

    #[serde(default)]
    /// Layout rendering settings.
    pub template: TemplateConfig,

    #[serde(default)]
    /// Output writing settings.
    pub output: OutputConfig,

    #[serde(default)]
    /// Code highlighting settings.
    pub highlight: HighlightConfig,

    #[serde(default)]
    /// Free-form values exposed to layouts as `site`.
    pub globals: BTreeMap<String, TomlValue>,
}

/// Content discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContentConfig {
    #[serde(default = "default_extensions")]
    /// File extensions treated as Markdown documents.
    pub extensions: Vec<String>,

    #[serde(default)]
    /// Render documents marked `draft: true`.
    pub drafts: bool,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            drafts: false,
        }
    }
}

/// Layout rendering settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateConfig {
    #[serde(default = "default_true")]
    /// Treat undefined template variables as fatal errors.
    pub strict_mode: bool,

    #[serde(default = "default_layout")]
    /// Layout used by documents without a `layout` key.
    pub default_layout: String,

    #[serde(default = "default_true")]
    /// Do not re-indent multi-line partial output.
    pub prevent_indent: bool,

    #[serde(default = "default_date_format")]
    /// `strftime` pattern used by the `readable_date` helper.
    pub date_format: String,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            strict_mode: true,
            default_layout: default_layout(),
            prevent_indent: true,
            date_format: default_date_format(),
        }
    }
}

/// Output writing settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(default = "default_true")]
    /// Minify every generated `.html` file.
    pub minify: bool,

    #[serde(default = "default_true")]
    /// Write `a/b.md` as `a/b/index.html` instead of `a/b.html`.
    pub pretty_urls: bool,

    #[serde(default)]
    /// Remove the output directory before a full build.
    pub clean: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            minify: true,
            pretty_urls: true,
            clean: false,
        }
    }
}

/// Code highlighting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HighlightConfig {
    #[serde(default)]
    /// Bundled theme used to generate a stylesheet for the highlight classes.
    pub theme: Option<String>,

    #[serde(default = "default_stylesheet")]
    /// Output-relative path of the generated stylesheet.
    pub stylesheet: PathBuf,

    #[serde(default = "default_aliases")]
    /// Language tag rewrites applied before syntax lookup.
    pub aliases: BTreeMap<String, String>,
}

impl Default for HighlightConfig {
    fn default() -> Self {
        Self {
            theme: None,
            stylesheet: default_stylesheet(),
            aliases: default_aliases(),
        }
    }
}

/// Builds a [`Config`] from a file, the environment and overrides.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_file: Option<PathBuf>,
    env_prefix: Option<String>,
    overrides: HashMap<String, TomlValue>,
}

impl ConfigBuilder {
    /// Initialises a new `ConfigBuilder` instance with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a TOML configuration file.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Reads overrides from environment variables starting with `prefix`.
    pub fn with_env_prefix<S: Into<String>>(
        mut self,
        prefix: S,
    ) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Overrides a single key, using `section.key` for nested settings.
    pub fn with_override<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<TomlValue>,
    {
        _ = self.overrides.insert(key.into(), value.into());
        self
    }

    /// Builds and validates the final configuration.
    pub fn build(self) -> Result<Config> {
        let mut config = if let Some(path) = self.config_file {
            load_from_file(&path)?
        } else {
            Config::default()
        };

        if let Some(prefix) = self.env_prefix {
            apply_env_overrides(&mut config, &prefix)?;
        }

        apply_overrides(&mut config, &self.overrides)?;
        validate_config(&config)?;

        log::debug!(
            "configuration: content={} templates={} output={}",
            config.content_dir.display(),
            config.template_dir.display(),
            config.output_dir.display()
        );
        Ok(config)
    }
}

impl Config {
    /// Validates directories and settings.
    pub fn validate(&self) -> Result<()> {
        validate_config(self)
    }

    /// Returns true when the given plugin is active.
    pub fn plugin_enabled(&self, plugin: PluginKind) -> bool {
        self.plugins.contains(&plugin)
    }

    /// Returns true when `path` has one of the configured content extensions.
    pub fn is_content_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                self.content
                    .extensions
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            })
    }

    /// Global values as the JSON object layouts see under `site`.
    pub fn site_context(&self) -> JsonValue {
        serde_json::to_value(&self.globals)
            .unwrap_or_else(|_| JsonValue::Object(Default::default()))
    }

    /// Resolves every directory against the working directory, so paths
    /// compare equal to the absolute paths file watchers report.
    pub fn into_absolute(mut self) -> Result<Self> {
        let cwd = env::current_dir().map_err(|e| {
            ProcessingError::configuration(
                "Cannot determine the working directory",
                None,
                Some(Box::new(e)),
            )
        })?;
        let absolute = |path: &Path| {
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                cwd.join(path)
            }
        };

        self.content_dir = absolute(&self.content_dir);
        self.output_dir = absolute(&self.output_dir);
        self.template_dir = absolute(&self.template_dir);
        self.passthrough = self.passthrough.iter().map(|p| absolute(p)).collect();
        Ok(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            content_dir: default_content_dir(),
            output_dir: default_output_dir(),
            template_dir: default_template_dir(),
            passthrough: default_passthrough(),
            plugins: default_plugins(),
            content: ContentConfig::default(),
            template: TemplateConfig::default(),
            output: OutputConfig::default(),
            highlight: HighlightConfig::default(),
            globals: BTreeMap::new(),
        }
    }
}

// Internal helper functions

fn load_from_file(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path).map_err(|e| {
        ProcessingError::configuration(
            format!("Failed to read config file: {}", e),
            Some(path.to_path_buf()),
            Some(Box::new(e)),
        )
    })?;

    let mut config: Config = toml::from_str(&content).map_err(|e| {
        ProcessingError::configuration(
            format!("Failed to parse config file: {}", e),
            Some(path.to_path_buf()),
            Some(Box::new(e)),
        )
    })?;

    if let Some(base) = path.parent().filter(|p| !p.as_os_str().is_empty())
    {
        config.content_dir = base.join(&config.content_dir);
        config.output_dir = base.join(&config.output_dir);
        config.template_dir = base.join(&config.template_dir);
        config.passthrough =
            config.passthrough.iter().map(|p| base.join(p)).collect();
    }

    Ok(config)
}

fn apply_env_overrides(
    config: &mut Config,
    prefix: &str,
) -> Result<()> {
    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(prefix) {
            let config_key = stripped
                .trim_start_matches('_')
                .replace("__", ".")
                .to_lowercase();
            apply_config_value(config, &config_key, &value)?;
        }
    }
    Ok(())
}

fn apply_overrides(
    config: &mut Config,
    overrides: &HashMap<String, TomlValue>,
) -> Result<()> {
    for (key, value) in overrides {
        apply_config_value(config, key, value)?;
    }
    Ok(())
}

fn validate_config(config: &Config) -> Result<()> {
    validate_path(&config.content_dir, "content", true)?;
    validate_path(&config.template_dir, "template", true)?;
    validate_path(&config.output_dir, "output", false)?;

    check_output_overlap(config)?;

    if config.content.extensions.is_empty() {
        return Err(ProcessingError::configuration(
            "No content extensions specified",
            None,
            None,
        ));
    }

    if config.template.default_layout.trim().is_empty() {
        return Err(ProcessingError::configuration(
            "Default layout name cannot be empty",
            None,
            None,
        ));
    }

    if StrftimeItems::new(&config.template.date_format)
        .any(|item| matches!(item, Item::Error))
    {
        return Err(ProcessingError::configuration(
            format!(
                "Invalid date format '{}'",
                config.template.date_format
            ),
            None,
            None,
        ));
    }

    if config.highlight.stylesheet.is_absolute() {
        return Err(ProcessingError::configuration(
            "Highlight stylesheet must be relative to the output directory",
            Some(config.highlight.stylesheet.clone()),
            None,
        ));
    }

    Ok(())
}

/// Rejects an output directory that equals, contains or sits inside a
/// source directory. A clean build removes the output tree, and watch mode
/// ignores events under it.
fn check_output_overlap(config: &Config) -> Result<()> {
    let output = normalize_path(&config.output_dir);
    let sources = [
        ("content", &config.content_dir),
        ("template", &config.template_dir),
    ]
    .into_iter()
    .chain(config.passthrough.iter().map(|dir| ("passthrough", dir)));

    for (name, dir) in sources {
        let source = normalize_path(dir);
        if output.starts_with(&source) || source.starts_with(&output) {
            return Err(ProcessingError::configuration(
                format!(
                    "Output directory {} overlaps the {} directory {}",
                    config.output_dir.display(),
                    name,
                    dir.display()
                ),
                Some(config.output_dir.clone()),
                None,
            ));
        }
    }
    Ok(())
}

/// Absolute form of `path` with `.` and `..` resolved lexically.
fn normalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                _ = normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    value.parse().map_err(|e| {
        ProcessingError::configuration(
            format!("Invalid {} value '{}': {}", key, value, e),
            None,
            None,
        )
    })
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value
        .trim_matches(|c| c == '[' || c == ']')
        .split(',')
        .map(|item| item.trim().trim_matches('"'))
        .filter(|item| !item.is_empty())
}

fn apply_config_value<T: ToString>(
    config: &mut Config,
    key: &str,
    value: &T,
) -> Result<()> {
    let value_str = value.to_string().trim_matches('"').to_string();
    match key {
        "content_dir" => config.content_dir = PathBuf::from(value_str),
        "output_dir" => config.output_dir = PathBuf::from(value_str),
        "template_dir" => {
            config.template_dir = PathBuf::from(value_str)
        }
        "passthrough" => {
            config.passthrough =
                split_list(&value_str).map(PathBuf::from).collect();
        }
        "plugins" => {
            config.plugins = split_list(&value_str)
                .map(str::parse)
                .collect::<Result<Vec<PluginKind>>>()?;
        }
        _ => {
            if let Some((section, key)) = key.split_once('.') {
                match section {
                    "content" => apply_content_value(
                        &mut config.content,
                        key,
                        &value_str,
                    )?,
                    "template" => apply_template_value(
                        &mut config.template,
                        key,
                        &value_str,
                    )?,
                    "output" => apply_output_value(
                        &mut config.output,
                        key,
                        &value_str,
                    )?,
                    "highlight" => apply_highlight_value(
                        &mut config.highlight,
                        key,
                        &value_str,
                    )?,
                    "globals" => {
                        _ = config.globals.insert(
                            key.to_string(),
                            TomlValue::String(value_str),
                        );
                    }
                    _ => {
                        return Err(ProcessingError::configuration(
                            format!(
                                "Unknown configuration section: {}",
                                section
                            ),
                            None,
                            None,
                        ));
                    }
                }
            } else {
                return Err(ProcessingError::configuration(
                    format!("Unknown configuration key: {}", key),
                    None,
                    None,
                ));
            }
        }
    }
    Ok(())
}

fn apply_content_value(
    config: &mut ContentConfig,
    key: &str,
    value: &str,
) -> Result<()> {
    match key {
        "drafts" => config.drafts = parse_bool(key, value)?,
        "extensions" => {
            config.extensions = split_list(value)
                .map(|ext| ext.trim_start_matches('.').to_string())
                .collect();
        }
        _ => return Err(unknown_key("content", key)),
    }
    Ok(())
}

fn apply_template_value(
    config: &mut TemplateConfig,
    key: &str,
    value: &str,
) -> Result<()> {
    match key {
        "strict_mode" => config.strict_mode = parse_bool(key, value)?,
        "prevent_indent" => {
            config.prevent_indent = parse_bool(key, value)?
        }
        "default_layout" => config.default_layout = value.to_string(),
        "date_format" => config.date_format = value.to_string(),
        _ => return Err(unknown_key("template", key)),
    }
    Ok(())
}

fn apply_output_value(
    config: &mut OutputConfig,
    key: &str,
    value: &str,
) -> Result<()> {
    match key {
        "minify" => config.minify = parse_bool(key, value)?,
        "pretty_urls" => config.pretty_urls = parse_bool(key, value)?,
        "clean" => config.clean = parse_bool(key, value)?,
        _ => return Err(unknown_key("output", key)),
    }
    Ok(())
}

fn apply_highlight_value(
    config: &mut HighlightConfig,
    key: &str,
    value: &str,
) -> Result<()> {
    match key {
        "theme" => {
            config.theme =
                Some(value.to_string()).filter(|t| !t.is_empty());
        }
        "stylesheet" => config.stylesheet = PathBuf::from(value),
        _ => {
            if let Some(alias) = key.strip_prefix("aliases.") {
                _ = config
                    .aliases
                    .insert(alias.to_string(), value.to_string());
            } else {
                return Err(unknown_key("highlight", key));
            }
        }
    }
    Ok(())
}

fn unknown_key(section: &str, key: &str) -> ProcessingError {
    ProcessingError::configuration(
        format!("Unknown configuration key: {}.{}", section, key),
        None,
        None,
    )
}

fn validate_path(
    path: &Path,
    name: &str,
    must_exist: bool,
) -> Result<()> {
    if must_exist && !path.exists() {
        return Err(ProcessingError::configuration(
            format!(
                "{} directory does not exist: {}",
                name,
                path.display()
            ),
            Some(path.to_path_buf()),
            None,
        ));
    }

    if path.exists() && !path.is_dir() {
        return Err(ProcessingError::configuration(
            format!(
                "{} path is not a directory: {}",
                name,
                path.display()
            ),
            Some(path.to_path_buf()),
            None,
        ));
    }

    Ok(())
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_content_dir() -> PathBuf {
    PathBuf::from("content")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("public")
}

fn default_template_dir() -> PathBuf {
    PathBuf::from("templates")
}

fn default_passthrough() -> Vec<PathBuf> {
    vec![PathBuf::from("assets")]
}

fn default_plugins() -> Vec<PluginKind> {
    vec![PluginKind::Highlight, PluginKind::Chart]
}

fn default_extensions() -> Vec<String> {
    vec!["md".to_string(), "markdown".to_string()]
}

fn default_layout() -> String {
    "post".to_string()
}

fn default_date_format() -> String {
    "%B %-d, %Y".to_string()
}

fn default_stylesheet() -> PathBuf {
    PathBuf::from("css/syntax.css")
}

fn default_aliases() -> BTreeMap<String, String> {
    [("ts", "js"), ("typescript", "js"), ("tsx", "js"), ("jsx", "js")]
        .into_iter()
        .map(|(from, to)| (from.to_string(), to.to_string()))
        .collect()
}
