//! Class-annotated syntax highlighting backed by `syntect`.
//!
//! Code is tokenised with the bundled syntax definitions and emitted as
//! `<span class="hl-...">` runs; colours live in a stylesheet generated from
//! a bundled theme so that pages stay free of inline styles.

use std::collections::BTreeMap;
use std::fmt;

use syntect::highlighting::ThemeSet;
use syntect::html::{
    css_for_theme_with_class_style, ClassStyle, ClassedHTMLGenerator,
};
use syntect::parsing::{SyntaxReference, SyntaxSet};
use syntect::util::LinesWithEndings;

use crate::core::config::HighlightConfig;
use crate::core::error::{ProcessingError, Result};
use crate::processors::plain_code_block;

const CLASS_STYLE: ClassStyle = ClassStyle::SpacedPrefixed { prefix: "hl-" };

/// Highlights fenced code blocks.
pub struct Highlighter {
    syntaxes: SyntaxSet,
    aliases: BTreeMap<String, String>,
    stylesheet: Option<String>,
}

impl fmt::Debug for Highlighter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Highlighter")
            .field("syntaxes", &self.syntaxes.syntaxes().len())
            .field("aliases", &self.aliases)
            .field("stylesheet", &self.stylesheet.is_some())
            .finish()
    }
}

impl Highlighter {
    /// Loads the bundled syntaxes and, when a theme is configured, renders
    /// its stylesheet up front.
    pub fn new(config: &HighlightConfig) -> Result<Self> {
        let stylesheet = match &config.theme {
            Some(name) => Some(theme_stylesheet(name)?),
            None => None,
        };

        Ok(Self {
            syntaxes: SyntaxSet::load_defaults_newlines(),
            aliases: config
                .aliases
                .iter()
                .map(|(from, to)| {
                    (from.to_ascii_lowercase(), to.to_ascii_lowercase())
                })
                .collect(),
            stylesheet,
        })
    }

    /// Resolves a fence language tag, following configured aliases.
    pub fn resolve(&self, language: &str) -> Option<&SyntaxReference> {
        let token = language.trim().to_ascii_lowercase();
        if token.is_empty() {
            return None;
        }
        let token = self.aliases.get(&token).unwrap_or(&token);
        self.syntaxes.find_syntax_by_token(token)
    }

    /// Renders `code` as a highlighted block, or as a plain escaped block
    /// when the language is missing or unknown.
    pub fn highlight(&self, code: &str, language: Option<&str>) -> String {
        let Some(language) = language else {
            return plain_code_block(code);
        };
        let Some(syntax) = self.resolve(language) else {
            log::debug!("no syntax for fence language `{}`", language);
            return plain_code_block(code);
        };

        let mut generator = ClassedHTMLGenerator::new_with_class_style(
            syntax,
            &self.syntaxes,
            CLASS_STYLE,
        );
        for line in LinesWithEndings::from(code) {
            if let Err(e) =
                generator.parse_html_for_line_which_includes_newline(line)
            {
                log::debug!("highlighting `{}` failed: {}", language, e);
                return plain_code_block(code);
            }
        }

        format!(
            "<pre class=\"code-block language-{}\"><code>{}</code></pre>\n",
            handlebars::html_escape(&language.trim().to_ascii_lowercase()),
            generator.finalize()
        )
    }

    /// The CSS for the configured theme, if any.
    pub fn stylesheet(&self) -> Option<&str> {
        self.stylesheet.as_deref()
    }
}

/// Generates the stylesheet for one of the bundled `syntect` themes.
pub fn theme_stylesheet(name: &str) -> Result<String> {
    let mut themes = ThemeSet::load_defaults().themes;
    let theme = themes.remove(name).ok_or_else(|| {
        ProcessingError::configuration(
            format!(
                "Unknown highlight theme '{}' (available: {})",
                name,
                themes.keys().cloned().collect::<Vec<_>>().join(", ")
            ),
            None,
            None,
        )
    })?;

    css_for_theme_with_class_style(&theme, CLASS_STYLE).map_err(|e| {
        ProcessingError::configuration(
            format!("Failed to generate stylesheet for '{}': {}", name, e),
            None,
            Some(Box::new(e)),
        )
    })
}
