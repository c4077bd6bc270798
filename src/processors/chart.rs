//! Bar charts from fenced `chart` blocks.
//!
//! The block body is a small line-oriented format:
//!
//! ```text
//! width: 700, height: 300
//! title: Posts per year
//! ---
//! year, posts, drafts
//! 2022, 14, 3
//! 2023, 21, 5
//! ```
//!
//! Configuration lines are optional and may carry several `key: value`
//! pairs separated by commas. The `---` separator is optional. The first
//! remaining line is the header row (label column plus one column per
//! series) and every following line is a data row. Rows that cannot be used
//! are skipped with a warning; a chart block never fails the build.

use std::fmt::Write as _;

use crate::core::error::Result;
use crate::core::traits::Processor;
use crate::processors::BlockOutput;

/// Default chart width in pixels.
pub const DEFAULT_WIDTH: u32 = 600;
/// Default chart height in pixels.
pub const DEFAULT_HEIGHT: u32 = 400;

const PALETTE: &[&str] =
    &["#4e79a7", "#f28e2b", "#e15759", "#76b7b2", "#59a14f", "#b07aa1"];

const MARGIN_LEFT: f64 = 48.0;
const MARGIN_RIGHT: f64 = 12.0;
const MARGIN_TOP: f64 = 16.0;
const MARGIN_BOTTOM: f64 = 32.0;
const TITLE_HEIGHT: f64 = 24.0;
const LEGEND_HEIGHT: f64 = 20.0;

/// One labelled row of values.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartRow {
    /// Category label, from the first column.
    pub label: String,
    /// One value per series.
    pub values: Vec<f64>,
}

/// A parsed chart block.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSpec {
    /// Width of the SVG in pixels.
    pub width: u32,
    /// Height of the SVG in pixels.
    pub height: u32,
    /// Optional caption.
    pub title: Option<String>,
    /// Column names: the label column followed by the series names.
    pub headers: Vec<String>,
    /// Data rows in source order.
    pub rows: Vec<ChartRow>,
}

impl Default for ChartSpec {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            title: None,
            headers: Vec::new(),
            rows: Vec::new(),
        }
    }
}

impl ChartSpec {
    /// Parses a chart block, collecting warnings for anything skipped.
    pub fn parse(source: &str) -> (Self, Vec<String>) {
        let mut spec = ChartSpec::default();
        let mut warnings = Vec::new();
        let mut in_config = true;

        for (index, raw) in source.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            if in_config {
                if line == "---" {
                    in_config = false;
                    continue;
                }
                if is_config_line(line) {
                    spec.apply_config_line(line, line_no, &mut warnings);
                    continue;
                }
                in_config = false;
            }

            let cells: Vec<&str> = line.split(',').map(str::trim).collect();
            if spec.headers.is_empty() {
                if cells.len() < 2 || cells.iter().any(|c| c.is_empty()) {
                    warnings.push(format!(
                        "chart line {}: header row needs a label column and at least one series",
                        line_no
                    ));
                    return (spec, warnings);
                }
                spec.headers = cells.iter().map(|c| c.to_string()).collect();
                continue;
            }

            match parse_row(&cells, spec.headers.len()) {
                Ok(row) => spec.rows.push(row),
                Err(reason) => warnings
                    .push(format!("chart line {}: {}, row skipped", line_no, reason)),
            }
        }

        if spec.headers.is_empty() {
            warnings.push("chart has no header row".to_string());
        } else if spec.rows.is_empty() {
            warnings.push("chart has no data rows".to_string());
        }

        (spec, warnings)
    }

    fn apply_config_line(
        &mut self,
        line: &str,
        line_no: usize,
        warnings: &mut Vec<String>,
    ) {
        for (key, value) in config_pairs(line) {
            match key.as_str() {
                "width" | "height" => match value.parse::<u32>() {
                    Ok(v) if v > 0 => {
                        if key == "width" {
                            self.width = v;
                        } else {
                            self.height = v;
                        }
                    }
                    _ => warnings.push(format!(
                        "chart line {}: invalid {} '{}', using default",
                        line_no, key, value
                    )),
                },
                "title" => {
                    self.title = Some(value).filter(|t| !t.is_empty());
                }
                _ => warnings.push(format!(
                    "chart line {}: unknown setting '{}' ignored",
                    line_no, key
                )),
            }
        }
    }

    /// Number of value series (header columns after the label).
    pub fn series_count(&self) -> usize {
        self.headers.len().saturating_sub(1)
    }

    /// Renders the chart as a `<figure>` holding an inline SVG.
    pub fn to_html(&self) -> String {
        let width = f64::from(self.width);
        let height = f64::from(self.height);
        let series = self.series_count();

        let mut top = MARGIN_TOP;
        if self.title.is_some() {
            top += TITLE_HEIGHT;
        }
        if series > 1 {
            top += LEGEND_HEIGHT;
        }
        let plot_left = MARGIN_LEFT;
        let plot_width = (width - MARGIN_LEFT - MARGIN_RIGHT).max(1.0);
        let plot_height = (height - top - MARGIN_BOTTOM).max(1.0);
        let plot_bottom = top + plot_height;

        let (min, max) = self.value_range();
        let span = max - min;
        let y_of = |v: f64| top + (max - v) / span * plot_height;
        let baseline = y_of(0.0);

        let mut svg = String::with_capacity(1024);
        let label = self.title.as_deref().unwrap_or("Bar chart");
        let _ = write!(
            svg,
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{w}\" height=\"{h}\" viewBox=\"0 0 {w} {h}\" role=\"img\" aria-label=\"{label}\">",
            w = self.width,
            h = self.height,
            label = escape(label)
        );
        let _ = write!(svg, "<title>{}</title>", escape(label));

        if let Some(title) = &self.title {
            let _ = write!(
                svg,
                "<text class=\"chart-title\" x=\"{}\" y=\"{}\" text-anchor=\"middle\">{}</text>",
                fmt_num(width / 2.0),
                fmt_num(MARGIN_TOP + TITLE_HEIGHT / 2.0),
                escape(title)
            );
        }

        if series > 1 {
            let legend_y = top - LEGEND_HEIGHT + 4.0;
            let _ = write!(svg, "<g class=\"legend\">");
            for (i, name) in self.headers.iter().skip(1).enumerate() {
                let x = plot_left + i as f64 * 110.0;
                let _ = write!(
                    svg,
                    "<rect x=\"{}\" y=\"{}\" width=\"10\" height=\"10\" fill=\"{}\"/><text x=\"{}\" y=\"{}\">{}</text>",
                    fmt_num(x),
                    fmt_num(legend_y),
                    colour(i),
                    fmt_num(x + 14.0),
                    fmt_num(legend_y + 9.0),
                    escape(name)
                );
            }
            let _ = write!(svg, "</g>");
        }

        let _ = write!(
            svg,
            "<line class=\"axis\" x1=\"{x1}\" y1=\"{y}\" x2=\"{x2}\" y2=\"{y}\" stroke=\"#666\"/>",
            x1 = fmt_num(plot_left),
            x2 = fmt_num(plot_left + plot_width),
            y = fmt_num(baseline)
        );
        let _ = write!(
            svg,
            "<text class=\"tick\" x=\"{x}\" y=\"{y}\" text-anchor=\"end\">{v}</text><text class=\"tick\" x=\"{x}\" y=\"{b}\" text-anchor=\"end\">{m}</text>",
            x = fmt_num(plot_left - 6.0),
            y = fmt_num(top + 4.0),
            v = fmt_num(max),
            b = fmt_num(plot_bottom),
            m = fmt_num(min)
        );

        if !self.rows.is_empty() && series > 0 {
            let group_width = plot_width / self.rows.len() as f64;
            let bar_width = group_width * 0.8 / series as f64;
            for (r, row) in self.rows.iter().enumerate() {
                let group_x = plot_left + r as f64 * group_width;
                let _ = write!(svg, "<g class=\"bar-group\">");
                for (s, value) in row.values.iter().enumerate() {
                    let x = group_x + group_width * 0.1 + s as f64 * bar_width;
                    let y = y_of(value.max(0.0));
                    let bar_height = (y_of(value.min(0.0)) - y).abs();
                    let _ = write!(
                        svg,
                        "<rect class=\"bar series-{s}\" x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\" fill=\"{}\"><title>{}: {}</title></rect>",
                        fmt_num(x),
                        fmt_num(y),
                        fmt_num(bar_width),
                        fmt_num(bar_height),
                        colour(s),
                        escape(&row.label),
                        fmt_num(*value),
                    );
                }
                let _ = write!(
                    svg,
                    "<text class=\"label\" x=\"{}\" y=\"{}\" text-anchor=\"middle\">{}</text></g>",
                    fmt_num(group_x + group_width / 2.0),
                    fmt_num(plot_bottom + 18.0),
                    escape(&row.label)
                );
            }
        }

        svg.push_str("</svg>");

        match &self.title {
            Some(title) => format!(
                "<figure class=\"chart\">{}<figcaption>{}</figcaption></figure>\n",
                svg,
                escape(title)
            ),
            None => format!("<figure class=\"chart\">{}</figure>\n", svg),
        }
    }

    fn value_range(&self) -> (f64, f64) {
        let values = self.rows.iter().flat_map(|row| row.values.iter());
        let (min, max) = values.fold((0.0_f64, 0.0_f64), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        });
        if (max - min).abs() < f64::EPSILON {
            (min, min + 1.0)
        } else {
            (min, max)
        }
    }
}

/// Renders `chart` fenced blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChartRenderer;

impl ChartRenderer {
    /// Creates a chart renderer.
    pub fn new() -> Self {
        Self
    }

    /// Parses and renders one block.
    pub fn render(&self, source: &str) -> BlockOutput {
        let (spec, warnings) = ChartSpec::parse(source);
        BlockOutput {
            html: spec.to_html(),
            warnings,
        }
    }
}

impl Processor for ChartRenderer {
    type Input = String;
    type Output = BlockOutput;
    type Context = ();

    fn process(
        &self,
        input: Self::Input,
        _context: Option<&Self::Context>,
    ) -> Result<Self::Output> {
        Ok(self.render(&input))
    }
}

fn is_config_line(line: &str) -> bool {
    line.split_once(':').is_some_and(|(key, _)| {
        let key = key.trim();
        !key.is_empty()
            && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !key.chars().all(|c| c.is_ascii_digit())
    })
}

/// Splits `width: 700, title: Sales, 2024` into key/value pairs. A segment
/// without a colon continues the previous value.
fn config_pairs(line: &str) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = Vec::new();
    for segment in line.split(',') {
        match segment.split_once(':') {
            Some((key, value))
                if is_config_line(segment) || pairs.is_empty() =>
            {
                pairs.push((
                    key.trim().to_ascii_lowercase(),
                    value.trim().to_string(),
                ));
            }
            _ => {
                if let Some((_, value)) = pairs.last_mut() {
                    value.push(',');
                    value.push_str(segment);
                    *value = value.trim().to_string();
                }
            }
        }
    }
    pairs
}

fn parse_row(cells: &[&str], columns: usize) -> std::result::Result<ChartRow, String> {
    if cells.len() != columns {
        return Err(format!(
            "expected {} columns but found {}",
            columns,
            cells.len()
        ));
    }
    let label = cells[0].to_string();
    let values = cells[1..]
        .iter()
        .map(|cell| {
            cell.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| format!("'{}' is not a number", cell))
        })
        .collect::<std::result::Result<Vec<f64>, String>>()?;
    Ok(ChartRow { label, values })
}

fn colour(series: usize) -> &'static str {
    PALETTE[series % PALETTE.len()]
}

fn escape(text: &str) -> String {
    handlebars::html_escape(text)
}

/// Formats a coordinate with at most two decimals and no trailing zeros.
fn fmt_num(value: f64) -> String {
    let text = format!("{:.2}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text == "-0" {
        "0".to_string()
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_dimensions() {
        let source = "width: 700, height: 300\n---\nmonth, visits\nJan, 10\nFeb, 20\n";
        let output = ChartRenderer::new().render(source);
        assert!(output.warnings.is_empty());
        assert!(output.html.starts_with("<figure class=\"chart\"><svg"));
        assert!(output.html.contains("width=\"700\""));
        assert!(output.html.contains("height=\"300\""));
        assert!(output.html.contains("viewBox=\"0 0 700 300\""));
        assert_eq!(output.html.matches("<rect class=\"bar").count(), 2);
    }

    #[test]
    fn test_defaults_without_config() {
        let (spec, warnings) = ChartSpec::parse("month, visits\nJan, 10\n");
        assert!(warnings.is_empty());
        assert_eq!((spec.width, spec.height), (DEFAULT_WIDTH, DEFAULT_HEIGHT));
        assert_eq!(spec.headers, vec!["month", "visits"]);
        assert_eq!(
            spec.rows,
            vec![ChartRow {
                label: "Jan".to_string(),
                values: vec![10.0]
            }]
        );
    }

    #[test]
    fn test_config_without_separator() {
        let (spec, warnings) =
            ChartSpec::parse("width: 320\nheight: 200\nlang, posts\nrust, 4\n");
        assert!(warnings.is_empty());
        assert_eq!((spec.width, spec.height), (320, 200));
        assert_eq!(spec.rows.len(), 1);
    }

    #[test]
    fn test_title_with_commas() {
        let (spec, _) = ChartSpec::parse(
            "title: Sales, 2024, width: 500\nq, total\nQ1, 3\n",
        );
        assert_eq!(spec.title.as_deref(), Some("Sales, 2024"));
        assert_eq!(spec.width, 500);
        assert!(spec.to_html().contains("<figcaption>Sales, 2024</figcaption>"));
    }

    #[test]
    fn test_malformed_rows_are_skipped() {
        let source = "month, a, b\nJan, 1, 2\nFeb, 3\nMar, x, 4\nApr, 5, 6\n";
        let (spec, warnings) = ChartSpec::parse(source);
        assert_eq!(spec.rows.len(), 2);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("line 3"));
        assert!(warnings[1].contains("'x' is not a number"));
        assert_eq!(spec.to_html().matches("<rect class=\"bar").count(), 4);
    }

    #[test]
    fn test_invalid_config_value_keeps_default() {
        let (spec, warnings) = ChartSpec::parse("width: wide\nm, v\na, 1\n");
        assert_eq!(spec.width, DEFAULT_WIDTH);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_empty_block_warns() {
        let output = ChartRenderer::new().render("");
        assert_eq!(output.warnings, vec!["chart has no header row"]);
        assert!(output.html.contains("viewBox=\"0 0 600 400\""));
    }

    #[test]
    fn test_labels_are_escaped() {
        let (spec, _) = ChartSpec::parse("k, v\n<b>, 1\n");
        let html = spec.to_html();
        assert!(html.contains("&lt;b&gt;"));
        assert!(!html.contains("<b>"));
    }

    #[test]
    fn test_fmt_num() {
        assert_eq!(fmt_num(12.0), "12");
        assert_eq!(fmt_num(12.5), "12.5");
        assert_eq!(fmt_num(1.0 / 3.0), "0.33");
        assert_eq!(fmt_num(-0.001), "0");
    }
}
