//! Code Metrics
//!
//! Cheap source-level measurements of generated animations, recorded with
//! telemetry so generations can be compared later. Nothing here is used to
//! accept or reject a candidate.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::validation::{defined_functions, literal_chars};

static LOOP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(for|while|loop|do)\b").expect("valid regex"));
static CONDITIONAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(if|switch)\b").expect("valid regex"));
static RANGE_BOUND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.\.=?\s*(\d+)").expect("valid regex"));
static X_BOUND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bx\s*<\s*(\d+)").expect("valid regex"));

const CHARACTER_FAMILIES: &[(&str, &str)] = &[
    ("rotational", "|/-\\<^>v"),
    ("density", ".oO@*#%+"),
    ("organic", ".oO*~-"),
    ("structural", "[](){}=_"),
    ("arrows", "<>^v"),
];

const SPATIAL_PATTERNS: &[(&str, &[&str])] = &[
    ("cross_row", &["row", "y =", "y in"]),
    ("cascade", &["drops", "fall", "rain", "cascade"]),
    ("wave", &["phase", "sin(", "cos(", "wave"]),
    ("mirror", &["mirror", "symmetric", "reflect"]),
    ("bounce", &["bounce", "vel", "velocity"]),
    ("spiral", &["spiral", "rotate", "spin"]),
    ("particle", &["particle", "entities"]),
];

const MOTION_INDICATORS: &[&str] = &[
    "frame", "velocity", "vel", "position", "move", "offset", "step", "increment", "speed",
    "delta",
];

const MAX_LISTED_CHARS: usize = 50;

/// Measurements of one source text
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CodeMetrics {
    /// Length in characters
    pub code_length: usize,
    /// CRC32 of the source, hex
    pub code_hash: String,
    /// All lines
    pub lines_total: usize,
    /// Non-blank, non-comment lines
    pub lines_code: usize,
    /// `fn` definitions
    pub functions_count: usize,
    /// Loop keywords
    pub loops_count: usize,
    /// Conditional keywords
    pub conditionals_count: usize,
    /// Distinct non-whitespace literal characters
    pub unique_chars_count: usize,
    /// Those characters, sorted and capped
    pub unique_chars: String,
    /// Visual character families present
    pub character_families: Vec<&'static str>,
    /// Motion patterns suggested by keywords
    pub spatial_patterns: Vec<&'static str>,
    /// Mentions both `line1` and `line2`
    pub uses_both_rows: bool,
    /// Builds full 20-column rows
    pub uses_full_width: bool,
    /// Mentions a motion indicator
    pub has_motion_logic: bool,
    /// Rough share of the width the animation draws on
    pub estimated_width_percent: f64,
    /// Entry point name, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
}

impl CodeMetrics {
    /// Measure `source`, optionally noting the expected entry point
    #[must_use]
    pub fn analyze(source: &str, entry_point: Option<&str>) -> Self {
        let chars = literal_chars(source);
        let unique_chars: String = chars.iter().take(MAX_LISTED_CHARS).collect();
        let lower = source.to_lowercase();

        let character_families = CHARACTER_FAMILIES
            .iter()
            .filter(|(_, members)| members.chars().any(|c| chars.contains(&c)))
            .map(|(name, _)| *name)
            .collect();

        let mut spatial_patterns: Vec<&'static str> = SPATIAL_PATTERNS
            .iter()
            .filter(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
            .map(|(name, _)| *name)
            .collect();
        if spatial_patterns.is_empty() {
            spatial_patterns.push("unknown");
        }

        let uses_full_width = full_width(source);

        Self {
            code_length: source.chars().count(),
            code_hash: format!("{:08x}", crc32fast::hash(source.as_bytes())),
            lines_total: source.split('\n').count(),
            lines_code: source
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with("//"))
                .count(),
            functions_count: defined_functions(source).len(),
            loops_count: LOOP.find_iter(source).count(),
            conditionals_count: CONDITIONAL.find_iter(source).count(),
            unique_chars_count: chars.len(),
            unique_chars,
            character_families,
            spatial_patterns,
            uses_both_rows: source.contains("line1") && source.contains("line2"),
            uses_full_width,
            has_motion_logic: MOTION_INDICATORS.iter().any(|m| lower.contains(m)),
            estimated_width_percent: estimate_width(source, uses_full_width),
            function_name: entry_point.map(str::to_string),
        }
    }

    /// Metrics as a JSON object for telemetry
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

fn full_width(source: &str) -> bool {
    source.contains("blank_row(")
        || source.contains("blank_line(")
        || source.contains(".width")
        || source.contains("0..20")
}

fn max_bound(re: &Regex, source: &str) -> Option<u32> {
    re.captures_iter(source)
        .filter_map(|c| c.get(1)?.as_str().parse().ok())
        .max()
}

fn estimate_width(source: &str, full: bool) -> f64 {
    if full {
        return 100.0;
    }
    max_bound(&RANGE_BOUND, source)
        .or_else(|| max_bound(&X_BOUND, source))
        .map_or(50.0, |bound| (f64::from(bound) / 20.0 * 100.0).min(100.0))
}
