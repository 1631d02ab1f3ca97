//! Static checks on candidate source
//!
//! Nothing here executes code. The model's raw reply is first reduced to a
//! candidate script ([`extract_candidate`]), then checked against structural
//! rules ([`StaticValidator`]). Every unmet rule is reported with its own
//! text so the next prompt can name exactly what was missing.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use super::ValidationError;

static FN_DEF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:private\s+)?fn\s+(\w+)\s*\(").expect("valid regex"));
static WIDTH_EVIDENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b20\b|\.width\b|\bblank_row\s*\(|\bblank_line\s*\(").expect("valid regex")
});
static BINDING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:let|const|for)\s+\(?\s*(\w+)(?:\s*,\s*(\w+))?").expect("valid regex")
});
static STRING_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""((?:[^"\\\n]|\\.)*)""#).expect("valid regex"));
static CHAR_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'((?:[^'\\\n]|\\.))'").expect("valid regex"));

/// Identifier stems that indicate something moves
pub const MOTION_STEMS: &[&str] = &[
    "frame", "velocity", "vel", "pos", "position", "move", "offset", "step", "speed", "delta",
    "counter", "tick", "phase",
];

/// A structural rule a candidate failed
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StaticRule {
    /// No function definition in the reply
    NoFunction,
    /// Never calls `write_frame`
    MissingWriteFrame,
    /// Does not bind both display rows
    MissingRowBindings,
    /// Too little code to be an animation
    TooShort {
        /// Characters found
        length: usize,
        /// Characters required
        minimum: usize,
    },
    /// Nothing suggests the full row width is used
    NoFullWidth,
    /// No counter, position or velocity-like identifier
    NoMotion,
    /// Literal content uses too few distinct characters
    TooFewDistinctChars {
        /// Distinct characters found
        found: usize,
        /// Distinct characters required
        minimum: usize,
    },
}

impl std::fmt::Display for StaticRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoFunction => write!(f, "No function found"),
            Self::MissingWriteFrame => write!(f, "Missing write_frame"),
            Self::MissingRowBindings => {
                write!(f, "Missing row bindings: build both line1 and line2 every frame")
            }
            Self::TooShort { length, minimum } => {
                write!(f, "Code too short ({length} chars, need at least {minimum})")
            }
            Self::NoFullWidth => write!(
                f,
                "No full-width rows: use all 20 columns (animator.width, blank_row() or blank_line())"
            ),
            Self::NoMotion => write!(
                f,
                "No motion: keep a position, velocity, offset or frame counter variable"
            ),
            Self::TooFewDistinctChars { found, minimum } => write!(
                f,
                "Too few distinct characters in literals ({found}, need at least {minimum})"
            ),
        }
    }
}

/// Reduce a raw model reply to a candidate script
///
/// Prefers a ```` ```rhai ```` fence, then any fence, then the whole reply.
/// Leading prose before the first code line and trailing prose after the
/// last closing brace are dropped.
pub fn extract_candidate(raw: &str) -> Result<String, ValidationError> {
    let body = fenced_block(raw).unwrap_or(raw);
    let lines: Vec<&str> = body.lines().collect();

    let start = lines
        .iter()
        .position(|line| FN_DEF.is_match(line))
        .map(|fn_line| {
            // Keep comments and top-level constants directly above the first fn
            let mut start = fn_line;
            while start > 0 && looks_like_code(lines[start - 1]) {
                start -= 1;
            }
            start
        });

    let Some(start) = start else {
        return Err(ValidationError::static_rules(vec![StaticRule::NoFunction]));
    };

    let end = lines
        .iter()
        .rposition(|line| line.trim_end().ends_with('}'))
        .map_or(lines.len(), |i| i + 1)
        .max(start + 1);

    Ok(lines[start..end].join("\n").trim().to_string())
}

fn fenced_block(raw: &str) -> Option<&str> {
    let open = raw.find("```rhai").or_else(|| raw.find("```"))?;
    let after_marker = &raw[open + 3..];
    // Skip the language tag line
    let body_start = after_marker.find('\n').map_or(after_marker.len(), |i| i + 1);
    let body = &after_marker[body_start..];
    Some(body.find("```").map_or(body, |close| &body[..close]))
}

fn looks_like_code(line: &str) -> bool {
    let t = line.trim_start();
    t.is_empty()
        || t.starts_with("//")
        || t.starts_with("const ")
        || t.starts_with("let ")
        || t.ends_with(';')
        || t.ends_with('}')
}

/// Function names defined in a candidate
pub fn defined_functions(source: &str) -> Vec<String> {
    FN_DEF
        .captures_iter(source)
        .map(|c| c[1].to_string())
        .collect()
}

/// Distinct non-whitespace characters appearing in string and char literals
pub fn literal_chars(source: &str) -> BTreeSet<char> {
    let mut chars = BTreeSet::new();
    let literals = STRING_LITERAL
        .captures_iter(source)
        .chain(CHAR_LITERAL.captures_iter(source));
    for cap in literals {
        let mut escaped = false;
        for c in cap[1].chars() {
            if escaped {
                escaped = false;
                continue;
            }
            if c == '\\' {
                escaped = true;
                continue;
            }
            if !c.is_whitespace() {
                chars.insert(c);
            }
        }
    }
    chars
}

/// Identifiers introduced by `let`, `const` or `for`
pub fn bound_identifiers(source: &str) -> Vec<String> {
    BINDING
        .captures_iter(source)
        .flat_map(|c| {
            [c.get(1), c.get(2)]
                .into_iter()
                .flatten()
                .map(|m| m.as_str().to_string())
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Structural checks on candidate source
#[derive(Clone, Debug)]
pub struct StaticValidator {
    min_length: usize,
    min_distinct_chars: usize,
}

impl Default for StaticValidator {
    fn default() -> Self {
        Self {
            min_length: 50,
            min_distinct_chars: 4,
        }
    }
}

impl StaticValidator {
    /// Validator with default thresholds (50 chars, 4 distinct literal chars)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the thresholds
    #[must_use]
    pub fn with_thresholds(min_length: usize, min_distinct_chars: usize) -> Self {
        Self {
            min_length,
            min_distinct_chars,
        }
    }

    /// Minimum source length in characters
    #[must_use]
    pub fn min_length(&self) -> usize {
        self.min_length
    }

    /// Minimum distinct non-whitespace literal characters
    #[must_use]
    pub fn min_distinct_chars(&self) -> usize {
        self.min_distinct_chars
    }

    /// Every rule the source violates, in a fixed order
    #[must_use]
    pub fn violations(&self, source: &str) -> Vec<StaticRule> {
        let mut violations = Vec::new();

        if defined_functions(source).is_empty() {
            violations.push(StaticRule::NoFunction);
        }
        if !source.contains("write_frame") {
            violations.push(StaticRule::MissingWriteFrame);
        }
        let bound = bound_identifiers(source);
        let binds = |row: &str| bound.iter().any(|ident| ident == row);
        if !(binds("line1") && binds("line2")) {
            violations.push(StaticRule::MissingRowBindings);
        }

        let length = source.chars().count();
        if length < self.min_length {
            violations.push(StaticRule::TooShort {
                length,
                minimum: self.min_length,
            });
        }

        if !WIDTH_EVIDENCE.is_match(source) {
            violations.push(StaticRule::NoFullWidth);
        }

        let moves = bound.iter().any(|ident| {
            let ident = ident.to_ascii_lowercase();
            MOTION_STEMS.iter().any(|stem| ident.contains(stem))
        });
        if !moves {
            violations.push(StaticRule::NoMotion);
        }

        let found = literal_chars(source).len();
        if found < self.min_distinct_chars {
            violations.push(StaticRule::TooFewDistinctChars {
                found,
                minimum: self.min_distinct_chars,
            });
        }

        violations
    }

    /// Pass, or fail with every unmet rule
    pub fn check(&self, source: &str) -> Result<(), ValidationError> {
        let violations = self.violations(source);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::static_rules(violations))
        }
    }
}
