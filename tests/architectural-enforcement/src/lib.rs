//! Architectural Enforcement
//!
//! Source-scanning helpers shared by the tests in `tests/`:
//! - Untrusted script execution stays inside the sandbox module
//! - Blocking sleeps stay inside display drivers
//!
//! Only production code is scanned. A file's `#[cfg(test)]` module and
//! everything after it are skipped, as are line comments.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source roots, relative to the workspace root
pub const SOURCE_ROOTS: &[&str] = &["agent/core/src", "agent/daemon/src"];

/// Workspace root, two levels above this crate
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .unwrap_or_else(|_| PathBuf::from("../.."))
}

/// A matching line of production code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit {
    /// File, relative to the workspace root
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// Trimmed source line
    pub text: String,
}

impl std::fmt::Display for Hit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line, self.text)
    }
}

/// Every `.rs` file under the production roots
#[must_use]
pub fn production_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = SOURCE_ROOTS
        .iter()
        .map(|dir| root.join(dir))
        .filter(|dir| dir.exists())
        .flat_map(|dir| {
            walkdir::WalkDir::new(dir)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
                .map(walkdir::DirEntry::into_path)
                .collect::<Vec<_>>()
        })
        .collect();
    files.sort();
    files
}

/// Production lines of one file, with line comments removed
///
/// Stops at the first `#[cfg(test)]`.
#[must_use]
pub fn code_lines(content: &str) -> Vec<(usize, String)> {
    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| line.trim() != "#[cfg(test)]")
        .map(|(idx, line)| {
            let code = line.split("//").next().unwrap_or(line);
            (idx + 1, code.to_string())
        })
        .filter(|(_, code)| !code.trim().is_empty())
        .collect()
}

/// Lines of production code containing any of `needles`
#[must_use]
pub fn find_in_production(root: &Path, needles: &[&str]) -> Vec<Hit> {
    let mut hits = Vec::new();
    for path in production_files(root) {
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        for (line, code) in code_lines(&content) {
            if needles.iter().any(|needle| code.contains(needle)) {
                hits.push(Hit {
                    path: path.strip_prefix(root).unwrap_or(&path).to_path_buf(),
                    line,
                    text: code.trim().to_string(),
                });
            }
        }
    }
    hits
}

/// Hits whose file is not under `allowed_dir`
#[must_use]
pub fn outside(hits: Vec<Hit>, allowed_dir: &str) -> Vec<Hit> {
    hits.into_iter()
        .filter(|hit| !hit.path.starts_with(allowed_dir))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_lines_skip_comments_and_tests() {
        let source = "fn a() {}\n// std::thread::sleep\nlet x = 1; // rhai::Engine\n#[cfg(test)]\nmod tests { rhai::Engine }\n";
        let lines = code_lines(source);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], (1, "fn a() {}".to_string()));
        assert_eq!(lines[1].0, 3);
        assert!(!lines[1].1.contains("rhai"));
    }

    #[test]
    fn test_outside_filters_allowed_dir() {
        let hit = |p: &str| Hit {
            path: PathBuf::from(p),
            line: 1,
            text: String::new(),
        };
        let hits = vec![hit("agent/core/src/sandbox/rhai_engine.rs"), hit("agent/core/src/player.rs")];
        let remaining = outside(hits, "agent/core/src/sandbox");
        assert_eq!(remaining, vec![hit("agent/core/src/player.rs")]);
    }

    #[test]
    fn test_workspace_root_holds_sources() {
        let root = workspace_root();
        assert!(root.join("agent/core/src/lib.rs").exists(), "{}", root.display());
        assert!(!production_files(&root).is_empty());
    }
}
