//! Integration Test: Sleep Confinement
//!
//! **Policy**: Blocking sleeps pace frames and nothing else. They live in the
//! display drivers, which always run on the blocking pool. Async code waits
//! with `tokio::time` and the shutdown signal instead.

use architectural_enforcement::{find_in_production, outside, workspace_root};

const DISPLAY_DIR: &str = "agent/core/src/display";

#[test]
fn test_blocking_sleep_is_confined_to_display_drivers() {
    let root = workspace_root();
    let hits = find_in_production(&root, &["thread::sleep"]);

    let violations = outside(hits, DISPLAY_DIR);
    if !violations.is_empty() {
        eprintln!("\nBlocking sleeps found outside {DISPLAY_DIR}:");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nUse tokio::time::sleep with a shutdown select, or frame_sleep on a driver.");
        panic!("Found {} blocking sleep(s)", violations.len());
    }
}

#[test]
fn test_async_sleeps_observe_shutdown() {
    let root = workspace_root();
    let hits = find_in_production(&root, &["tokio::time::sleep("]);

    for hit in &hits {
        let content = std::fs::read_to_string(root.join(&hit.path)).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        let start = hit.line.saturating_sub(4);
        let end = (hit.line + 3).min(lines.len());
        let window = lines[start..end].join("\n");
        assert!(
            window.contains("select!") && window.contains("shutdown"),
            "sleep without a shutdown branch: {hit}"
        );
    }
}
