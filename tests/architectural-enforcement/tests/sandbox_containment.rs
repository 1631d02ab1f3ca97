//! Integration Test: Sandbox Containment
//!
//! **Policy**: Generated scripts are untrusted. Only `agent/core/src/sandbox`
//! may touch the script engine; everything else goes through the `Sandbox`
//! and `AnimationProgram` traits.

use architectural_enforcement::{find_in_production, outside, workspace_root};

const SANDBOX_DIR: &str = "agent/core/src/sandbox";

#[test]
fn test_script_engine_is_confined_to_sandbox() {
    let root = workspace_root();
    let hits = find_in_production(&root, &["rhai::", "use rhai", "Engine::new"]);

    assert!(
        hits.iter().any(|hit| hit.path.starts_with(SANDBOX_DIR)),
        "expected the sandbox itself to use the engine"
    );

    let violations = outside(hits, SANDBOX_DIR);
    if !violations.is_empty() {
        for violation in &violations {
            eprintln!("  {violation}");
        }
        panic!(
            "Found {} script engine reference(s) outside {SANDBOX_DIR}",
            violations.len()
        );
    }
}

#[test]
fn test_daemon_never_loads_scripts_directly() {
    let root = workspace_root();
    let hits: Vec<_> = find_in_production(&root, &[".invoke(", ".load("])
        .into_iter()
        .filter(|hit| hit.path.starts_with("agent/daemon"))
        .collect();

    assert!(hits.is_empty(), "daemon runs scripts directly: {hits:?}");
}
