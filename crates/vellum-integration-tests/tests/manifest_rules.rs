//! Manifests, on-disk resources and file-based configuration together.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use vellum_config::loader::load_with_env;
use vellum_core::{Document, ExtensionManifest, Frame, ReadyState, RunAt};
use vellum_inject::config_bridge::to_coordinator_config;
use vellum_inject::{CoordinatorConfig, InjectionCoordinator, InjectionEvent};
use vellum_sandbox::{DirectoryResources, SandboxKind};
use vellum_test::prelude::*;

const EXTENSION: &str = "reader-tools";

fn write(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}

/// Lay out an unpacked extension: `manifest.json` plus its resources.
fn unpack(root: &Path) -> ExtensionManifest {
    let dir = root.join(EXTENSION);
    write(&dir.join("manifest.json"), sample_manifest_json());
    write(&dir.join("reader.js"), "reader");
    write(&dir.join("reader.css"), "article { max-width: 40em }");
    write(&dir.join("hook.js"), "window.__hooked = true");
    ExtensionManifest::load(&dir.join("manifest.json")).unwrap()
}

fn worker_config(root: &Path, timeout_ms: u64) -> CoordinatorConfig {
    let path = root.join("vellum.toml");
    write(
        &path,
        &format!("[sandbox]\nkind = \"worker\"\nexecution_timeout_ms = {timeout_ms}\n"),
    );
    let resolved = load_with_env(Some(&path), &HashMap::new()).unwrap();
    assert_eq!(resolved.loaded_files, vec![path.display().to_string()]);
    to_coordinator_config(&resolved.config)
}

fn coordinator(
    root: &Path,
    config: CoordinatorConfig,
    engine: &MockScriptEngine,
) -> InjectionCoordinator {
    init_test_logging();
    InjectionCoordinator::new(
        config,
        Arc::new(engine.clone()),
        Arc::new(DirectoryResources::new(root)),
        Arc::new(MockHostShell::new()),
    )
}

#[test]
fn test_manifest_rules_inject_from_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let manifest = unpack(tmp.path());
    let config = worker_config(tmp.path(), 2_000);
    assert_eq!(config.sandbox, SandboxKind::Worker);

    let engine = MockScriptEngine::new();
    let coordinator = coordinator(tmp.path(), config, &engine);
    let report = coordinator.register_manifest(EXTENSION, &manifest).unwrap();
    assert!(report.is_clean());
    assert_eq!(report.accepted.len(), 2);

    let doc = MockDocument::with_state(ReadyState::Complete);
    coordinator.on_navigate(doc.clone(), "https://news.example.com/story");

    assert_eq!(doc.executed_main_scripts(), vec!["window.__hooked = true"]);
    assert_eq!(engine.executed_resources(), vec!["reader.js"]);
    let styles = doc.attached_styles();
    assert_eq!(styles.len(), 1);
    assert_eq!(styles[0].css, "article { max-width: 40em }");
}

#[test]
fn test_exclude_matches_filters_manifest_rule() {
    let tmp = tempfile::tempdir().unwrap();
    let manifest = unpack(tmp.path());
    let engine = MockScriptEngine::new();
    let coordinator = coordinator(tmp.path(), CoordinatorConfig::default(), &engine);
    coordinator.register_manifest(EXTENSION, &manifest).unwrap();

    let plan = coordinator.plan("https://admin.example.com/users", &Frame::Top);
    assert_eq!(plan.injections.len(), 1);
    assert_eq!(plan.injections[0].phase, RunAt::DocumentStart);

    let doc = MockDocument::with_state(ReadyState::Complete);
    coordinator.on_navigate(doc.clone(), "https://admin.example.com/users");
    assert!(engine.runs().is_empty());
    assert!(doc.attached_styles().is_empty());
    assert_eq!(doc.executed_main_scripts().len(), 1);
}

#[test]
fn test_worker_timeout_fails_only_the_slow_script() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("slow-ext");
    write(&dir.join("slow.js"), "slow");
    write(&dir.join("fast.js"), "fast");

    let engine = MockScriptEngine::new().with_program("slow", |_| {
        thread::sleep(Duration::from_millis(300));
        Ok(())
    });
    let coordinator = coordinator(tmp.path(), worker_config(tmp.path(), 50), &engine);
    coordinator
        .register(
            "slow-ext",
            vec![vellum_core::RuleSpec::new(["<all_urls>"]).with_js(["slow.js", "fast.js"])],
        )
        .unwrap();
    let mut events = coordinator.subscribe_events();

    let doc = MockDocument::with_state(ReadyState::Complete);
    coordinator.on_navigate(doc.clone(), "https://example.com/");

    let kinds: Vec<_> = events.drain();
    assert_eq!(kinds.len(), 2);
    match kinds[0].as_ref() {
        InjectionEvent::InjectionFailed {
            resource, error, ..
        } => {
            assert_eq!(resource.as_str(), "slow.js");
            assert!(error.contains("exceeded"), "unexpected error: {error}");
        },
        other => panic!("expected a failure, got {other:?}"),
    }
    assert_eq!(kinds[1].event_type(), "script_injected");
    assert_eq!(coordinator.records(doc.id()).len(), 2);
}

#[test]
fn test_missing_resource_on_disk_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = MockScriptEngine::new();
    let coordinator = coordinator(tmp.path(), CoordinatorConfig::default(), &engine);
    coordinator.register("ghost", vec![all_urls_rule("nowhere.js")]).unwrap();
    let mut events = coordinator.subscribe_events();

    let doc = MockDocument::with_state(ReadyState::Complete);
    coordinator.on_navigate(doc.clone(), "https://example.com/");

    let types: Vec<&str> = events.drain().iter().map(|e| e.event_type()).collect();
    assert_eq!(types, vec!["injection_failed"]);
    assert!(engine.runs().is_empty());
}
