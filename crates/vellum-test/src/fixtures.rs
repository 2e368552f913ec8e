//! Test fixtures for rules and manifests.

use vellum_core::{ExtensionId, RuleSpec, RunAt, World};

/// Create a test extension ID.
#[must_use]
pub fn test_extension(name: &str) -> ExtensionId {
    ExtensionId::new(name)
}

/// `{matches: ["<all_urls>"], js: [js], run_at: document_idle, world: ISOLATED}`.
#[must_use]
pub fn all_urls_rule(js: &str) -> RuleSpec {
    RuleSpec::new(["<all_urls>"]).with_js([js])
}

/// An isolated-world script rule for one pattern and phase.
#[must_use]
pub fn script_rule(pattern: &str, js: &str, run_at: RunAt) -> RuleSpec {
    RuleSpec::new([pattern]).with_js([js]).with_run_at(run_at)
}

/// A main-world script rule.
#[must_use]
pub fn main_world_rule(pattern: &str, js: &str, run_at: RunAt) -> RuleSpec {
    script_rule(pattern, js, run_at).with_world(World::Main)
}

/// A stylesheet-only rule.
#[must_use]
pub fn style_rule(pattern: &str, css: &str, run_at: RunAt) -> RuleSpec {
    RuleSpec::new([pattern]).with_css([css]).with_run_at(run_at)
}

/// A `manifest.json` with two content-script entries.
#[must_use]
pub fn sample_manifest_json() -> &'static str {
    r#"{
  "name": "Reader Tools",
  "version": "1.2.0",
  "content_scripts": [
    {
      "matches": ["https://*.example.com/*"],
      "exclude_matches": ["https://admin.example.com/*"],
      "js": ["reader.js"],
      "css": ["reader.css"],
      "run_at": "document_end"
    },
    {
      "matches": ["<all_urls>"],
      "js": ["hook.js"],
      "run_at": "document_start",
      "all_frames": true,
      "world": "MAIN"
    }
  ]
}"#
}
