//! `vellum plan`: a dry run of what a navigation would inject.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::json;
use tracing::debug;
use vellum_core::{ExtensionId, ExtensionManifest, Frame, RunAt};
use vellum_inject::{InjectionPlan, RegistrationReport, RuleRegistry};
use vellum_patterns::PatternMatcher;

use super::OutputFormat;
use crate::theme::Theme;

/// Which frame the plan is for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum FrameArg {
    /// Top-level document.
    #[default]
    Top,
    /// Same-document iframe.
    Child,
}

impl FrameArg {
    pub(crate) fn to_frame(self, parent_url: Option<String>) -> Frame {
        match self {
            Self::Top => Frame::Top,
            Self::Child => Frame::Child { parent_url },
        }
    }
}

/// Extension id for a manifest: its directory name, or its `name`.
fn extension_id(path: &Path, manifest: &ExtensionManifest) -> ExtensionId {
    path.parent()
        .and_then(Path::file_name)
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .map_or_else(|| ExtensionId::new(manifest.name.as_str()), ExtensionId::new)
}

/// Register every manifest and plan `url` against the result.
pub(crate) fn build_plan(
    manifests: &[PathBuf],
    url: &str,
    frame: &Frame,
    cache_capacity: usize,
) -> Result<(Vec<RegistrationReport>, InjectionPlan)> {
    let mut registry = RuleRegistry::new(PatternMatcher::with_capacity(cache_capacity));
    let mut reports = Vec::with_capacity(manifests.len());

    for path in manifests {
        let manifest = ExtensionManifest::load(path)
            .with_context(|| format!("loading {}", path.display()))?;
        let extension = extension_id(path, &manifest);
        debug!(
            extension_id = %extension,
            rules = manifest.content_scripts.len(),
            "Registering manifest"
        );
        let report = registry
            .register(extension, manifest.content_scripts)
            .with_context(|| format!("registering {}", path.display()))?;
        reports.push(report);
    }

    Ok((reports, registry.plan(url, frame)))
}

/// Print the plan for `url`.
pub(crate) fn run_plan(
    manifests: &[PathBuf],
    url: &str,
    frame: &Frame,
    cache_capacity: usize,
    format: OutputFormat,
) -> Result<()> {
    let (reports, plan) = build_plan(manifests, url, frame, cache_capacity)?;

    if format == OutputFormat::Json {
        let rejected: Vec<_> = reports
            .iter()
            .flat_map(|r| r.rejected.iter())
            .map(|r| json!({"rule": r.rule.to_string(), "error": r.error.to_string()}))
            .collect();
        let out = json!({"plan": plan, "rejected": rejected});
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    for report in &reports {
        for rejected in &report.rejected {
            println!(
                "{}",
                Theme::warning(&format!("{} skipped: {}", rejected.rule, rejected.error))
            );
        }
    }

    println!("{}", Theme::header(&format!("Injection plan for {}", plan.url)));
    if let Frame::Child { parent_url } = &plan.frame {
        let parent = parent_url.as_deref().unwrap_or("unknown parent");
        println!("{}", Theme::dimmed(&format!("child frame of {parent}")));
    }
    println!("{}", Theme::separator());

    if plan.is_empty() {
        println!("{}", Theme::dimmed("No rules match."));
        return Ok(());
    }

    for phase in RunAt::ALL {
        let mut entries = plan.phase(phase).peekable();
        if entries.peek().is_none() {
            continue;
        }
        println!("{phase}");
        for entry in entries {
            println!("  {} [{}]", entry.rule, entry.world);
            for style in &entry.styles {
                println!("    css {style}");
            }
            for script in &entry.scripts {
                println!("    js  {script}");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_test::fixtures::sample_manifest_json;

    fn write_manifest(root: &Path, dir: &str) -> PathBuf {
        let path = root.join(dir).join("manifest.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, sample_manifest_json()).unwrap();
        path
    }

    #[test]
    fn test_plan_orders_phases() {
        let tmp = tempfile::tempdir().unwrap();
        let manifest = write_manifest(tmp.path(), "reader");

        let (reports, plan) =
            build_plan(&[manifest], "https://news.example.com/", &Frame::Top, 16).unwrap();

        assert!(reports[0].is_clean());
        assert_eq!(reports[0].extension, ExtensionId::new("reader"));
        let phases: Vec<RunAt> = plan.injections.iter().map(|i| i.phase).collect();
        assert_eq!(phases, vec![RunAt::DocumentStart, RunAt::DocumentEnd]);
    }

    #[test]
    fn test_child_frame_keeps_all_frames_rules() {
        let tmp = tempfile::tempdir().unwrap();
        let manifest = write_manifest(tmp.path(), "reader");
        let frame = FrameArg::Child.to_frame(Some("https://news.example.com/".into()));

        let (_, plan) = build_plan(&[manifest], "https://news.example.com/", &frame, 16).unwrap();

        assert_eq!(plan.injections.len(), 1);
        assert_eq!(plan.injections[0].phase, RunAt::DocumentStart);
    }

    #[test]
    fn test_missing_manifest_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("none").join("manifest.json");
        assert!(build_plan(&[missing], "https://a.com/", &Frame::Top, 16).is_err());
    }
}
