//! Match-pattern behaviour as seen through the coordinator's plans.

use vellum_core::{Frame, RunAt};
use vellum_inject::{CoordinatorConfig, InjectionCoordinator};
use vellum_patterns::PatternMatcher;
use vellum_sandbox::InMemoryResources;
use vellum_test::prelude::*;

use std::sync::Arc;

fn coordinator_with(pattern: &str) -> InjectionCoordinator {
    init_test_logging();
    let coordinator = InjectionCoordinator::new(
        CoordinatorConfig::default(),
        Arc::new(MockScriptEngine::new()),
        Arc::new(InMemoryResources::new()),
        Arc::new(MockHostShell::new()),
    );
    coordinator
        .register("ext1", vec![script_rule(pattern, "a.js", RunAt::DocumentIdle)])
        .unwrap();
    coordinator
}

fn planned(coordinator: &InjectionCoordinator, url: &str) -> bool {
    !coordinator.plan(url, &Frame::Top).is_empty()
}

#[test]
fn test_all_urls_covers_web_and_file_but_not_extension_pages() {
    let c = coordinator_with("<all_urls>");
    for url in ["https://a.com/", "http://a.com/", "ftp://a.com/", "file:///x"] {
        assert!(planned(&c, url), "{url} should match");
    }
    assert!(!planned(&c, "chrome-extension://abc/"));
}

#[test]
fn test_subdomain_wildcard_requires_a_subdomain() {
    let c = coordinator_with("*://*.example.com/*");
    assert!(planned(&c, "https://sub.example.com/path"));
    assert!(!planned(&c, "http://example.com/"));
}

#[test]
fn test_invalid_pattern_is_reported_not_planned() {
    init_test_logging();
    let coordinator = InjectionCoordinator::new(
        CoordinatorConfig::default(),
        Arc::new(MockScriptEngine::new()),
        Arc::new(InMemoryResources::new()),
        Arc::new(MockHostShell::new()),
    );
    let report = coordinator
        .register(
            "ext1",
            vec![
                script_rule("not a pattern", "bad.js", RunAt::DocumentIdle),
                all_urls_rule("good.js"),
            ],
        )
        .unwrap();

    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.accepted.len(), 1);
    let plan = coordinator.plan("https://example.com/", &Frame::Top);
    assert_eq!(plan.injections.len(), 1);
}

#[test]
fn test_compiled_predicates_are_stable() {
    let samples = [
        "https://sub.example.com/path",
        "http://example.com/",
        "https://example.com/a?b=c",
        "file:///etc/hosts",
    ];
    let first = PatternMatcher::new();
    let second = PatternMatcher::new();
    for pattern in ["<all_urls>", "*://*.example.com/*", "https://example.com/a*"] {
        let a = first.compile(pattern).unwrap();
        let b = second.compile(pattern).unwrap();
        for url in samples {
            assert_eq!(a.test(url), b.test(url), "{pattern} vs {url}");
            assert_eq!(a.test(url), a.test(url));
        }
    }
}
