//! `vellum check-pattern`.

use anyhow::{Context, Result};
use serde_json::json;
use vellum_patterns::{PatternMatcher, normalize_url};

use super::OutputFormat;
use crate::theme::Theme;

/// One URL tested against the pattern set.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct UrlVerdict {
    pub(crate) url: String,
    pub(crate) normalized: String,
    pub(crate) matched: bool,
}

/// Test every URL against `pattern`, minus `excludes`.
pub(crate) fn evaluate(
    pattern: &str,
    excludes: &[String],
    urls: &[String],
) -> Result<Vec<UrlVerdict>> {
    let matcher = PatternMatcher::new();
    let filter = matcher
        .filter(&[pattern.to_string()], excludes)
        .with_context(|| format!("invalid match pattern set for {pattern}"))?;

    Ok(urls
        .iter()
        .map(|url| UrlVerdict {
            url: url.clone(),
            normalized: normalize_url(url),
            matched: filter.test(url),
        })
        .collect())
}

/// Print which URLs `pattern` matches.
pub(crate) fn check_pattern(
    pattern: &str,
    excludes: &[String],
    urls: &[String],
    format: OutputFormat,
) -> Result<()> {
    let verdicts = evaluate(pattern, excludes, urls)?;

    match format {
        OutputFormat::Json => {
            let results: Vec<_> = verdicts
                .iter()
                .map(|v| json!({"url": v.url, "normalized": v.normalized, "matched": v.matched}))
                .collect();
            let out = json!({"pattern": pattern, "exclude": excludes, "results": results});
            println!("{}", serde_json::to_string_pretty(&out)?);
        },
        OutputFormat::Pretty => {
            println!("{}", Theme::header(&format!("Pattern {pattern}")));
            for exclude in excludes {
                println!("  {}", Theme::dimmed(&format!("excluding {exclude}")));
            }
            println!("{}", Theme::separator());
            for v in &verdicts {
                let shown = if v.normalized == v.url {
                    v.url.clone()
                } else {
                    format!("{} {}", v.url, Theme::dimmed(&format!("({})", v.normalized)))
                };
                if v.matched {
                    println!("{}", Theme::success(&shown));
                } else {
                    println!("{}", Theme::miss(&shown));
                }
            }
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_evaluate_reports_each_url() {
        let verdicts = evaluate(
            "*://*.example.com/*",
            &[],
            &urls(&["https://sub.example.com/path", "http://example.com/"]),
        )
        .unwrap();

        assert!(verdicts[0].matched);
        assert!(!verdicts[1].matched);
    }

    #[test]
    fn test_evaluate_applies_excludes() {
        let verdicts = evaluate(
            "<all_urls>",
            &["https://admin.example.com/*".to_string()],
            &urls(&["https://admin.example.com/x", "https://example.com"]),
        )
        .unwrap();

        assert!(!verdicts[0].matched);
        assert!(verdicts[1].matched);
        assert_eq!(verdicts[1].normalized, "https://example.com/");
    }

    #[test]
    fn test_evaluate_rejects_bad_pattern() {
        assert!(evaluate("example.com", &[], &urls(&["https://example.com/"])).is_err());
    }
}
