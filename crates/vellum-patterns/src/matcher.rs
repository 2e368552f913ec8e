//! Cached pattern compilation and rule-level URL filters.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::error::PatternResult;
use crate::pattern::{Predicate, normalize_url};

/// Default number of compiled patterns kept in the cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 4096;

/// Compiles match patterns, caching predicates by source string.
///
/// Compilation is pure, so a cached predicate is interchangeable with a
/// freshly compiled one. Once the cache is full new patterns are still
/// compiled, just not retained.
#[derive(Debug)]
pub struct PatternMatcher {
    cache: DashMap<String, Arc<Predicate>>,
    capacity: usize,
}

impl PatternMatcher {
    /// Create a matcher with the default cache capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    /// Create a matcher that caches at most `capacity` patterns.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            cache: DashMap::new(),
            capacity,
        }
    }

    /// Compile one pattern, reusing a cached predicate when available.
    ///
    /// # Errors
    ///
    /// Returns a [`PatternError`](crate::PatternError) if the pattern is malformed.
    /// Failures are not cached.
    pub fn compile(&self, pattern: &str) -> PatternResult<Arc<Predicate>> {
        if let Some(hit) = self.cache.get(pattern) {
            trace!(pattern, "Pattern cache hit");
            return Ok(Arc::clone(hit.value()));
        }

        let predicate = Arc::new(Predicate::compile(pattern)?);
        if self.cache.len() < self.capacity {
            self.cache
                .insert(pattern.to_owned(), Arc::clone(&predicate));
        } else {
            debug!(pattern, capacity = self.capacity, "Pattern cache full, not caching");
        }
        Ok(predicate)
    }

    /// Compile a list of patterns, failing on the first malformed one.
    ///
    /// # Errors
    ///
    /// Returns the first [`PatternError`](crate::PatternError) encountered.
    pub fn compile_all(&self, patterns: &[String]) -> PatternResult<Vec<Arc<Predicate>>> {
        patterns.iter().map(|p| self.compile(p)).collect()
    }

    /// Build the include/exclude filter for one rule.
    ///
    /// # Errors
    ///
    /// Returns the first [`PatternError`](crate::PatternError) in either list.
    pub fn filter(&self, include: &[String], exclude: &[String]) -> PatternResult<UrlFilter> {
        Ok(UrlFilter {
            include: self.compile_all(include)?,
            exclude: self.compile_all(exclude)?,
        })
    }

    /// Whether any predicate matches `url` (logical OR).
    #[must_use]
    pub fn matches(url: &str, predicates: &[Arc<Predicate>]) -> bool {
        let normalized = normalize_url(url);
        predicates.iter().any(|p| p.test_forms(url, &normalized))
    }

    /// Number of cached predicates.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

impl Default for PatternMatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Compiled match and exclude patterns of one rule.
#[derive(Debug, Clone)]
pub struct UrlFilter {
    include: Vec<Arc<Predicate>>,
    exclude: Vec<Arc<Predicate>>,
}

impl UrlFilter {
    /// Whether `url` matches any include pattern and no exclude pattern.
    #[must_use]
    pub fn test(&self, url: &str) -> bool {
        let normalized = normalize_url(url);
        self.include.iter().any(|p| p.test_forms(url, &normalized))
            && !self.exclude.iter().any(|p| p.test_forms(url, &normalized))
    }

    /// Include predicates.
    #[must_use]
    pub fn include(&self) -> &[Arc<Predicate>] {
        &self.include
    }

    /// Exclude predicates.
    #[must_use]
    pub fn exclude(&self) -> &[Arc<Predicate>] {
        &self.exclude
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PatternError;

    fn patterns(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_compile_is_cached_by_source() {
        let matcher = PatternMatcher::new();
        let a = matcher.compile("https://a.com/*").unwrap();
        let b = matcher.compile("https://a.com/*").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(matcher.cached(), 1);
    }

    #[test]
    fn test_failures_are_not_cached() {
        let matcher = PatternMatcher::new();
        assert!(matcher.compile("nope").is_err());
        assert_eq!(matcher.cached(), 0);
    }

    #[test]
    fn test_full_cache_still_compiles() {
        let matcher = PatternMatcher::with_capacity(1);
        matcher.compile("https://a.com/*").unwrap();
        let p = matcher.compile("https://b.com/*").unwrap();
        assert!(p.test("https://b.com/x"));
        assert_eq!(matcher.cached(), 1);
    }

    #[test]
    fn test_matches_is_logical_or() {
        let matcher = PatternMatcher::new();
        let predicates = matcher
            .compile_all(&patterns(&["https://a.com/*", "https://b.com/*"]))
            .unwrap();
        assert!(PatternMatcher::matches("https://a.com/x", &predicates));
        assert!(PatternMatcher::matches("https://b.com/y", &predicates));
        assert!(!PatternMatcher::matches("https://c.com/", &predicates));
        assert!(!PatternMatcher::matches("https://c.com/", &[]));
    }

    #[test]
    fn test_matches_normalizes_url() {
        let matcher = PatternMatcher::new();
        let predicates = matcher.compile_all(&patterns(&["https://example.com/"])).unwrap();
        assert!(PatternMatcher::matches("https://example.com", &predicates));
    }

    #[test]
    fn test_matches_agrees_with_predicate() {
        let matcher = PatternMatcher::new();
        let cases = [
            ("https://Example.com/*", "https://Example.com/a"),
            ("https://example.com:443/*", "https://example.com:443/a"),
            ("https://example.com:443/*", "https://example.com/a"),
            ("https://example.com/a b", "https://example.com/a b"),
            ("https://example.com/", "https://example.com"),
            ("https://a.com/*", "http://a.com/"),
        ];
        for (pattern, url) in cases {
            let predicate = matcher.compile(pattern).unwrap();
            let expected = predicate.test(url);
            assert_eq!(
                PatternMatcher::matches(url, std::slice::from_ref(&predicate)),
                expected,
                "{pattern} vs {url}"
            );
            let filter = matcher.filter(&patterns(&[pattern]), &[]).unwrap();
            assert_eq!(filter.test(url), expected, "{pattern} vs {url}");
        }
        let hit = matcher.compile("https://Example.com/*").unwrap();
        assert!(PatternMatcher::matches("https://Example.com/a", &[hit]));
    }

    #[test]
    fn test_exclude_sees_both_url_forms() {
        let matcher = PatternMatcher::new();
        let filter = matcher
            .filter(
                &patterns(&["https://a.com/*"]),
                &patterns(&["https://a.com/my docs/*"]),
            )
            .unwrap();
        assert!(!filter.test("https://a.com/my docs/x"));
        assert!(!filter.test("https://a.com/my%20docs/x"));
        assert!(filter.test("https://a.com/other"));
    }

    #[test]
    fn test_compile_all_reports_offending_pattern() {
        let matcher = PatternMatcher::new();
        let err = matcher
            .compile_all(&patterns(&["https://a.com/*", "moz-extension://x/*"]))
            .unwrap_err();
        assert!(matches!(err, PatternError::UnsupportedScheme { scheme, .. } if scheme == "moz-extension"));
    }

    #[test]
    fn test_filter_applies_excludes() {
        let matcher = PatternMatcher::new();
        let filter = matcher
            .filter(
                &patterns(&["https://a.com/*"]),
                &patterns(&["https://a.com/private/*"]),
            )
            .unwrap();
        assert!(filter.test("https://a.com/public"));
        assert!(!filter.test("https://a.com/private/x"));
        assert_eq!(filter.include().len(), 1);
        assert_eq!(filter.exclude().len(), 1);
    }

    #[test]
    fn test_bad_exclude_fails_filter() {
        let matcher = PatternMatcher::new();
        assert!(
            matcher
                .filter(&patterns(&["https://a.com/*"]), &patterns(&[""]))
                .is_err()
        );
    }
}
