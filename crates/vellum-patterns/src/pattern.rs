//! Compilation of a single match pattern.

use regex::Regex;
use url::Url;

use crate::error::{PatternError, PatternResult};

/// The literal pattern matching every web and file URL.
pub const ALL_URLS: &str = "<all_urls>";

/// Schemes accepted by `<all_urls>`.
const ALL_URLS_SCHEMES: [&str; 4] = ["http", "https", "ftp", "file"];

/// Schemes a pattern may name explicitly.
const PATTERN_SCHEMES: [&str; 7] = ["*", "http", "https", "ftp", "file", "ws", "wss"];

/// What a leading `*://` expands to.
const SCHEME_WILDCARD_EXPANSION: &str = "(https?|ftp)://";

/// A compiled match pattern.
#[derive(Debug, Clone)]
pub struct Predicate {
    source: String,
    kind: PredicateKind,
}

#[derive(Debug, Clone)]
enum PredicateKind {
    AllUrls,
    Glob(Regex),
}

impl Predicate {
    /// Compile a pattern.
    ///
    /// # Errors
    ///
    /// Returns a [`PatternError`] if the pattern is empty, has no scheme,
    /// names an unsupported scheme, or cannot be turned into a regex.
    pub fn compile(pattern: &str) -> PatternResult<Self> {
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }

        if pattern == ALL_URLS {
            return Ok(Self {
                source: pattern.to_owned(),
                kind: PredicateKind::AllUrls,
            });
        }

        let Some((scheme, rest)) = pattern.split_once("://") else {
            return Err(PatternError::MissingScheme {
                pattern: pattern.to_owned(),
            });
        };

        let scheme = scheme.to_ascii_lowercase();
        if !PATTERN_SCHEMES.contains(&scheme.as_str()) {
            return Err(PatternError::UnsupportedScheme {
                pattern: pattern.to_owned(),
                scheme,
            });
        }

        let head = if scheme == "*" {
            SCHEME_WILDCARD_EXPANSION.to_owned()
        } else {
            format!("{}://", regex::escape(&scheme))
        };
        let rest = canonical_authority(&scheme, rest);
        let expression = format!("^{head}{}$", glob_to_regex(&rest));

        let regex = Regex::new(&expression).map_err(|e| PatternError::Compile {
            pattern: pattern.to_owned(),
            message: e.to_string(),
        })?;

        Ok(Self {
            source: pattern.to_owned(),
            kind: PredicateKind::Glob(regex),
        })
    }

    /// The pattern this predicate was compiled from.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether this is the `<all_urls>` predicate.
    #[must_use]
    pub fn is_all_urls(&self) -> bool {
        matches!(self.kind, PredicateKind::AllUrls)
    }

    /// Test a URL against the pattern. Pure and deterministic.
    ///
    /// The URL matches if either its raw text or its [`normalize_url`] form
    /// matches, so callers that normalize first get the same answer.
    #[must_use]
    pub fn test(&self, url: &str) -> bool {
        self.test_forms(url, &normalize_url(url))
    }

    /// [`Predicate::test`] with the normalized form already computed.
    pub(crate) fn test_forms(&self, raw: &str, normalized: &str) -> bool {
        match &self.kind {
            PredicateKind::AllUrls => Url::parse(raw)
                .map(|u| ALL_URLS_SCHEMES.contains(&u.scheme()))
                .unwrap_or(false),
            PredicateKind::Glob(regex) => regex.is_match(raw) || regex.is_match(normalized),
        }
    }
}

/// Default port of a scheme, as dropped by URL serialization.
fn default_port(scheme: &str) -> Option<&'static str> {
    match scheme {
        "http" | "ws" => Some("80"),
        "https" | "wss" => Some("443"),
        "ftp" => Some("21"),
        _ => None,
    }
}

/// Lowercase the host of `rest` and drop an explicit default port.
fn canonical_authority(scheme: &str, rest: &str) -> String {
    let (authority, path) = rest.find('/').map_or((rest, ""), |i| rest.split_at(i));
    let mut host = authority.to_ascii_lowercase();
    if let Some(port) = default_port(scheme) {
        let suffix = format!(":{port}");
        if host.ends_with(&suffix) {
            host.truncate(host.len().saturating_sub(suffix.len()));
        }
    }
    format!("{host}{path}")
}

/// Escape a glob for use in a regex, mapping `*` to `.*` and `?` to `.`.
fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len().saturating_mul(2));
    let mut literal = String::new();

    for c in glob.chars() {
        match c {
            '*' | '?' => {
                out.push_str(&regex::escape(&literal));
                literal.clear();
                out.push_str(if c == '*' { ".*" } else { "." });
            },
            _ => literal.push(c),
        }
    }
    out.push_str(&regex::escape(&literal));
    out
}

/// Canonical form of a URL for matching.
///
/// URLs that parse are serialized by the `url` crate (so
/// `https://example.com` becomes `https://example.com/`); anything else is
/// matched verbatim.
#[must_use]
pub fn normalize_url(url: &str) -> String {
    Url::parse(url).map_or_else(|_| url.to_owned(), |u| u.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_urls_accepts_web_and_file_schemes() {
        let p = Predicate::compile(ALL_URLS).unwrap();
        assert!(p.is_all_urls());
        assert!(p.test("https://a.com/"));
        assert!(p.test("http://a.com/"));
        assert!(p.test("ftp://a.com/"));
        assert!(p.test("file:///x"));
    }

    #[test]
    fn test_all_urls_rejects_internal_schemes() {
        let p = Predicate::compile(ALL_URLS).unwrap();
        assert!(!p.test("chrome-extension://abc/"));
        assert!(!p.test("about:blank"));
        assert!(!p.test("not a url"));
    }

    #[test]
    fn test_scheme_wildcard_expands_to_web_schemes() {
        let p = Predicate::compile("*://a.com/*").unwrap();
        assert!(p.test("https://a.com/x"));
        assert!(p.test("http://a.com/"));
        assert!(p.test("ftp://a.com/file"));
        assert!(!p.test("file://a.com/"));
        assert!(!p.test("wss://a.com/"));
    }

    #[test]
    fn test_subdomain_wildcard_is_a_literal_glob() {
        let p = Predicate::compile("*://*.example.com/*").unwrap();
        assert!(p.test("https://sub.example.com/path"));
        assert!(p.test("https://a.b.example.com/"));
        assert!(!p.test("http://example.com/"));
    }

    #[test]
    fn test_question_mark_matches_one_character() {
        let p = Predicate::compile("https://a.com/page?").unwrap();
        assert!(p.test("https://a.com/page1"));
        assert!(!p.test("https://a.com/page"));
        assert!(!p.test("https://a.com/page12"));
    }

    #[test]
    fn test_metacharacters_are_escaped() {
        let p = Predicate::compile("https://a.com/(x)+[y]/*").unwrap();
        assert!(p.test("https://a.com/(x)+[y]/z"));
        assert!(!p.test("https://a.com/xx[y]/z"));

        let dots = Predicate::compile("https://a.com/").unwrap();
        assert!(!dots.test("https://aXcom/"));
    }

    #[test]
    fn test_match_is_anchored() {
        let p = Predicate::compile("https://a.com/").unwrap();
        assert!(p.test("https://a.com/"));
        assert!(!p.test("https://a.com/more"));
        assert!(!p.test("xhttps://a.com/"));
    }

    #[test]
    fn test_explicit_scheme_is_literal() {
        let p = Predicate::compile("https://a.com/*").unwrap();
        assert!(!p.test("http://a.com/"));
    }

    #[test]
    fn test_malformed_patterns() {
        assert_eq!(Predicate::compile("").unwrap_err(), PatternError::Empty);
        assert!(matches!(
            Predicate::compile("example.com/*"),
            Err(PatternError::MissingScheme { .. })
        ));
        assert!(matches!(
            Predicate::compile("chrome-extension://abc/*"),
            Err(PatternError::UnsupportedScheme { .. })
        ));
        assert!(matches!(
            Predicate::compile("ht*p://a.com/"),
            Err(PatternError::UnsupportedScheme { .. })
        ));
    }

    #[test]
    fn test_recompiled_predicates_agree() {
        let sample = [
            "https://a.com/",
            "http://sub.a.com/x?y=1",
            "ftp://a.com/file",
            "file:///etc/hosts",
            "chrome-extension://abc/",
            "https://b.org/a.com/",
        ];
        for pattern in [ALL_URLS, "*://*.a.com/*", "https://a.com/*", "file:///*"] {
            let first = Predicate::compile(pattern).unwrap();
            let second = Predicate::compile(pattern).unwrap();
            for url in sample {
                assert_eq!(first.test(url), second.test(url), "{pattern} vs {url}");
                assert_eq!(first.test(url), first.test(url));
            }
        }
    }

    #[test]
    fn test_host_case_is_ignored() {
        let p = Predicate::compile("https://Example.com/*").unwrap();
        assert!(p.test("https://Example.com/a"));
        assert!(p.test("https://example.com/a"));
        assert!(p.test(&normalize_url("https://Example.com/a")));

        let path = Predicate::compile("https://a.com/Docs/*").unwrap();
        assert!(!path.test("https://a.com/docs/x"));
    }

    #[test]
    fn test_scheme_case_is_ignored() {
        let p = Predicate::compile("HTTPS://a.com/*").unwrap();
        assert!(p.test("https://a.com/x"));
        assert!(p.test("HTTPS://a.com/x"));
    }

    #[test]
    fn test_explicit_default_port() {
        let p = Predicate::compile("https://example.com:443/*").unwrap();
        assert!(p.test("https://example.com/a"));
        assert!(p.test("https://example.com:443/a"));
        assert!(p.test(&normalize_url("https://example.com:443/a")));

        let plain = Predicate::compile("https://example.com/*").unwrap();
        assert!(plain.test("https://example.com:443/a"));

        let other = Predicate::compile("https://example.com:8443/*").unwrap();
        assert!(other.test("https://example.com:8443/a"));
        assert!(!other.test("https://example.com/a"));
    }

    #[test]
    fn test_unencoded_path_matches_both_forms() {
        let p = Predicate::compile("https://example.com/a b").unwrap();
        assert!(p.test("https://example.com/a b"));
        assert!(p.test("https://example.com/a%20b"));

        let encoded = Predicate::compile("https://example.com/a%20b").unwrap();
        assert!(encoded.test("https://example.com/a b"));
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("https://example.com"), "https://example.com/");
        assert_eq!(normalize_url("HTTPS://Example.com/a"), "https://example.com/a");
        assert_eq!(normalize_url("garbage"), "garbage");
    }
}
