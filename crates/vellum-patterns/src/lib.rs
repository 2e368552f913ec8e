//! Vellum Patterns - Match-pattern compilation and URL matching.
//!
//! This crate provides:
//! - [`Predicate`]: one compiled match pattern
//! - [`PatternMatcher`]: a compiler with a per-source-string cache
//! - [`UrlFilter`]: include/exclude predicate sets for one rule
//!
//! # Pattern semantics
//!
//! - `<all_urls>` accepts `http`, `https`, `ftp` and `file` URLs only.
//! - A leading `*://` expands to `(https?|ftp)://`.
//! - Everything else is a literal glob: regex metacharacters are escaped,
//!   `*` becomes `.*`, `?` becomes `.`, and the result is anchored.
//!
//! Subdomain wildcards get no special treatment, so `*://*.example.com/*`
//! does not match `http://example.com/`.
//!
//! # Example
//!
//! ```
//! use vellum_patterns::PatternMatcher;
//!
//! let matcher = PatternMatcher::new();
//! let predicates = matcher.compile_all(&["*://*.example.com/*".to_string()]).unwrap();
//!
//! assert!(PatternMatcher::matches("https://sub.example.com/path", &predicates));
//! assert!(!PatternMatcher::matches("http://example.com/", &predicates));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod matcher;
mod pattern;

pub use error::{PatternError, PatternResult};
pub use matcher::{DEFAULT_CACHE_CAPACITY, PatternMatcher, UrlFilter};
pub use pattern::{ALL_URLS, Predicate, normalize_url};
