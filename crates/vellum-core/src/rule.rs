//! Declarative content-script rules.
//!
//! [`RuleSpec`] is the wire schema the host shell hands to the engine
//! (the `content_scripts` entries of an extension manifest). Validating a
//! spec produces an immutable [`ScriptRule`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::document::ReadyState;
use crate::error::RuleValidationError;
use crate::ids::{ExtensionId, ResourceRef, RuleId};

/// The document-construction milestone a rule is injected at.
///
/// Variants are ordered: `DocumentStart < DocumentEnd < DocumentIdle`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RunAt {
    /// Before any DOM exists.
    DocumentStart,
    /// DOM parsed, subresources still loading.
    DocumentEnd,
    /// Load complete.
    #[default]
    DocumentIdle,
}

impl RunAt {
    /// All phases in firing order.
    pub const ALL: [RunAt; 3] = [Self::DocumentStart, Self::DocumentEnd, Self::DocumentIdle];

    /// Wire name of the phase.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DocumentStart => "document_start",
            Self::DocumentEnd => "document_end",
            Self::DocumentIdle => "document_idle",
        }
    }

    /// Whether a document in `state` has already reached this phase.
    #[must_use]
    pub fn is_reached_by(self, state: ReadyState) -> bool {
        self <= state.reached_phase()
    }
}

impl fmt::Display for RunAt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The execution context injected code runs in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum World {
    /// Separate scope with only the capability API and `window`/`document`.
    #[default]
    Isolated,
    /// The page's own global scope.
    Main,
}

impl fmt::Display for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Isolated => f.write_str("ISOLATED"),
            Self::Main => f.write_str("MAIN"),
        }
    }
}

/// Serialized form of a content-script rule as declared by an extension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Match patterns; the rule applies when any of them matches.
    pub matches: Vec<String>,
    /// Patterns that veto a match.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_matches: Vec<String>,
    /// Script resources, executed in order.
    #[serde(default)]
    pub js: Vec<String>,
    /// Stylesheet resources, appended before the scripts.
    #[serde(default)]
    pub css: Vec<String>,
    /// Injection phase.
    #[serde(default)]
    pub run_at: RunAt,
    /// Inject into child frames as well as the top frame.
    #[serde(default)]
    pub all_frames: bool,
    /// Test `about:blank` frames against their parent's URL.
    #[serde(default)]
    pub match_about_blank: bool,
    /// Execution world.
    #[serde(default)]
    pub world: World,
}

impl RuleSpec {
    /// Create a spec with the given match patterns and all other fields defaulted.
    #[must_use]
    pub fn new<I, S>(matches: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            matches: matches.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Set the script resources.
    #[must_use]
    pub fn with_js<I, S>(mut self, js: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.js = js.into_iter().map(Into::into).collect();
        self
    }

    /// Set the stylesheet resources.
    #[must_use]
    pub fn with_css<I, S>(mut self, css: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.css = css.into_iter().map(Into::into).collect();
        self
    }

    /// Set the exclude patterns.
    #[must_use]
    pub fn with_exclude_matches<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_matches = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Set the injection phase.
    #[must_use]
    pub fn with_run_at(mut self, run_at: RunAt) -> Self {
        self.run_at = run_at;
        self
    }

    /// Set the execution world.
    #[must_use]
    pub fn with_world(mut self, world: World) -> Self {
        self.world = world;
        self
    }

    /// Inject into child frames too.
    #[must_use]
    pub fn in_all_frames(mut self) -> Self {
        self.all_frames = true;
        self
    }

    /// Match `about:blank` frames against their parent's URL.
    #[must_use]
    pub fn matching_about_blank(mut self) -> Self {
        self.match_about_blank = true;
        self
    }

    /// Check the rule's shape and freeze it.
    ///
    /// Only structural problems are reported here. Match patterns are
    /// compiled separately so a bad pattern only disables its own rule.
    ///
    /// # Errors
    ///
    /// Returns a [`RuleValidationError`] if the rule has no match patterns,
    /// no resources, or an empty resource reference.
    pub fn validate(self, id: RuleId) -> Result<ScriptRule, RuleValidationError> {
        if self.matches.is_empty() {
            return Err(RuleValidationError::EmptyMatches { rule: id });
        }
        if self.js.is_empty() && self.css.is_empty() {
            return Err(RuleValidationError::NoResources { rule: id });
        }
        if self.js.iter().chain(&self.css).any(|r| r.trim().is_empty()) {
            return Err(RuleValidationError::EmptyResource { rule: id });
        }

        Ok(ScriptRule {
            id,
            matches: self.matches,
            exclude_matches: self.exclude_matches,
            scripts: self.js.into_iter().map(ResourceRef::new).collect(),
            styles: self.css.into_iter().map(ResourceRef::new).collect(),
            phase: self.run_at,
            all_frames: self.all_frames,
            match_about_blank: self.match_about_blank,
            world: self.world,
        })
    }
}

/// A validated, immutable content-script rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptRule {
    id: RuleId,
    matches: Vec<String>,
    exclude_matches: Vec<String>,
    scripts: Vec<ResourceRef>,
    styles: Vec<ResourceRef>,
    phase: RunAt,
    all_frames: bool,
    match_about_blank: bool,
    world: World,
}

impl ScriptRule {
    /// Rule identity.
    #[must_use]
    pub fn id(&self) -> &RuleId {
        &self.id
    }

    /// Owning extension.
    #[must_use]
    pub fn extension(&self) -> &ExtensionId {
        &self.id.extension
    }

    /// Match patterns.
    #[must_use]
    pub fn matches(&self) -> &[String] {
        &self.matches
    }

    /// Exclude patterns.
    #[must_use]
    pub fn exclude_matches(&self) -> &[String] {
        &self.exclude_matches
    }

    /// Script resources.
    #[must_use]
    pub fn scripts(&self) -> &[ResourceRef] {
        &self.scripts
    }

    /// Stylesheet resources.
    #[must_use]
    pub fn styles(&self) -> &[ResourceRef] {
        &self.styles
    }

    /// Injection phase.
    #[must_use]
    pub fn phase(&self) -> RunAt {
        self.phase
    }

    /// Whether child frames are injected.
    #[must_use]
    pub fn all_frames(&self) -> bool {
        self.all_frames
    }

    /// Whether `about:blank` frames inherit their parent's URL for matching.
    #[must_use]
    pub fn match_about_blank(&self) -> bool {
        self.match_about_blank
    }

    /// Execution world.
    #[must_use]
    pub fn world(&self) -> World {
        self.world
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule_id() -> RuleId {
        RuleId::new(ExtensionId::new("ext1"), 0)
    }

    #[test]
    fn test_defaults_follow_wire_schema() {
        let spec: RuleSpec =
            serde_json::from_str(r#"{"matches": ["<all_urls>"], "js": ["a.js"]}"#).unwrap();
        assert_eq!(spec.run_at, RunAt::DocumentIdle);
        assert_eq!(spec.world, World::Isolated);
        assert!(!spec.all_frames);
        assert!(!spec.match_about_blank);
    }

    #[test]
    fn test_wire_names() {
        let spec: RuleSpec = serde_json::from_str(
            r#"{"matches": ["*://*/*"], "css": ["a.css"], "run_at": "document_start", "world": "MAIN"}"#,
        )
        .unwrap();
        assert_eq!(spec.run_at, RunAt::DocumentStart);
        assert_eq!(spec.world, World::Main);
    }

    #[test]
    fn test_unknown_run_at_is_rejected() {
        let result: Result<RuleSpec, _> =
            serde_json::from_str(r#"{"matches": ["*://*/*"], "run_at": "document_whenever"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_phase_ordering() {
        assert!(RunAt::DocumentStart < RunAt::DocumentEnd);
        assert!(RunAt::DocumentEnd < RunAt::DocumentIdle);
        assert_eq!(RunAt::ALL[0], RunAt::DocumentStart);
    }

    #[test]
    fn test_phase_reached_by_ready_state() {
        assert!(RunAt::DocumentStart.is_reached_by(ReadyState::Loading));
        assert!(!RunAt::DocumentEnd.is_reached_by(ReadyState::Loading));
        assert!(RunAt::DocumentEnd.is_reached_by(ReadyState::Interactive));
        assert!(RunAt::DocumentIdle.is_reached_by(ReadyState::Complete));
    }

    #[test]
    fn test_validate_rejects_empty_matches() {
        let err = RuleSpec::default().with_js(["a.js"]).validate(rule_id());
        assert_eq!(
            err,
            Err(RuleValidationError::EmptyMatches { rule: rule_id() })
        );
    }

    #[test]
    fn test_validate_rejects_rule_without_resources() {
        let err = RuleSpec::new(["<all_urls>"]).validate(rule_id());
        assert!(matches!(err, Err(RuleValidationError::NoResources { .. })));
    }

    #[test]
    fn test_validate_rejects_blank_resource() {
        let err = RuleSpec::new(["<all_urls>"])
            .with_js(["a.js", " "])
            .validate(rule_id());
        assert!(matches!(err, Err(RuleValidationError::EmptyResource { .. })));
    }

    #[test]
    fn test_validate_keeps_fields() {
        let rule = RuleSpec::new(["https://a.com/*"])
            .with_js(["a.js"])
            .with_css(["a.css"])
            .with_exclude_matches(["https://a.com/private/*"])
            .with_world(World::Main)
            .in_all_frames()
            .validate(rule_id())
            .unwrap();

        assert_eq!(rule.extension().as_str(), "ext1");
        assert_eq!(rule.scripts(), &[ResourceRef::new("a.js")]);
        assert_eq!(rule.styles(), &[ResourceRef::new("a.css")]);
        assert_eq!(rule.exclude_matches().len(), 1);
        assert_eq!(rule.world(), World::Main);
        assert!(rule.all_frames());
        assert!(!rule.match_about_blank());
    }
}
