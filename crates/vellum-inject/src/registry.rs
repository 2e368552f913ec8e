//! The registered-rule table.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, trace};

use vellum_core::{ExtensionId, Frame, ResourceRef, RuleId, RuleSpec, RunAt, ScriptRule, World};
use vellum_patterns::{PatternError, PatternMatcher, UrlFilter};

use crate::error::{RegistrationError, RegistrationResult};

/// A rule whose patterns failed to compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRule {
    /// The skipped rule.
    pub rule: RuleId,
    /// Why it was skipped.
    pub error: PatternError,
}

/// Outcome of registering one extension's rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationReport {
    /// The registered extension.
    pub extension: ExtensionId,
    /// Rules that are now active, in declaration order.
    pub accepted: Vec<RuleId>,
    /// Rules skipped because a pattern did not compile.
    pub rejected: Vec<RejectedRule>,
}

impl RegistrationReport {
    /// Whether every rule was accepted.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// A registered rule that applies to a navigation.
#[derive(Debug, Clone)]
pub struct MatchedRule {
    /// The rule.
    pub rule: Arc<ScriptRule>,
    epoch: u64,
}

impl MatchedRule {
    /// Registration generation the rule belongs to.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// One rule's share of an injection plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedInjection {
    /// Source rule.
    pub rule: RuleId,
    /// Phase it runs at.
    pub phase: RunAt,
    /// World its scripts run in.
    pub world: World,
    /// Stylesheets, applied before scripts.
    pub styles: Vec<ResourceRef>,
    /// Scripts, in declaration order.
    pub scripts: Vec<ResourceRef>,
}

/// What a navigation would inject, in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InjectionPlan {
    /// The planned URL.
    pub url: String,
    /// The planned frame.
    pub frame: Frame,
    /// Rules ordered by phase, then registration order.
    pub injections: Vec<PlannedInjection>,
}

impl InjectionPlan {
    /// Whether nothing would be injected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.injections.is_empty()
    }

    /// Entries for one phase.
    pub fn phase(&self, phase: RunAt) -> impl Iterator<Item = &PlannedInjection> {
        self.injections.iter().filter(move |i| i.phase == phase)
    }
}

struct CompiledRule {
    rule: Arc<ScriptRule>,
    filter: UrlFilter,
}

struct Registration {
    epoch: u64,
    rules: Vec<CompiledRule>,
}

/// Rules by extension, in registration order.
pub struct RuleRegistry {
    matcher: PatternMatcher,
    extensions: HashMap<ExtensionId, Registration>,
    order: Vec<ExtensionId>,
    next_epoch: u64,
}

impl RuleRegistry {
    /// Create an empty registry compiling patterns with `matcher`.
    #[must_use]
    pub fn new(matcher: PatternMatcher) -> Self {
        Self {
            matcher,
            extensions: HashMap::new(),
            order: Vec::new(),
            next_epoch: 0,
        }
    }

    /// Register (or replace) an extension's rules.
    ///
    /// Shapes are validated first and any invalid rule rejects the whole
    /// call. Pattern errors only skip the offending rule.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::BlankExtension`] or
    /// [`RegistrationError::InvalidRule`].
    pub fn register(
        &mut self,
        extension: ExtensionId,
        specs: Vec<RuleSpec>,
    ) -> RegistrationResult<RegistrationReport> {
        if extension.is_blank() {
            return Err(RegistrationError::BlankExtension);
        }

        let rules = specs
            .into_iter()
            .enumerate()
            .map(|(index, spec)| spec.validate(RuleId::new(extension.clone(), index)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut accepted = Vec::with_capacity(rules.len());
        let mut rejected = Vec::new();
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            match self.matcher.filter(rule.matches(), rule.exclude_matches()) {
                Ok(filter) => {
                    accepted.push(rule.id().clone());
                    compiled.push(CompiledRule {
                        rule: Arc::new(rule),
                        filter,
                    });
                },
                Err(error) => rejected.push(RejectedRule {
                    rule: rule.id().clone(),
                    error,
                }),
            }
        }

        let epoch = self.next_epoch;
        self.next_epoch = self.next_epoch.wrapping_add(1);

        // Re-registration counts as a fresh registration for ordering.
        self.order.retain(|e| e != &extension);
        self.order.push(extension.clone());
        self.extensions.insert(
            extension.clone(),
            Registration {
                epoch,
                rules: compiled,
            },
        );

        debug!(
            extension_id = %extension,
            epoch,
            accepted = accepted.len(),
            rejected = rejected.len(),
            "Rules registered"
        );

        Ok(RegistrationReport {
            extension,
            accepted,
            rejected,
        })
    }

    /// Drop every rule of an extension. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::NotRegistered`] for an unknown extension.
    pub fn unregister(&mut self, extension: &ExtensionId) -> RegistrationResult<usize> {
        let removed = self
            .extensions
            .remove(extension)
            .ok_or_else(|| RegistrationError::NotRegistered {
                extension: extension.clone(),
            })?;
        self.order.retain(|e| e != extension);
        Ok(removed.rules.len())
    }

    /// Whether an extension is registered.
    #[must_use]
    pub fn is_registered(&self, extension: &ExtensionId) -> bool {
        self.extensions.contains_key(extension)
    }

    /// Whether `epoch` is still the live registration of `extension`.
    #[must_use]
    pub fn is_current(&self, extension: &ExtensionId, epoch: u64) -> bool {
        self.extensions
            .get(extension)
            .is_some_and(|r| r.epoch == epoch)
    }

    /// Registered extensions in registration order.
    #[must_use]
    pub fn extensions(&self) -> &[ExtensionId] {
        &self.order
    }

    /// Number of active rules across all extensions.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.extensions.values().map(|r| r.rules.len()).sum()
    }

    /// Rules that apply to `url` in `frame`, in registration order.
    #[must_use]
    pub fn matching(&self, url: &str, frame: &Frame) -> Vec<MatchedRule> {
        let mut matched = Vec::new();
        for extension in &self.order {
            let Some(registration) = self.extensions.get(extension) else {
                continue;
            };
            for compiled in &registration.rules {
                let Some(target) = target_url(&compiled.rule, url, frame) else {
                    continue;
                };
                if compiled.filter.test(target) {
                    trace!(rule = %compiled.rule.id(), url, "Rule matched");
                    matched.push(MatchedRule {
                        rule: Arc::clone(&compiled.rule),
                        epoch: registration.epoch,
                    });
                }
            }
        }
        matched
    }

    /// Dry run of what a navigation to `url` would inject.
    #[must_use]
    pub fn plan(&self, url: &str, frame: &Frame) -> InjectionPlan {
        let injections = partition(self.matching(url, frame))
            .into_iter()
            .flat_map(|(phase, rules)| {
                rules.into_iter().map(move |m| PlannedInjection {
                    rule: m.rule.id().clone(),
                    phase,
                    world: m.rule.world(),
                    styles: m.rule.styles().to_vec(),
                    scripts: m.rule.scripts().to_vec(),
                })
            })
            .collect();
        InjectionPlan {
            url: url.to_string(),
            frame: frame.clone(),
            injections,
        }
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new(PatternMatcher::new())
    }
}

impl std::fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("extensions", &self.order)
            .field("rules", &self.rule_count())
            .finish_non_exhaustive()
    }
}

/// Group matched rules by phase, keeping registration order inside each.
#[must_use]
pub fn partition(matched: Vec<MatchedRule>) -> BTreeMap<RunAt, Vec<MatchedRule>> {
    let mut phases: BTreeMap<RunAt, Vec<MatchedRule>> = BTreeMap::new();
    for m in matched {
        phases.entry(m.rule.phase()).or_default().push(m);
    }
    phases
}

/// The URL a rule is tested against, or `None` if the frame is out of reach.
fn target_url<'a>(rule: &ScriptRule, url: &'a str, frame: &'a Frame) -> Option<&'a str> {
    if !frame.is_top() && !rule.all_frames() {
        return None;
    }
    if is_about_document(url) {
        // about:blank and about:srcdoc inherit their parent's origin.
        return if rule.match_about_blank() {
            frame.parent_url()
        } else {
            None
        };
    }
    Some(url)
}

fn is_about_document(url: &str) -> bool {
    let base = url.split(['?', '#']).next().unwrap_or(url);
    base.eq_ignore_ascii_case("about:blank") || base.eq_ignore_ascii_case("about:srcdoc")
}
