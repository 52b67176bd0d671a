//! Tree rewriter: applies resolved details to the nodes the scanner matched.
//!
//! Rewrites are keyed by identity, never by lookup completion order, and run in
//! descending index-path order so that splicing a text node into several
//! siblings cannot invalidate a path that is still pending.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use linkenrich_shared::{Identity, IssueDetail, ResolvedDetail};

use crate::node::{TreeNode, node_at_mut, splice_at};
use crate::scanner::{MatchKind, MentionSpan, ScanResult};

/// Base class for decorated issue links.
pub const ISSUE_LINK_CLASS: &str = "github-issue-link";

/// Class for links produced from mentions.
pub const USER_LINK_CLASS: &str = "github-user-link";

/// Resolved details available to one rewrite pass.
pub type Resolutions = HashMap<Identity, ResolvedDetail>;

// ---------------------------------------------------------------------------
// Warning suppressions
// ---------------------------------------------------------------------------

/// Labels whose downstream "unresolved citation" warning should be dropped.
///
/// Each demoted citation adds one suppression; each [`take`](Self::take)
/// consumes one, so a label is never silenced more often than it was demoted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarningSuppressions {
    counts: BTreeMap<String, usize>,
}

impl WarningSuppressions {
    pub fn suppress(&mut self, label: &str) {
        *self.counts.entry(label.to_string()).or_default() += 1;
    }

    /// Consume one suppression for `label`. Returns `true` if the warning
    /// should be dropped.
    pub fn take(&mut self, label: &str) -> bool {
        let Some(count) = self.counts.get_mut(label) else {
            return false;
        };
        *count -= 1;
        if *count == 0 {
            self.counts.remove(label);
        }
        true
    }

    pub fn pending(&self, label: &str) -> usize {
        self.counts.get(label).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.counts.keys().map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Link decoration
// ---------------------------------------------------------------------------

/// Merge issue-state classes into `existing`.
///
/// Unrelated classes keep their order; managed `github-issue-link*` classes
/// are recomputed, so repeated application is stable.
pub fn issue_classes(existing: Option<&str>, detail: &IssueDetail) -> String {
    let modifier_prefix = format!("{ISSUE_LINK_CLASS}--");
    let mut classes: Vec<String> = existing
        .unwrap_or("")
        .split_whitespace()
        .filter(|c| *c != ISSUE_LINK_CLASS && !c.starts_with(&modifier_prefix))
        .map(str::to_string)
        .collect();

    classes.push(ISSUE_LINK_CLASS.to_string());
    classes.push(format!("{modifier_prefix}{}", class_token(detail.state.as_str())));
    if let Some(reason) = &detail.state_reason {
        let reason = class_token(reason);
        if reason != class_token(detail.state.as_str()) {
            classes.push(format!("{modifier_prefix}{reason}"));
        }
    }
    classes.join(" ")
}

/// Synthesized title, e.g. `Add retries (OPEN)`.
pub fn issue_title(detail: &IssueDetail) -> String {
    format!(
        "{} ({})",
        detail.title,
        detail.state.as_str().to_ascii_uppercase()
    )
}

fn class_token(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

fn decorate_issue_link<N: TreeNode>(node: &mut N, detail: &IssueDetail) {
    let classes = issue_classes(node.classes(), detail);
    node.set_classes(classes);
    let has_title = node.title().is_some_and(|t| !t.trim().is_empty());
    if !has_title {
        node.set_title(issue_title(detail));
    }
}

// ---------------------------------------------------------------------------
// Text splitting
// ---------------------------------------------------------------------------

/// Split `text` around resolved mention spans.
///
/// Every byte outside a resolved span is preserved; each resolved span becomes
/// a link whose visible text is exactly the original matched text. Returns
/// `None` when no span resolved, meaning the node stays as it is.
pub fn rebuild<N: TreeNode>(
    text: &str,
    spans: &[MentionSpan],
    resolved: &Resolutions,
) -> Option<Vec<N>> {
    let mut out = Vec::new();
    let mut cursor = 0;
    let mut linked = false;

    for span in spans {
        let Some(profile) = resolved.get(&span.identity).and_then(ResolvedDetail::as_user) else {
            continue;
        };
        let (Some(before), Some(matched)) =
            (text.get(cursor..span.start), text.get(span.start..span.end))
        else {
            continue;
        };
        if !before.is_empty() {
            out.push(N::new_text(before.to_string()));
        }
        out.push(N::new_link(
            profile.profile_url.clone(),
            USER_LINK_CLASS.to_string(),
            matched.to_string(),
        ));
        cursor = span.end;
        linked = true;
    }

    if !linked {
        return None;
    }
    if let Some(rest) = text.get(cursor..) {
        if !rest.is_empty() {
            out.push(N::new_text(rest.to_string()));
        }
    }
    Some(out)
}

// ---------------------------------------------------------------------------
// Apply
// ---------------------------------------------------------------------------

/// What one rewrite pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteReport {
    pub links_decorated: usize,
    pub mentions_linked: usize,
    pub citations_linked: usize,
    pub citations_demoted: usize,
    /// Hand-off to whatever emits "unresolved citation" warnings after the
    /// pass; it should [`take`](WarningSuppressions::take) one per warning.
    pub suppressions: WarningSuppressions,
}

/// Apply `resolved` to every match in `scan`, mutating `root` in place.
///
/// References without a resolution are left exactly as they were, except
/// citation nodes, which are demoted to their original `@label` text.
pub fn apply<N: TreeNode>(root: &mut N, scan: ScanResult, resolved: &Resolutions) -> RewriteReport {
    let mut report = RewriteReport::default();
    let mut matches = scan.matches;
    matches.sort_by(|a, b| b.path.cmp(&a.path));

    for m in matches {
        match m.kind {
            MatchKind::IssueLink(identity) => {
                let Some(detail) = resolved.get(&identity).and_then(ResolvedDetail::as_issue)
                else {
                    continue;
                };
                if let Some(node) = node_at_mut(root, &m.path) {
                    decorate_issue_link(node, detail);
                    report.links_decorated += 1;
                }
            }
            MatchKind::Mentions(spans) => {
                let Some(text) = node_at_mut(root, &m.path)
                    .and_then(|n| n.text_value().map(str::to_string))
                else {
                    continue;
                };
                let Some(replacement) = rebuild::<N>(&text, &spans, resolved) else {
                    continue;
                };
                let linked = spans
                    .iter()
                    .filter(|s| resolved.get(&s.identity).and_then(ResolvedDetail::as_user).is_some())
                    .count();
                if splice_at(root, &m.path, replacement) {
                    report.mentions_linked += linked;
                }
            }
            MatchKind::Citation { label, identity } => {
                let profile = resolved.get(&identity).and_then(ResolvedDetail::as_user);
                let replacement = match profile {
                    Some(profile) => N::new_link(
                        profile.profile_url.clone(),
                        USER_LINK_CLASS.to_string(),
                        format!("@{label}"),
                    ),
                    None => N::new_text(format!("@{label}")),
                };
                if splice_at(root, &m.path, vec![replacement]) {
                    if profile.is_some() {
                        report.citations_linked += 1;
                    } else {
                        report.citations_demoted += 1;
                        report.suppressions.suppress(&label);
                    }
                }
            }
            MatchKind::InvalidCitation { label } => {
                if splice_at(root, &m.path, vec![N::new_text(format!("@{label}"))]) {
                    report.citations_demoted += 1;
                    report.suppressions.suppress(&label);
                }
            }
        }
    }

    debug!(
        links = report.links_decorated,
        mentions = report.mentions_linked,
        citations_linked = report.citations_linked,
        citations_demoted = report.citations_demoted,
        "rewrite complete"
    );
    report
}
