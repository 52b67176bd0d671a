//! Reference scanner: finds issue links, `@handle` mentions, and citation-shaped
//! mentions in a document tree.
//!
//! Detection is pure. [`scan_mentions`] works on a single string, and
//! [`Scanner::scan`] walks a tree and records index paths so the rewriter can
//! mutate in place without scanning again.

use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use linkenrich_shared::{Identity, LinkEnrichError, Result};

use crate::node::TreeNode;

/// Longest GitHub login.
pub const MAX_HANDLE_LEN: usize = 39;

/// Node types whose descendants are never scanned for mentions.
const LITERAL_CONTEXTS: &[&str] = &[
    "inlineCode",
    "code",
    "link",
    "linkReference",
    "crossReference",
    "cite",
    "html",
    "math",
    "inlineMath",
];

/// `@handle` with a boundary before the `@`; group 1 is the mention, group 2 the handle.
static MENTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^A-Za-z0-9_@/.`])(@([A-Za-z0-9](?:-?[A-Za-z0-9])*))").expect("valid regex")
});

static HANDLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9](?:-?[A-Za-z0-9])*$").expect("valid regex")
});

/// Whether `handle` satisfies GitHub's login grammar: alphanumerics and single
/// internal hyphens, 1–39 characters.
pub fn is_valid_handle(handle: &str) -> bool {
    handle.len() <= MAX_HANDLE_LEN && HANDLE_RE.is_match(handle)
}

// ---------------------------------------------------------------------------
// Match records
// ---------------------------------------------------------------------------

/// One `@handle` occurrence inside a text value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionSpan {
    /// Byte offset of the `@`.
    pub start: usize,
    /// Byte offset one past the last handle character.
    pub end: usize,
    pub identity: Identity,
}

/// What the scanner found at one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchKind {
    /// A link whose target is an issue or pull request page.
    IssueLink(Identity),
    /// A text node containing one or more mentions, in source order.
    Mentions(Vec<MentionSpan>),
    /// A citation node the parser produced from `@label` that names a handle.
    Citation { label: String, identity: Identity },
    /// A citation node whose label cannot be a handle; demoted without lookup.
    InvalidCitation { label: String },
}

/// A match bound to the node at `path` (child indices from the root).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub path: Vec<usize>,
    pub kind: MatchKind,
}

/// Everything one scan found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    pub matches: Vec<Match>,
}

impl ScanResult {
    /// Distinct identities referenced by the document, in stable order.
    pub fn identities(&self) -> BTreeSet<Identity> {
        let mut out = BTreeSet::new();
        for m in &self.matches {
            match &m.kind {
                MatchKind::IssueLink(identity) | MatchKind::Citation { identity, .. } => {
                    out.insert(identity.clone());
                }
                MatchKind::Mentions(spans) => {
                    out.extend(spans.iter().map(|s| s.identity.clone()));
                }
                MatchKind::InvalidCitation { .. } => {}
            }
        }
        out
    }

    /// Total reference occurrences (before dedup).
    pub fn occurrences(&self) -> usize {
        self.matches
            .iter()
            .map(|m| match &m.kind {
                MatchKind::Mentions(spans) => spans.len(),
                MatchKind::InvalidCitation { .. } => 0,
                _ => 1,
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Pure text scanning
// ---------------------------------------------------------------------------

/// Find every `@handle` in `text`, left to right, non-overlapping.
///
/// A handle that is only the prefix of a longer token (`@smith_2020`) is not
/// a mention.
pub fn scan_mentions(text: &str) -> Vec<MentionSpan> {
    MENTION_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let mention = caps.get(1)?;
            let handle = caps.get(2)?.as_str();
            if handle.len() > MAX_HANDLE_LEN || continues_token(&text[mention.end()..]) {
                return None;
            }
            Some(MentionSpan {
                start: mention.start(),
                end: mention.end(),
                identity: Identity::user(handle),
            })
        })
        .collect()
}

/// Whether `rest` (the text right after a handle) extends the handle's token.
fn continues_token(rest: &str) -> bool {
    let mut chars = rest.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() || c == '_' => true,
        Some('-') => chars.next().is_some_and(|c| c.is_ascii_alphanumeric()),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

/// Options controlling what the scanner treats as a reference.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Web base URL issue links must start with.
    pub web_url: String,
    /// Bibliography keys; citations resolving to one of these are left alone.
    pub known_citations: HashSet<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            web_url: "https://github.com".into(),
            known_citations: HashSet::new(),
        }
    }
}

/// Compiled scanner for one build.
#[derive(Debug, Clone)]
pub struct Scanner {
    issue_url: Regex,
    known_citations: HashSet<String>,
}

impl Scanner {
    pub fn new(opts: &ScanOptions) -> Result<Self> {
        let base = regex::escape(opts.web_url.trim_end_matches('/'));
        let pattern = format!(
            r"^{base}/([A-Za-z0-9](?:[A-Za-z0-9-]*)?)/([A-Za-z0-9._-]+)/(?:issues|pull)/([0-9]+)(?:[/?#].*)?$"
        );
        let issue_url = Regex::new(&pattern).map_err(|e| {
            LinkEnrichError::validation(format!("invalid web URL {:?}: {e}", opts.web_url))
        })?;
        let known_citations = opts
            .known_citations
            .iter()
            .map(|k| k.to_ascii_lowercase())
            .collect();
        Ok(Self {
            issue_url,
            known_citations,
        })
    }

    /// Parse an issue/pull-request URL into its identity.
    ///
    /// Fragments, query strings, and sub-paths (`/files`, `#issuecomment-1`)
    /// are ignored.
    pub fn issue_identity(&self, url: &str) -> Option<Identity> {
        let caps = self.issue_url.captures(url)?;
        let owner = caps.get(1)?.as_str();
        let name = caps.get(2)?.as_str();
        let number: u64 = caps.get(3)?.as_str().parse().ok()?;
        if number == 0 {
            return None;
        }
        Some(Identity::issue(&format!("{owner}/{name}"), number))
    }

    /// Walk `root` and collect every reference match.
    pub fn scan<N: TreeNode>(&self, root: &N) -> ScanResult {
        let mut result = ScanResult::default();
        let mut path = Vec::new();
        self.visit(root, &mut path, false, &mut result);
        debug!(
            matches = result.matches.len(),
            occurrences = result.occurrences(),
            "scan complete"
        );
        result
    }

    fn visit<N: TreeNode>(
        &self,
        node: &N,
        path: &mut Vec<usize>,
        in_literal: bool,
        out: &mut ScanResult,
    ) {
        if let Some(url) = node.link_url() {
            if let Some(identity) = self.issue_identity(url) {
                out.matches.push(Match {
                    path: path.clone(),
                    kind: MatchKind::IssueLink(identity),
                });
            }
        }

        if let Some(citation) = node.citation() {
            // A cite at the root has no parent to splice into.
            if !in_literal && !path.is_empty() {
                if let Some(kind) = self.classify_citation(citation.label, citation.identifier) {
                    out.matches.push(Match {
                        path: path.clone(),
                        kind,
                    });
                }
            }
            return;
        }

        if let Some(text) = node.text_value() {
            if !in_literal && !path.is_empty() {
                let spans = scan_mentions(text);
                if !spans.is_empty() {
                    out.matches.push(Match {
                        path: path.clone(),
                        kind: MatchKind::Mentions(spans),
                    });
                }
            }
        }

        let Some(children) = node.children() else {
            return;
        };
        let nested_literal = in_literal || LITERAL_CONTEXTS.contains(&node.node_type());
        for (index, child) in children.iter().enumerate() {
            path.push(index);
            self.visit(child, path, nested_literal, out);
            path.pop();
        }
    }

    fn classify_citation(&self, label: &str, identifier: Option<&str>) -> Option<MatchKind> {
        let key = identifier.unwrap_or(label).to_ascii_lowercase();
        if self.known_citations.contains(&key) {
            return None;
        }
        if is_valid_handle(label) {
            Some(MatchKind::Citation {
                label: label.to_string(),
                identity: Identity::user(label),
            })
        } else {
            Some(MatchKind::InvalidCitation {
                label: label.to_string(),
            })
        }
    }
}
