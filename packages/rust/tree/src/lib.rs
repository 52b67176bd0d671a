//! Document-tree side of link enrichment.
//!
//! - [`node`]: the [`TreeNode`] capability trait and the JSON [`Node`]
//! - [`scanner`]: finds issue links, mentions, and citation-shaped mentions
//! - [`rewriter`]: applies resolved details back onto matched nodes

pub mod node;
pub mod rewriter;
pub mod scanner;

pub use node::{Citation, Node, TreeNode, node_at_mut, splice_at};
pub use rewriter::{
    ISSUE_LINK_CLASS, RewriteReport, Resolutions, USER_LINK_CLASS, WarningSuppressions, apply,
    issue_classes, issue_title, rebuild,
};
pub use scanner::{
    MAX_HANDLE_LEN, Match, MatchKind, MentionSpan, ScanOptions, ScanResult, Scanner,
    is_valid_handle, scan_mentions,
};
