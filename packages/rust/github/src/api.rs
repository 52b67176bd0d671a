//! The remote entity lookup seam.
//!
//! The resolver only talks to [`EntityApi`], so tests and alternate backends
//! can stand in for GitHub without a network.

use async_trait::async_trait;

use linkenrich_shared::{Identity, IssueDetail, Result, UserProfile};

use crate::query::BatchQuery;

/// Remote lookups for issues and users.
///
/// `Ok(None)` means the remote answered and the entity does not exist (or is
/// not visible). `Err` means the lookup itself failed. Both leave the identity
/// unresolved; the distinction only matters for logging.
#[async_trait]
pub trait EntityApi: Send + Sync {
    /// Whether [`fetch_issue_batch`](Self::fetch_issue_batch) is usable.
    fn supports_batch(&self) -> bool;

    /// Resolve every issue in `query` with one request. Entries the response
    /// omits are simply absent from the result.
    async fn fetch_issue_batch(&self, query: &BatchQuery) -> Result<Vec<(Identity, IssueDetail)>>;

    /// Resolve one issue or pull request.
    async fn fetch_issue(&self, repo: &str, number: u64) -> Result<Option<IssueDetail>>;

    /// Resolve one user profile.
    async fn fetch_user(&self, login: &str) -> Result<Option<UserProfile>>;
}
