//! GitHub lookups for link enrichment.
//!
//! - [`query`]: plans issue lookups into aliased GraphQL batches and maps
//!   responses back to identities
//! - [`api`]: the [`EntityApi`] trait the resolver depends on
//! - [`client`]: [`GithubClient`], the reqwest implementation

pub mod api;
pub mod client;
pub mod query;

pub use api::EntityApi;
pub use client::GithubClient;
pub use query::{BatchQuery, IssueRequests, RepoEntry, group_by_repo, plan_batches};
