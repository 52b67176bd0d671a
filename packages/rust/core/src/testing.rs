//! In-process [`EntityApi`] double that counts requests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use linkenrich_github::{BatchQuery, EntityApi};
use linkenrich_shared::{Identity, IssueDetail, LinkEnrichError, Result, UserProfile};

#[derive(Default)]
pub(crate) struct MockApi {
    pub batch: bool,
    pub issues: HashMap<Identity, IssueDetail>,
    pub users: HashMap<String, UserProfile>,
    /// Batches touching one of these repos fail outright.
    pub failing_batch_repos: HashSet<String>,
    /// Every lookup fails with a network error.
    pub offline: bool,
    pub batch_calls: AtomicUsize,
    pub issue_calls: AtomicUsize,
    pub user_calls: AtomicUsize,
    pub batch_sizes: Mutex<Vec<usize>>,
}

impl MockApi {
    pub fn with_batch() -> Self {
        Self {
            batch: true,
            ..Self::default()
        }
    }

    pub fn issue(mut self, repo: &str, number: u64, title: &str, state: &str) -> Self {
        let url = format!("https://github.com/{repo}/issues/{number}");
        self.issues.insert(
            Identity::issue(repo, number),
            IssueDetail::new(title, state, None, Some(url)),
        );
        self
    }

    pub fn user(mut self, login: &str) -> Self {
        self.users.insert(
            login.to_ascii_lowercase(),
            UserProfile {
                login: login.to_string(),
                profile_url: format!("https://github.com/{login}"),
            },
        );
        self
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn issue_calls(&self) -> usize {
        self.issue_calls.load(Ordering::SeqCst)
    }

    pub fn user_calls(&self) -> usize {
        self.user_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.batch_calls() + self.issue_calls() + self.user_calls()
    }
}

#[async_trait]
impl EntityApi for MockApi {
    fn supports_batch(&self) -> bool {
        self.batch
    }

    async fn fetch_issue_batch(&self, query: &BatchQuery) -> Result<Vec<(Identity, IssueDetail)>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.batch_sizes
            .lock()
            .expect("lock")
            .push(query.entries.len());
        if self.offline
            || query
                .entries
                .iter()
                .any(|e| self.failing_batch_repos.contains(&e.repo))
        {
            return Err(LinkEnrichError::api("/graphql", 502));
        }
        Ok(query
            .identities()
            .into_iter()
            .filter_map(|id| self.issues.get(&id).map(|d| (id, d.clone())))
            .collect())
    }

    async fn fetch_issue(&self, repo: &str, number: u64) -> Result<Option<IssueDetail>> {
        self.issue_calls.fetch_add(1, Ordering::SeqCst);
        if self.offline {
            return Err(LinkEnrichError::Network("connection refused".into()));
        }
        Ok(self.issues.get(&Identity::issue(repo, number)).cloned())
    }

    async fn fetch_user(&self, login: &str) -> Result<Option<UserProfile>> {
        self.user_calls.fetch_add(1, Ordering::SeqCst);
        if self.offline {
            return Err(LinkEnrichError::Network("connection refused".into()));
        }
        Ok(self.users.get(&login.to_ascii_lowercase()).cloned())
    }
}
