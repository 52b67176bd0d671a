//! Batch resolver: turns a set of cache misses into as few remote requests
//! as possible.
//!
//! Issues go through aliased GraphQL batches first (when the API supports
//! them); whatever is still missing afterwards, plus every user handle, is
//! looked up one at a time. Every success lands in the cache immediately.
//! Failures are logged and leave the identity unresolved; the resolver
//! remembers them so each identity is attempted at most once per build.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use linkenrich_cache::ResolutionCache;
use linkenrich_github::{EntityApi, group_by_repo, plan_batches};
use linkenrich_shared::{EnrichConfig, Identity, ResolvedDetail};

/// Batching and scheduling knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverSettings {
    /// Max issue numbers per repository entry.
    pub per_repo_batch: usize,
    /// Max repository entries per request.
    pub repos_per_query: usize,
    /// Max lookups in flight.
    pub concurrency: usize,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            per_repo_batch: 20,
            repos_per_query: 5,
            concurrency: 4,
        }
    }
}

impl From<&EnrichConfig> for ResolverSettings {
    fn from(config: &EnrichConfig) -> Self {
        Self {
            per_repo_batch: config.per_repo_batch,
            repos_per_query: config.repos_per_query,
            concurrency: config.concurrency,
        }
    }
}

/// Request and outcome counts for one [`BatchResolver::resolve`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveStats {
    pub batch_requests: usize,
    pub single_requests: usize,
    pub resolved: usize,
    pub unresolved: usize,
}

impl ResolveStats {
    pub fn requests(&self) -> usize {
        self.batch_requests + self.single_requests
    }
}

pub struct BatchResolver {
    api: Arc<dyn EntityApi>,
    cache: Arc<ResolutionCache>,
    settings: ResolverSettings,
    /// Identities already attempted this build without success. Memory only.
    unresolvable: Mutex<HashSet<Identity>>,
}

impl BatchResolver {
    pub fn new(
        api: Arc<dyn EntityApi>,
        cache: Arc<ResolutionCache>,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            api,
            cache,
            settings,
            unresolvable: Mutex::new(HashSet::new()),
        }
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    /// Resolve `misses` into the cache.
    ///
    /// Identities already cached, or already attempted and missed earlier in
    /// this build, are not requested again. Never fails: anything that could
    /// not be resolved is counted in [`ResolveStats::unresolved`].
    #[instrument(skip_all, fields(misses = misses.len()))]
    pub async fn resolve(&self, misses: &BTreeSet<Identity>) -> ResolveStats {
        let mut stats = ResolveStats::default();
        let pending: Vec<Identity> = {
            let unresolvable = self.unresolvable.lock().unwrap_or_else(PoisonError::into_inner);
            misses
                .iter()
                .filter(|id| self.cache.lookup(id).is_none())
                .filter(|id| {
                    let known_missing = unresolvable.contains(*id);
                    stats.unresolved += usize::from(known_missing);
                    !known_missing
                })
                .cloned()
                .collect()
        };
        if pending.is_empty() {
            return stats;
        }

        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));

        // --- Phase 1: batched issue lookups ---
        if self.api.supports_batch() {
            stats.batch_requests = self.resolve_batched(&pending, &semaphore).await;
        }

        // --- Phase 2: residual issues and all users, one at a time ---
        let residual: Vec<Identity> = pending
            .iter()
            .filter(|id| self.cache.lookup(id).is_none())
            .cloned()
            .collect();
        stats.single_requests = residual.len();
        self.resolve_singly(residual, &semaphore).await;

        let missed: Vec<Identity> = pending
            .iter()
            .filter(|id| self.cache.lookup(id).is_none())
            .cloned()
            .collect();
        stats.resolved = pending.len() - missed.len();
        stats.unresolved += missed.len();
        self.unresolvable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(missed);

        info!(
            batch_requests = stats.batch_requests,
            single_requests = stats.single_requests,
            resolved = stats.resolved,
            unresolved = stats.unresolved,
            "resolved references"
        );
        stats
    }

    /// Run every planned batch concurrently; returns the number of requests.
    async fn resolve_batched(&self, pending: &[Identity], semaphore: &Arc<Semaphore>) -> usize {
        let plan = plan_batches(
            &group_by_repo(pending),
            self.settings.per_repo_batch,
            self.settings.repos_per_query,
        );
        let requests = plan.len();
        let mut tasks = JoinSet::new();

        for query in plan {
            let api = Arc::clone(&self.api);
            let cache = Arc::clone(&self.cache);
            let sem = Arc::clone(semaphore);
            tasks.spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return;
                };
                match api.fetch_issue_batch(&query).await {
                    Ok(found) => {
                        debug!(asked = query.len(), found = found.len(), "batch answered");
                        for (identity, detail) in found {
                            cache.store(identity, ResolvedDetail::Issue(detail));
                        }
                    }
                    Err(e) => {
                        warn!(
                            issues = query.len(),
                            error = %e,
                            "batched lookup failed, falling back to single lookups"
                        );
                    }
                }
            });
        }

        join_all(&mut tasks).await;
        requests
    }

    async fn resolve_singly(&self, identities: Vec<Identity>, semaphore: &Arc<Semaphore>) {
        let mut tasks = JoinSet::new();

        for identity in identities {
            let api = Arc::clone(&self.api);
            let cache = Arc::clone(&self.cache);
            let sem = Arc::clone(semaphore);
            tasks.spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return;
                };
                let outcome = match &identity {
                    Identity::Issue { repo, number } => api
                        .fetch_issue(repo, *number)
                        .await
                        .map(|found| found.map(ResolvedDetail::from)),
                    Identity::User { login } => api
                        .fetch_user(login)
                        .await
                        .map(|found| found.map(ResolvedDetail::from)),
                };
                match outcome {
                    Ok(Some(detail)) => cache.store(identity, detail),
                    Ok(None) => debug!(%identity, "not found"),
                    Err(e) => warn!(%identity, error = %e, "lookup failed"),
                }
            });
        }

        join_all(&mut tasks).await;
    }
}

async fn join_all(tasks: &mut JoinSet<()>) {
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "lookup task aborted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockApi;

    fn resolver(api: &Arc<MockApi>, settings: ResolverSettings) -> (BatchResolver, Arc<ResolutionCache>) {
        let cache = Arc::new(ResolutionCache::in_memory());
        let api: Arc<dyn EntityApi> = api.clone();
        (BatchResolver::new(api, Arc::clone(&cache), settings), cache)
    }

    fn set(ids: impl IntoIterator<Item = Identity>) -> BTreeSet<Identity> {
        ids.into_iter().collect()
    }

    #[tokio::test]
    async fn issues_batched_users_single() {
        let api = Arc::new(
            MockApi::with_batch()
                .issue("acme/widgets", 1, "One", "OPEN")
                .issue("acme/widgets", 2, "Two", "CLOSED")
                .issue("acme/gadgets", 3, "Three", "MERGED")
                .user("octocat"),
        );
        let (resolver, cache) = resolver(&api, ResolverSettings::default());

        let stats = resolver
            .resolve(&set([
                Identity::issue("acme/widgets", 1),
                Identity::issue("acme/widgets", 2),
                Identity::issue("acme/gadgets", 3),
                Identity::user("octocat"),
            ]))
            .await;

        assert_eq!(api.batch_calls(), 1);
        assert_eq!(api.issue_calls(), 0);
        assert_eq!(api.user_calls(), 1);
        assert_eq!(
            stats,
            ResolveStats {
                batch_requests: 1,
                single_requests: 1,
                resolved: 4,
                unresolved: 0,
            }
        );
        assert!(cache.lookup(&Identity::issue("acme/gadgets", 3)).is_some());
        assert!(cache.lookup(&Identity::user("octocat")).is_some());
    }

    #[tokio::test]
    async fn batching_bound_holds() {
        let mut mock = MockApi::with_batch();
        let mut ids = Vec::new();
        for r in 0..7 {
            for n in 1..=3 {
                let repo = format!("acme/repo{r}");
                mock = mock.issue(&repo, n, "t", "open");
                ids.push(Identity::issue(&repo, n));
            }
        }
        let api = Arc::new(mock);
        let (resolver, _cache) = resolver(&api, ResolverSettings::default());

        let stats = resolver.resolve(&set(ids)).await;

        // ceil(7 / 5) requests, nothing left for the single path.
        assert_eq!(api.batch_calls(), 2);
        assert_eq!(api.issue_calls(), 0);
        assert_eq!(stats.resolved, 21);
        let mut sizes = api.batch_sizes.lock().expect("lock").clone();
        sizes.sort();
        assert_eq!(sizes, [2, 5]);
    }

    #[tokio::test]
    async fn failing_group_falls_back_alone() {
        let mut mock = MockApi::with_batch()
            .issue("acme/good", 1, "ok", "open")
            .issue("acme/good", 2, "ok", "open")
            .issue("acme/bad", 1, "fallback", "closed")
            .issue("acme/bad", 2, "fallback", "closed");
        mock.failing_batch_repos.insert("acme/bad".into());
        let api = Arc::new(mock);
        let settings = ResolverSettings {
            repos_per_query: 1,
            ..ResolverSettings::default()
        };
        let (resolver, cache) = resolver(&api, settings);

        let stats = resolver
            .resolve(&set([
                Identity::issue("acme/good", 1),
                Identity::issue("acme/good", 2),
                Identity::issue("acme/bad", 1),
                Identity::issue("acme/bad", 2),
            ]))
            .await;

        assert_eq!(api.batch_calls(), 2);
        // Only the failed group's issues take the single path.
        assert_eq!(api.issue_calls(), 2);
        assert_eq!(stats.resolved, 4);
        let detail = cache.lookup(&Identity::issue("acme/bad", 2)).expect("cached");
        assert_eq!(detail.as_issue().map(|d| d.title.as_str()), Some("fallback"));
    }

    #[tokio::test]
    async fn without_batch_support_everything_is_single() {
        let api = Arc::new(
            MockApi::default()
                .issue("acme/widgets", 1, "One", "open")
                .issue("acme/widgets", 2, "Two", "open"),
        );
        let (resolver, _cache) = resolver(&api, ResolverSettings::default());

        let stats = resolver
            .resolve(&set([
                Identity::issue("acme/widgets", 1),
                Identity::issue("acme/widgets", 2),
            ]))
            .await;

        assert_eq!(api.batch_calls(), 0);
        assert_eq!(api.issue_calls(), 2);
        assert_eq!(stats.batch_requests, 0);
        assert_eq!(stats.single_requests, 2);
    }

    #[tokio::test]
    async fn missing_entities_stay_unresolved() {
        let api = Arc::new(MockApi::with_batch().issue("acme/widgets", 1, "One", "open"));
        let (resolver, cache) = resolver(&api, ResolverSettings::default());

        let stats = resolver
            .resolve(&set([
                Identity::issue("acme/widgets", 1),
                Identity::issue("acme/widgets", 999),
                Identity::user("nobody-here"),
            ]))
            .await;

        // 999 is absent from the batch answer and retried once on its own.
        assert_eq!(api.issue_calls(), 1);
        assert_eq!(stats.requests(), 3);
        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.unresolved, 2);
        assert!(cache.lookup(&Identity::issue("acme/widgets", 999)).is_none());
    }

    #[tokio::test]
    async fn offline_api_resolves_nothing() {
        let mut mock = MockApi::with_batch().user("octocat");
        mock.offline = true;
        let api = Arc::new(mock);
        let (resolver, cache) = resolver(&api, ResolverSettings::default());

        let stats = resolver
            .resolve(&set([Identity::issue("acme/widgets", 1), Identity::user("octocat")]))
            .await;

        assert_eq!(stats.resolved, 0);
        assert_eq!(stats.unresolved, 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn misses_are_attempted_once_per_build() {
        let mut mock = MockApi::with_batch();
        mock.failing_batch_repos.insert("acme/widgets".into());
        let api = Arc::new(mock);
        let (resolver, _cache) = resolver(&api, ResolverSettings::default());
        let misses = set([Identity::user("doesnotexist123"), Identity::issue("acme/widgets", 7)]);

        let first = resolver.resolve(&misses).await;
        let calls = api.total_calls();
        let second = resolver.resolve(&misses).await;

        assert_eq!(first.unresolved, 2);
        assert_eq!(api.total_calls(), calls);
        assert_eq!(second.requests(), 0);
        assert_eq!(second.unresolved, 2);
    }

    #[tokio::test]
    async fn cached_identities_are_not_fetched() {
        let api = Arc::new(MockApi::with_batch().user("octocat"));
        let (resolver, cache) = resolver(&api, ResolverSettings::default());
        cache.store(
            Identity::user("octocat"),
            ResolvedDetail::from(linkenrich_shared::UserProfile {
                login: "octocat".into(),
                profile_url: "https://github.com/octocat".into(),
            }),
        );

        let stats = resolver.resolve(&set([Identity::user("octocat")])).await;

        assert_eq!(api.total_calls(), 0);
        assert_eq!(stats, ResolveStats::default());
    }
}
