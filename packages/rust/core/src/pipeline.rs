//! One enrichment pass per document:
//! scan → cache probe → resolve misses → rewrite → persist cache.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use tracing::{info, instrument};

use linkenrich_cache::ResolutionCache;
use linkenrich_github::{EntityApi, GithubClient};
use linkenrich_shared::{EnrichConfig, Identity, Result};
use linkenrich_tree::{Resolutions, RewriteReport, ScanOptions, Scanner, TreeNode, apply};

use crate::resolver::{BatchResolver, ResolveStats, ResolverSettings};

/// What one [`LinkEnricher::enrich`] pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Reference occurrences found in the tree.
    pub references: usize,
    /// Distinct identities among them.
    pub unique: usize,
    pub cache_hits: usize,
    pub stats: ResolveStats,
    pub rewrite: RewriteReport,
    /// Whether the persisted cache was written.
    pub flushed: bool,
}

/// Enrichment driver for one build.
///
/// Holds the build's cache; reuse one enricher across every document so
/// identities are fetched at most once per build.
pub struct LinkEnricher {
    scanner: Scanner,
    cache: Arc<ResolutionCache>,
    resolver: BatchResolver,
}

impl LinkEnricher {
    pub fn new(
        scanner: Scanner,
        cache: Arc<ResolutionCache>,
        api: Arc<dyn EntityApi>,
        settings: ResolverSettings,
    ) -> Self {
        let resolver = BatchResolver::new(api, Arc::clone(&cache), settings);
        Self {
            scanner,
            cache,
            resolver,
        }
    }

    /// Build an enricher talking to GitHub as configured.
    pub fn from_config(
        config: &EnrichConfig,
        cache: Arc<ResolutionCache>,
        known_citations: HashSet<String>,
    ) -> Result<Self> {
        let scanner = Scanner::new(&ScanOptions {
            web_url: config.web_url.clone(),
            known_citations,
        })?;
        let api: Arc<dyn EntityApi> = Arc::new(GithubClient::from_config(config)?);
        Ok(Self::new(scanner, cache, api, ResolverSettings::from(config)))
    }

    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    pub fn cache(&self) -> &Arc<ResolutionCache> {
        &self.cache
    }

    /// Enrich `root` in place.
    ///
    /// Lookup and cache failures are logged, never returned: an unresolved
    /// reference is left as it was.
    #[instrument(skip_all)]
    pub async fn enrich<N: TreeNode>(&self, root: &mut N) -> PassReport {
        self.cache.ensure_loaded().await;

        let scan = self.scanner.scan(root);
        let identities = scan.identities();
        let mut report = PassReport {
            references: scan.occurrences(),
            unique: identities.len(),
            ..PassReport::default()
        };

        let misses: BTreeSet<Identity> = identities
            .iter()
            .filter(|id| self.cache.lookup(id).is_none())
            .cloned()
            .collect();
        report.cache_hits = report.unique - misses.len();

        if !misses.is_empty() {
            report.stats = self.resolver.resolve(&misses).await;
        }

        let resolutions: Resolutions = identities
            .into_iter()
            .filter_map(|id| self.cache.lookup(&id).map(|detail| (id, detail)))
            .collect();
        report.rewrite = apply(root, scan, &resolutions);
        report.flushed = self.cache.flush().await;

        info!(
            references = report.references,
            unique = report.unique,
            cache_hits = report.cache_hits,
            requests = report.stats.requests(),
            unresolved = report.stats.unresolved,
            "enrichment pass complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockApi;
    use linkenrich_tree::{ISSUE_LINK_CLASS, Node, USER_LINK_CLASS};

    const ISSUE_URL: &str = "https://github.com/acme/widgets/issues/42";

    fn enricher(api: &Arc<MockApi>, cache: ResolutionCache) -> LinkEnricher {
        enricher_with(api, cache, ScanOptions::default(), ResolverSettings::default())
    }

    fn enricher_with(
        api: &Arc<MockApi>,
        cache: ResolutionCache,
        opts: ScanOptions,
        settings: ResolverSettings,
    ) -> LinkEnricher {
        let scanner = Scanner::new(&opts).expect("scanner");
        let api: Arc<dyn EntityApi> = api.clone();
        LinkEnricher::new(scanner, Arc::new(cache), api, settings)
    }

    fn paragraph(children: Vec<Node>) -> Node {
        Node::parent("root", vec![Node::parent("paragraph", children)])
    }

    fn first_paragraph(root: &Node) -> &[Node] {
        root.children.as_deref().expect("root children")[0]
            .children
            .as_deref()
            .expect("paragraph children")
    }

    fn temp_cache_file() -> std::path::PathBuf {
        std::env::temp_dir()
            .join(format!("linkenrich-pipeline-{}", uuid::Uuid::now_v7()))
            .join("cache/github-links.json")
    }

    #[tokio::test]
    async fn decorates_open_issue_link() {
        let api = Arc::new(MockApi::with_batch().issue("acme/widgets", 42, "Add retries", "OPEN"));
        let enricher = enricher(&api, ResolutionCache::in_memory());
        let mut root = paragraph(vec![Node::link(ISSUE_URL, vec![Node::text("#42")])]);

        let report = enricher.enrich(&mut root).await;

        let link = &first_paragraph(&root)[0];
        assert_eq!(
            link.class.as_deref(),
            Some("github-issue-link github-issue-link--open")
        );
        assert_eq!(link.title.as_deref(), Some("Add retries (OPEN)"));
        assert_eq!(report.rewrite.links_decorated, 1);
        assert!(!report.flushed);
    }

    #[tokio::test]
    async fn splits_resolved_mention() {
        let api = Arc::new(MockApi::with_batch().user("octocat"));
        let enricher = enricher(&api, ResolutionCache::in_memory());
        let mut root = paragraph(vec![Node::text("ping @octocat please review")]);

        enricher.enrich(&mut root).await;

        let nodes = first_paragraph(&root);
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].value.as_deref(), Some("ping "));
        assert_eq!(nodes[1].kind, "link");
        assert_eq!(nodes[1].url.as_deref(), Some("https://github.com/octocat"));
        assert_eq!(nodes[1].class.as_deref(), Some(USER_LINK_CLASS));
        let link_text = nodes[1].children.as_deref().expect("link children");
        assert_eq!(link_text[0].value.as_deref(), Some("@octocat"));
        assert_eq!(nodes[2].value.as_deref(), Some(" please review"));
    }

    #[tokio::test]
    async fn unknown_handle_left_unchanged() {
        let api = Arc::new(MockApi::with_batch());
        let enricher = enricher(&api, ResolutionCache::in_memory());
        let mut root = paragraph(vec![Node::text("thanks @nobody-here!")]);
        let before = root.clone();

        let report = enricher.enrich(&mut root).await;

        assert_eq!(root, before);
        assert_eq!(api.user_calls(), 1);
        assert_eq!(report.stats.unresolved, 1);
    }

    #[tokio::test]
    async fn repeated_issue_fetched_once() {
        let api = Arc::new(MockApi::default().issue("acme/widgets", 42, "Add retries", "open"));
        let enricher = enricher(&api, ResolutionCache::in_memory());
        let mut root = paragraph(vec![
            Node::link(ISSUE_URL, vec![Node::text("first")]),
            Node::text(" and "),
            Node::link(
                "https://github.com/ACME/Widgets/issues/42#issuecomment-1",
                vec![Node::text("second")],
            ),
        ]);

        let report = enricher.enrich(&mut root).await;

        assert_eq!(api.total_calls(), 1);
        assert_eq!(report.references, 2);
        assert_eq!(report.unique, 1);
        let nodes = first_paragraph(&root);
        assert_eq!(nodes[0].class, nodes[2].class);
        assert_eq!(nodes[0].title, nodes[2].title);
    }

    #[tokio::test]
    async fn second_pass_is_identical_and_offline() {
        let api = Arc::new(
            MockApi::with_batch()
                .issue("acme/widgets", 42, "Add retries", "closed")
                .user("octocat")
                .user("not"),
        );
        let enricher = enricher(&api, ResolutionCache::in_memory());
        let mut root = paragraph(vec![
            Node::link(ISSUE_URL, vec![Node::text("#42")]),
            Node::text(" by @octocat, see "),
            Node::cite("octocat", Some("octocat".into())),
            Node::text(" and "),
            Node::cite("not_a_handle", Some("not_a_handle".into())),
        ]);

        enricher.enrich(&mut root).await;
        let once = serde_json::to_value(&root).expect("serialize");
        let calls = api.total_calls();

        let report = enricher.enrich(&mut root).await;
        let twice = serde_json::to_value(&root).expect("serialize");

        assert_eq!(once, twice);
        assert_eq!(api.total_calls(), calls);
        assert_eq!(report.stats.requests(), 0);
        let classes = first_paragraph(&root)[0].class.clone().unwrap_or_default();
        assert_eq!(classes.matches(ISSUE_LINK_CLASS).count(), 2);
        // The demoted citation stays plain text and is never partly linked.
        let demoted = first_paragraph(&root).last().expect("demoted citation");
        assert_eq!(demoted.kind, "text");
        assert_eq!(demoted.value.as_deref(), Some("@not_a_handle"));
        assert_eq!(api.user_calls(), 1);
    }

    #[tokio::test]
    async fn handle_prefix_of_longer_token_is_not_linked() {
        let api = Arc::new(MockApi::with_batch().user("smith"));
        let enricher = enricher(&api, ResolutionCache::in_memory());
        let mut root = paragraph(vec![Node::text("see @smith_2020 for details")]);
        let before = root.clone();

        let report = enricher.enrich(&mut root).await;

        assert_eq!(root, before);
        assert_eq!(report.references, 0);
        assert_eq!(api.total_calls(), 0);
    }

    #[tokio::test]
    async fn missing_handle_fetched_once_across_documents() {
        let api = Arc::new(MockApi::with_batch());
        let enricher = enricher(&api, ResolutionCache::in_memory());

        for _ in 0..3 {
            let mut doc = paragraph(vec![Node::text("cc @doesnotexist123")]);
            let report = enricher.enrich(&mut doc).await;
            assert_eq!(report.stats.unresolved, 1);
        }

        assert_eq!(api.user_calls(), 1);
        assert!(enricher.cache().is_empty());
    }

    #[tokio::test]
    async fn lookup_failures_leave_tree_untouched() {
        let mut mock = MockApi::with_batch();
        mock.offline = true;
        let api = Arc::new(mock);
        let enricher = enricher(&api, ResolutionCache::in_memory());
        let mut root = paragraph(vec![
            Node::link(ISSUE_URL, vec![Node::text("#42")]),
            Node::text(" cc @octocat"),
        ]);
        let before = root.clone();

        let report = enricher.enrich(&mut root).await;

        assert_eq!(root, before);
        assert_eq!(report.stats.unresolved, 2);
    }

    #[tokio::test]
    async fn citations_linked_or_demoted() {
        let api = Arc::new(MockApi::with_batch().user("octocat"));
        let opts = ScanOptions {
            known_citations: ["knuth1984".to_string()].into_iter().collect(),
            ..ScanOptions::default()
        };
        let enricher = enricher_with(
            &api,
            ResolutionCache::in_memory(),
            opts,
            ResolverSettings::default(),
        );
        let mut root = paragraph(vec![
            Node::cite("octocat", Some("octocat".into())),
            Node::cite("not_a_handle", Some("not_a_handle".into())),
            Node::cite("knuth1984", Some("knuth1984".into())),
        ]);

        let report = enricher.enrich(&mut root).await;

        let nodes = first_paragraph(&root);
        assert_eq!(nodes[0].kind, "link");
        assert_eq!(nodes[1].kind, "text");
        assert_eq!(nodes[1].value.as_deref(), Some("@not_a_handle"));
        assert_eq!(nodes[2].kind, "cite");
        assert_eq!(report.rewrite.citations_linked, 1);
        assert_eq!(report.rewrite.citations_demoted, 1);
        assert_eq!(report.rewrite.suppressions.pending("not_a_handle"), 1);
        // Only the valid handle was looked up.
        assert_eq!(api.user_calls(), 1);
    }

    #[tokio::test]
    async fn completion_order_does_not_change_output() {
        let build = || {
            let mut mock = MockApi::with_batch();
            for n in 1..=12 {
                mock = mock.issue(&format!("acme/repo{}", n % 4), n, &format!("Issue {n}"), "open");
            }
            Arc::new(mock)
        };
        let doc = || {
            let children = (1..=12)
                .map(|n| {
                    Node::link(
                        format!("https://github.com/acme/repo{}/issues/{n}", n % 4),
                        vec![Node::text(format!("#{n}"))],
                    )
                })
                .collect();
            paragraph(children)
        };

        let serial_api = build();
        let serial = enricher_with(
            &serial_api,
            ResolutionCache::in_memory(),
            ScanOptions::default(),
            ResolverSettings {
                per_repo_batch: 1,
                repos_per_query: 1,
                concurrency: 1,
            },
        );
        let parallel_api = build();
        let parallel = enricher_with(
            &parallel_api,
            ResolutionCache::in_memory(),
            ScanOptions::default(),
            ResolverSettings {
                per_repo_batch: 1,
                repos_per_query: 1,
                concurrency: 8,
            },
        );

        let mut a = doc();
        let mut b = doc();
        serial.enrich(&mut a).await;
        parallel.enrich(&mut b).await;

        assert_eq!(a, b);
        assert_eq!(serial_api.batch_calls(), 12);
    }

    #[tokio::test]
    async fn persisted_cache_warms_next_build() {
        let path = temp_cache_file();
        let api = Arc::new(MockApi::with_batch().issue("acme/widgets", 42, "Add retries", "open"));

        let first = enricher(&api, ResolutionCache::new(&path));
        let mut root = paragraph(vec![Node::link(ISSUE_URL, vec![Node::text("#42")])]);
        let report = first.enrich(&mut root).await;
        assert!(report.flushed);
        assert!(path.exists());
        let calls = api.total_calls();

        let second = enricher(&api, ResolutionCache::new(&path));
        let mut fresh = paragraph(vec![Node::link(ISSUE_URL, vec![Node::text("#42")])]);
        let report = second.enrich(&mut fresh).await;

        assert_eq!(api.total_calls(), calls);
        assert_eq!(report.cache_hits, 1);
        assert!(!report.flushed);
        assert_eq!(root, fresh);

        if let Some(dir) = path.parent().and_then(|p| p.parent()) {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}
