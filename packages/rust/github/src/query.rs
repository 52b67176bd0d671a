//! Batched issue query compiler.
//!
//! Issue lookups are planned into [`BatchQuery`] values (repository entries
//! with per-entry aliases), serialized to one GraphQL document each, and the
//! response is demultiplexed back to identities through the same aliases.
//! Planning, serialization, and demultiplexing are independent pure steps.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use linkenrich_shared::{Identity, IssueDetail};

/// Issue numbers to look up, grouped by lower-cased `owner/name`.
pub type IssueRequests = BTreeMap<String, BTreeSet<u64>>;

/// One aliased `repository(...)` selection inside a batched query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoEntry {
    /// Alias unique within its query (`r0`, `r1`, ...).
    pub alias: String,
    /// `owner/name`.
    pub repo: String,
    pub numbers: Vec<u64>,
}

/// One aggregated remote request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchQuery {
    pub entries: Vec<RepoEntry>,
}

/// Group issue identities by repository. Users are ignored.
pub fn group_by_repo<'a>(identities: impl IntoIterator<Item = &'a Identity>) -> IssueRequests {
    let mut out = IssueRequests::new();
    for identity in identities {
        if let Identity::Issue { repo, number } = identity {
            out.entry(repo.clone()).or_default().insert(*number);
        }
    }
    out
}

/// Split `requests` into batched queries.
///
/// Each repository's numbers are chunked into entries of at most
/// `per_repo_batch`; entries are then packed `repos_per_query` to a query.
/// Both sizes are clamped to at least 1.
pub fn plan_batches(
    requests: &IssueRequests,
    per_repo_batch: usize,
    repos_per_query: usize,
) -> Vec<BatchQuery> {
    let per_repo_batch = per_repo_batch.max(1);
    let repos_per_query = repos_per_query.max(1);

    let chunks: Vec<(&String, Vec<u64>)> = requests
        .iter()
        .flat_map(|(repo, numbers)| {
            let numbers: Vec<u64> = numbers.iter().copied().collect();
            numbers
                .chunks(per_repo_batch)
                .map(|chunk| (repo, chunk.to_vec()))
                .collect::<Vec<_>>()
        })
        .collect();

    chunks
        .chunks(repos_per_query)
        .map(|group| BatchQuery {
            entries: group
                .iter()
                .enumerate()
                .map(|(i, (repo, numbers))| RepoEntry {
                    alias: format!("r{i}"),
                    repo: (*repo).clone(),
                    numbers: numbers.clone(),
                })
                .collect(),
        })
        .collect()
}

fn issue_alias(number: u64) -> String {
    format!("n{number}")
}

impl BatchQuery {
    /// Every identity this query asks for.
    pub fn identities(&self) -> Vec<Identity> {
        self.entries
            .iter()
            .flat_map(|e| e.numbers.iter().map(|n| Identity::issue(&e.repo, *n)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.iter().map(|e| e.numbers.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialize to a GraphQL document.
    ///
    /// `issueOrPullRequest` resolves either kind, since links to both share
    /// one number sequence per repository.
    pub fn to_graphql(&self) -> String {
        let mut doc = String::from("query {\n");
        for entry in &self.entries {
            let (owner, name) = entry.repo.split_once('/').unwrap_or((entry.repo.as_str(), ""));
            doc.push_str(&format!(
                "  {}: repository(owner: {}, name: {}) {{\n",
                entry.alias,
                graphql_string(owner),
                graphql_string(name)
            ));
            for number in &entry.numbers {
                doc.push_str(&format!(
                    "    {}: issueOrPullRequest(number: {number}) {{\n      \
                     ... on Issue {{ title state stateReason url }}\n      \
                     ... on PullRequest {{ title state url }}\n    }}\n",
                    issue_alias(*number)
                ));
            }
            doc.push_str("  }\n");
        }
        doc.push('}');
        doc
    }

    /// Map a response `data` object back to identities.
    ///
    /// Aliases that are missing, null, or lack a title/state are skipped;
    /// the caller treats them as still unresolved.
    pub fn demux(&self, data: &Value) -> Vec<(Identity, IssueDetail)> {
        let mut out = Vec::new();
        for entry in &self.entries {
            let Some(repo) = data.get(&entry.alias).filter(|v| v.is_object()) else {
                continue;
            };
            for number in &entry.numbers {
                let Some(issue) = repo.get(issue_alias(*number)) else {
                    continue;
                };
                if let Some(detail) = parse_issue_object(issue) {
                    out.push((Identity::issue(&entry.repo, *number), detail));
                }
            }
        }
        out
    }
}

fn parse_issue_object(issue: &Value) -> Option<IssueDetail> {
    let title = issue.get("title")?.as_str()?;
    let state = issue.get("state")?.as_str()?;
    let reason = issue.get("stateReason").and_then(Value::as_str);
    let url = issue.get("url").and_then(Value::as_str).map(str::to_string);
    Some(IssueDetail::new(title, state, reason, url))
}

/// GraphQL string literal. JSON string syntax is a valid GraphQL string.
fn graphql_string(raw: &str) -> String {
    Value::String(raw.to_string()).to_string()
}
