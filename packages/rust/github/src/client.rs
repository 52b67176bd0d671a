//! reqwest-backed [`EntityApi`] for GitHub (and GitHub Enterprise).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, instrument};
use url::Url;

use linkenrich_shared::{
    EnrichConfig, Identity, IssueDetail, LinkEnrichError, Result, UserProfile,
};

use crate::api::EntityApi;
use crate::query::BatchQuery;

/// User-Agent string for API requests. GitHub rejects requests without one.
const USER_AGENT: &str = concat!("linkenrich/", env!("CARGO_PKG_VERSION"));

const ACCEPT: &str = "application/vnd.github+json";

const API_VERSION_HEADER: &str = "X-GitHub-Api-Version";
const API_VERSION: &str = "2022-11-28";

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RestIssue {
    title: String,
    state: String,
    #[serde(default)]
    state_reason: Option<String>,
    #[serde(default)]
    html_url: Option<String>,
    /// Present when the issue number is a pull request.
    #[serde(default)]
    pull_request: Option<RestPullRef>,
}

#[derive(Debug, Deserialize)]
struct RestPullRef {
    #[serde(default)]
    merged_at: Option<String>,
}

impl From<RestIssue> for IssueDetail {
    fn from(issue: RestIssue) -> Self {
        // The issues endpoint reports merged PRs as "closed"; GraphQL says MERGED.
        let merged = issue
            .pull_request
            .as_ref()
            .is_some_and(|pr| pr.merged_at.is_some());
        let state = if merged { "merged" } else { issue.state.as_str() };
        IssueDetail::new(
            issue.title.as_str(),
            state,
            issue.state_reason.as_deref(),
            issue.html_url,
        )
    }
}

#[derive(Debug, Deserialize)]
struct RestUser {
    login: String,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

// ---------------------------------------------------------------------------
// GithubClient
// ---------------------------------------------------------------------------

/// GitHub REST + GraphQL client.
///
/// Batched lookups need a token: the GraphQL endpoint refuses anonymous
/// requests, so without one [`supports_batch`](EntityApi::supports_batch)
/// is false and everything goes through REST.
#[derive(Clone)]
pub struct GithubClient {
    http: Client,
    api_url: String,
    graphql_url: String,
    token: Option<String>,
}

impl std::fmt::Debug for GithubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubClient")
            .field("api_url", &self.api_url)
            .field("graphql_url", &self.graphql_url)
            .field("authenticated", &self.token.is_some())
            .finish()
    }
}

impl GithubClient {
    pub fn new(api_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let parsed = Url::parse(api_url)
            .map_err(|e| LinkEnrichError::config(format!("invalid API URL {api_url:?}: {e}")))?;
        let api_url = parsed.as_str().trim_end_matches('/').to_string();

        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| LinkEnrichError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            graphql_url: graphql_endpoint(&api_url),
            api_url,
            token,
        })
    }

    pub fn from_config(config: &EnrichConfig) -> Result<Self> {
        Self::new(
            &config.api_url,
            config.token.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request
            .header(reqwest::header::ACCEPT, ACCEPT)
            .header(API_VERSION_HEADER, API_VERSION);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// GET `url`, treating 404/410 as "does not exist".
    async fn get_optional<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        let response = self
            .authorize(self.http.get(url))
            .send()
            .await
            .map_err(|e| LinkEnrichError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(LinkEnrichError::api(url, status.as_u16()));
        }

        response
            .json::<T>()
            .await
            .map(Some)
            .map_err(|e| LinkEnrichError::parse(format!("{url}: {e}")))
    }
}

/// GraphQL endpoint for an API base. GitHub Enterprise serves REST under
/// `/api/v3` and GraphQL under `/api/graphql`.
fn graphql_endpoint(api_url: &str) -> String {
    match api_url.strip_suffix("/api/v3") {
        Some(host) => format!("{host}/api/graphql"),
        None => format!("{api_url}/graphql"),
    }
}

#[async_trait]
impl EntityApi for GithubClient {
    fn supports_batch(&self) -> bool {
        self.token.is_some()
    }

    #[instrument(skip_all, fields(issues = query.len()))]
    async fn fetch_issue_batch(&self, query: &BatchQuery) -> Result<Vec<(Identity, IssueDetail)>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let url = &self.graphql_url;
        let response = self
            .authorize(self.http.post(url))
            .json(&json!({ "query": query.to_graphql() }))
            .send()
            .await
            .map_err(|e| LinkEnrichError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LinkEnrichError::api(url, status.as_u16()));
        }

        let body: GraphqlResponse = response
            .json()
            .await
            .map_err(|e| LinkEnrichError::parse(format!("{url}: {e}")))?;

        match body.data {
            Some(data) if !data.is_null() => {
                // Partial errors (one repo missing) come alongside usable data.
                for error in &body.errors {
                    debug!(error = %error.message, "GraphQL partial error");
                }
                Ok(query.demux(&data))
            }
            _ => {
                let messages: Vec<&str> = body.errors.iter().map(|e| e.message.as_str()).collect();
                Err(LinkEnrichError::parse(format!(
                    "{url}: GraphQL response without data: {}",
                    messages.join("; ")
                )))
            }
        }
    }

    #[instrument(skip(self))]
    async fn fetch_issue(&self, repo: &str, number: u64) -> Result<Option<IssueDetail>> {
        let (owner, name) = repo
            .split_once('/')
            .ok_or_else(|| LinkEnrichError::validation(format!("not an owner/name slug: {repo}")))?;
        let url = format!("{}/repos/{owner}/{name}/issues/{number}", self.api_url);
        Ok(self.get_optional::<RestIssue>(&url).await?.map(IssueDetail::from))
    }

    #[instrument(skip(self))]
    async fn fetch_user(&self, login: &str) -> Result<Option<UserProfile>> {
        let url = format!("{}/users/{login}", self.api_url);
        Ok(self
            .get_optional::<RestUser>(&url)
            .await?
            .map(|user| UserProfile {
                login: user.login,
                profile_url: user.html_url,
            }))
    }
}
