//! Core domain types: reference identities and resolved details.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Scope name used in identity keys for user handles.
pub const USER_SCOPE: &str = "user";

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// The `(scope, id)` pair naming one external entity.
///
/// GitHub treats repository slugs and logins case-insensitively, so both are
/// stored lower-cased; `@Octocat` and `@octocat` share one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Identity {
    /// An issue (or pull request) in `owner/name`.
    Issue { repo: String, number: u64 },
    /// A user or organization handle.
    User { login: String },
}

impl Identity {
    pub fn issue(repo: &str, number: u64) -> Self {
        Self::Issue {
            repo: repo.to_ascii_lowercase(),
            number,
        }
    }

    pub fn user(login: &str) -> Self {
        Self::User {
            login: login.to_ascii_lowercase(),
        }
    }

    /// Scope half of the key: the repository slug, or [`USER_SCOPE`].
    pub fn scope(&self) -> &str {
        match self {
            Self::Issue { repo, .. } => repo,
            Self::User { .. } => USER_SCOPE,
        }
    }

    /// Stable cache key, `"<scope>#<id>"`.
    pub fn key(&self) -> String {
        match self {
            Self::Issue { repo, number } => format!("{repo}#{number}"),
            Self::User { login } => format!("{USER_SCOPE}#{login}"),
        }
    }

    /// Parse a key produced by [`Identity::key`].
    pub fn from_key(key: &str) -> Option<Self> {
        let (scope, id) = key.rsplit_once('#')?;
        if scope == USER_SCOPE {
            return (!id.is_empty()).then(|| Self::user(id));
        }
        let (owner, name) = scope.split_once('/')?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        let number = id.parse().ok()?;
        Some(Self::issue(scope, number))
    }

    pub fn is_batchable(&self) -> bool {
        matches!(self, Self::Issue { .. })
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Issue { repo, number } => write!(f, "{repo}#{number}"),
            Self::User { login } => write!(f, "@{login}"),
        }
    }
}

// ---------------------------------------------------------------------------
// IssueState
// ---------------------------------------------------------------------------

/// Issue or pull request state, normalized to lower case.
///
/// GraphQL reports `OPEN`, REST reports `open`; both land on the same variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum IssueState {
    Open,
    Closed,
    Merged,
    Other(String),
}

impl IssueState {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Merged => "merged",
            Self::Other(s) => s,
        }
    }
}

impl From<&str> for IssueState {
    fn from(raw: &str) -> Self {
        let lower = raw.trim().to_ascii_lowercase();
        match lower.as_str() {
            "open" => Self::Open,
            "closed" => Self::Closed,
            "merged" => Self::Merged,
            _ => Self::Other(lower),
        }
    }
}

impl From<String> for IssueState {
    fn from(raw: String) -> Self {
        Self::from(raw.as_str())
    }
}

impl From<IssueState> for String {
    fn from(state: IssueState) -> Self {
        state.as_str().to_string()
    }
}

impl fmt::Display for IssueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Resolved details
// ---------------------------------------------------------------------------

/// What the remote API told us about one issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueDetail {
    pub title: String,
    pub state: IssueState,
    /// Lower-cased reason (`completed`, `not_planned`, `reopened`), if any.
    #[serde(
        default,
        deserialize_with = "deserialize_reason",
        skip_serializing_if = "Option::is_none"
    )]
    pub state_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl IssueDetail {
    /// Build a detail, normalizing casing so every API path yields the same shape.
    pub fn new(
        title: impl Into<String>,
        state: &str,
        state_reason: Option<&str>,
        url: Option<String>,
    ) -> Self {
        Self {
            title: title.into(),
            state: IssueState::from(state),
            state_reason: state_reason.and_then(normalize_reason),
            url,
        }
    }
}

fn normalize_reason(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_ascii_lowercase())
}

fn deserialize_reason<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(normalize_reason))
}

/// A resolved user profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub login: String,
    pub profile_url: String,
}

/// Cached result for one [`Identity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResolvedDetail {
    Issue(IssueDetail),
    User(UserProfile),
}

impl ResolvedDetail {
    pub fn as_issue(&self) -> Option<&IssueDetail> {
        match self {
            Self::Issue(detail) => Some(detail),
            Self::User(_) => None,
        }
    }

    pub fn as_user(&self) -> Option<&UserProfile> {
        match self {
            Self::User(profile) => Some(profile),
            Self::Issue(_) => None,
        }
    }

    /// Whether this detail has the shape `identity` resolves to.
    pub fn fits(&self, identity: &Identity) -> bool {
        matches!(
            (self, identity),
            (Self::Issue(_), Identity::Issue { .. }) | (Self::User(_), Identity::User { .. })
        )
    }
}

impl From<IssueDetail> for ResolvedDetail {
    fn from(detail: IssueDetail) -> Self {
        Self::Issue(detail)
    }
}

impl From<UserProfile> for ResolvedDetail {
    fn from(profile: UserProfile) -> Self {
        Self::User(profile)
    }
}
