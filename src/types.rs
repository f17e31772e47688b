use crate::error::IndexError;
use crate::index::settings::SettingsGroup;
use serde::{Deserialize, Serialize, Serializer};

pub const DEFAULT_LIMIT: u32 = 20;

/// A user profile as the application sees it.
///
/// Optional fields are `None` when the profile does not set them; they are
/// never stored as empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileDocument {
    pub id: String,
    pub fid: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pfp_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twitter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<String>,
    /// Seconds since the Unix epoch.
    #[serde(default)]
    pub updated_at: u64,
}

impl ProfileDocument {
    pub fn new(id: impl Into<String>, fid: u64) -> Self {
        ProfileDocument {
            id: id.into(),
            fid,
            display_name: None,
            username: None,
            pfp_url: None,
            bio: None,
            url: None,
            location: None,
            twitter: None,
            github: None,
            updated_at: 0,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_bio(mut self, bio: impl Into<String>) -> Self {
        self.bio = Some(bio.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_updated_at(mut self, updated_at: u64) -> Self {
        self.updated_at = updated_at;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
    /// Conjunctive: a hit must satisfy every entry.
    #[serde(default)]
    pub filters: Vec<String>,
    /// Applied in order; earlier keys take precedence.
    #[serde(default)]
    pub sort_keys: Vec<String>,
}

fn default_limit() -> u32 {
    DEFAULT_LIMIT
}

impl Default for SearchRequest {
    fn default() -> Self {
        SearchRequest {
            query: String::new(),
            limit: DEFAULT_LIMIT,
            offset: 0,
            filters: Vec::new(),
            sort_keys: Vec::new(),
        }
    }
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        SearchRequest {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filters.push(filter.into());
        self
    }

    pub fn with_sort(mut self, sort_key: impl Into<String>) -> Self {
        self.sort_keys.push(sort_key.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: u32,
    pub limit: u32,
    pub offset: u32,
    pub has_more: bool,
}

impl Pagination {
    /// `total` is the backend's hit estimate; it saturates at `u32::MAX`.
    pub fn compute(total: u64, limit: u32, offset: u32, returned: usize) -> Self {
        let seen = offset as u64 + returned as u64;
        Pagination {
            total: u32::try_from(total).unwrap_or(u32::MAX),
            limit,
            offset,
            has_more: seen < total,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub documents: Vec<ProfileDocument>,
    pub pagination: Pagination,
    pub processing_time_ms: u64,
    /// Hits the backend returned that could not be decoded.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<DocFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOutcome {
    pub success: bool,
    /// Whether any change was submitted to the backend.
    pub changed: bool,
    /// Groups that were updated, in submission order.
    pub groups: Vec<SettingsGroup>,
}

impl ApplyOutcome {
    pub fn unchanged() -> Self {
        ApplyOutcome {
            success: true,
            changed: false,
            groups: Vec::new(),
        }
    }
}

/// One document that failed inside a batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocFailure {
    pub doc_id: String,
    #[serde(serialize_with = "serialize_display")]
    pub error: IndexError,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub upserted: Vec<String>,
    pub rejected: Vec<DocFailure>,
}

impl BatchSummary {
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }
}

fn serialize_display<S: Serializer>(err: &IndexError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(err)
}
