//! Data models for stored articles and their analysis.
//!
//! - [`Article`]: one search result, stored once per `(url, query_id)`
//! - [`Analysis`]: fields attached later by downstream analysis
//! - [`SubjectivityLabel`]: the binary label produced by the classifier
//!
//! Optional fields are skipped when serializing. Documents are written with
//! partial-merge semantics, so an absent field leaves whatever another writer
//! stored, while an explicit `null` would erase it.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// A search result stored in the document store.
///
/// # Identity
///
/// `id` is derived from the provider link and the `query_id`, so the same
/// link discovered twice for one query converges to one document, while the
/// same link under another query is a separate document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    /// Stable dedup identity, see [`Article::make_id`].
    pub id: String,
    /// Correlation token of the exploration request that found this article.
    pub query_id: String,
    /// Result title as returned by the provider.
    pub title: String,
    /// Result snippet; may be empty.
    pub description: String,
    /// Validated absolute http(s) URL.
    pub url: Url,
    /// Present only once analysis has written to this document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Analysis>,
}

impl Article {
    /// Hex SHA-256 of `"{url}-{query_id}"`.
    pub fn make_id(url: &str, query_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{url}-{query_id}").as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Build an un-analyzed article from provider fields.
    ///
    /// The id is computed from `link` exactly as given; the stored `url` is
    /// the parsed form. Fails if `link` is not an absolute http(s) URL.
    pub fn candidate(
        query_id: &str,
        title: &str,
        description: &str,
        link: &str,
    ) -> Result<Self, String> {
        let url = parse_article_url(link)?;
        Ok(Self {
            id: Self::make_id(link, query_id),
            query_id: query_id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            url,
            analysis: None,
        })
    }
}

/// Parse a link and require an `http`/`https` scheme with a host.
pub fn parse_article_url(link: &str) -> Result<Url, String> {
    let url = Url::parse(link.trim()).map_err(|e| format!("{link}: {e}"))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(format!("{link}: unsupported scheme '{other}'")),
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(format!("{link}: missing host"));
    }
    Ok(url)
}

/// Output of downstream analysis, merged into an article after ingestion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_coverage: Option<f64>,
    /// Fraction of description segments labelled subjective, in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subjectivity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<i64>,
}

impl Analysis {
    pub fn subjectivity(score: f64) -> Self {
        Self {
            subjectivity: Some(score),
            ..Self::default()
        }
    }
}

/// Label assigned to one text segment by the subjectivity classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubjectivityLabel {
    #[serde(rename = "SUBJ")]
    Subjective,
    #[serde(rename = "OBJ")]
    Objective,
}

impl SubjectivityLabel {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "SUBJ" => Some(Self::Subjective),
            "OBJ" => Some(Self::Objective),
            _ => None,
        }
    }
}
