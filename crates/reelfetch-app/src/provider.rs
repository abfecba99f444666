//! HTTP client for an apibay-compatible content index.
//!
//! `GET {base}/q.php?q=<query>` answers with a JSON array of listings and
//! `GET {base}/t.php?id=<id>` with a single listing. The index signals "no
//! results" with one listing whose info hash is all zeroes. Numeric fields
//! arrive as strings or numbers depending on the deployment.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::Url;

use reelfetch_transfer_core::{
    Descriptor, DescriptorLookup, SearchProvider, SearchResult, TransferError, TransferResult,
};

/// Identifier stamped on results from this index.
pub const PROVIDER_NAME: &str = "apibay";
/// Index used when `REELFETCH_SEARCH_URL` is unset.
pub const DEFAULT_SEARCH_URL: &str = "https://apibay.org";
/// Environment variable overriding the index base URL.
pub const SEARCH_URL_ENV: &str = "REELFETCH_SEARCH_URL";

const EMPTY_INFO_HASH: &str = "0000000000000000000000000000000000000000";

/// Failures talking to the index.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The base URL could not be parsed or extended.
    #[error("invalid index url")]
    InvalidUrl {
        /// Offending value.
        value: String,
        /// Source parse error.
        source: url::ParseError,
    },
    /// The request could not be sent or its body could not be read.
    #[error("index request failed")]
    Request {
        /// Requested URL.
        url: String,
        /// Source HTTP client error.
        source: reqwest::Error,
    },
    /// The index answered with a non-success status.
    #[error("index returned an error status")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },
}

impl From<ProviderError> for TransferError {
    fn from(err: ProviderError) -> Self {
        Self::Search {
            provider: PROVIDER_NAME,
            source: Box::new(err),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Listing {
    #[serde(deserialize_with = "lenient_string")]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    info_hash: String,
    #[serde(default, deserialize_with = "lenient_u64")]
    seeders: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    size: u64,
}

impl Listing {
    fn is_placeholder(&self) -> bool {
        self.info_hash.is_empty() || self.info_hash == EMPTY_INFO_HASH
    }

    fn descriptor(&self) -> Option<Descriptor> {
        if self.is_placeholder() {
            return None;
        }
        match Descriptor::from_info_hash(&self.info_hash, Some(&self.name)) {
            Ok(descriptor) => Some(descriptor),
            Err(err) => {
                debug!(id = %self.id, error = %err, "listing carries an unusable info hash");
                None
            }
        }
    }

    fn into_result(self) -> Option<SearchResult> {
        let descriptor = self.descriptor()?;
        Some(SearchResult {
            title: self.name,
            size: (self.size > 0).then_some(self.size),
            seed_count: u32::try_from(self.seeders).unwrap_or(u32::MAX),
            descriptor: Some(descriptor.to_string()),
            provider: PROVIDER_NAME.to_string(),
            provider_ref: Some(self.id.clone()),
            id: self.id,
        })
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(value) => value,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(number) => number.as_u64().unwrap_or(0),
        Value::String(value) => value.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

/// Search provider and descriptor lookup backed by one index.
#[derive(Clone)]
pub struct ApibayIndex {
    client: Client,
    base: Url,
}

impl ApibayIndex {
    /// Build a client for the index rooted at `base`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::InvalidUrl`] if `base` is not an absolute URL.
    pub fn new(client: Client, base: &str) -> Result<Self, ProviderError> {
        let mut normalized = base.trim().to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let base = Url::parse(&normalized).map_err(|source| ProviderError::InvalidUrl {
            value: base.to_string(),
            source,
        })?;
        Ok(Self { client, base })
    }

    /// Base URL requests are issued against.
    #[must_use]
    pub const fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str, key: &str, value: &str) -> Result<Url, ProviderError> {
        let mut url = self
            .base
            .join(path)
            .map_err(|source| ProviderError::InvalidUrl {
                value: path.to_string(),
                source,
            })?;
        url.query_pairs_mut().append_pair(key, value);
        Ok(url)
    }

    async fn fetch<T>(&self, url: Url) -> Result<Option<T>, ProviderError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let label = url.to_string();
        let response =
            self.client
                .get(url)
                .send()
                .await
                .map_err(|source| ProviderError::Request {
                    url: label.clone(),
                    source,
                })?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ProviderError::Status {
                url: label,
                status: status.as_u16(),
            });
        }
        let body = response
            .json::<T>()
            .await
            .map_err(|source| ProviderError::Request { url: label, source })?;
        Ok(Some(body))
    }
}

#[async_trait]
impl SearchProvider for ApibayIndex {
    async fn search(&self, query: &str) -> TransferResult<Vec<SearchResult>> {
        let url = self.endpoint("q.php", "q", query)?;
        let listings: Vec<Listing> = self.fetch(url).await?.unwrap_or_default();
        let results: Vec<SearchResult> = listings
            .into_iter()
            .filter_map(Listing::into_result)
            .collect();
        debug!(query, count = results.len(), "index search answered");
        Ok(results)
    }
}

#[async_trait]
impl DescriptorLookup for ApibayIndex {
    async fn get_descriptor(&self, result: &SearchResult) -> TransferResult<Option<Descriptor>> {
        let Some(reference) = result.provider_ref.as_deref() else {
            return Ok(None);
        };
        let url = self.endpoint("t.php", "id", reference)?;
        let listing: Option<Listing> = self.fetch(url).await?;
        Ok(listing.and_then(|listing| listing.descriptor()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::MockServer;
    use httpmock::prelude::*;
    use serde_json::json;

    fn index(server: &MockServer) -> ApibayIndex {
        ApibayIndex::new(Client::new(), &server.base_url()).expect("index")
    }

    #[tokio::test]
    async fn search_maps_listings_and_builds_descriptors() -> TransferResult<()> {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET).path("/q.php").query_param("q", "Inception");
            then.status(200).json_body(json!([
                {
                    "id": "101",
                    "name": "Inception.1080p.BluRay",
                    "info_hash": "ABCDEF0123456789ABCDEF0123456789ABCDEF01",
                    "seeders": "12",
                    "size": "2048"
                },
                {
                    "id": 102,
                    "name": "Inception cam",
                    "info_hash": "1111111111111111111111111111111111111111",
                    "seeders": 0,
                    "size": 0
                }
            ]));
        });

        let results = index(&server).search("Inception").await?;
        mock.assert();
        assert_eq!(results.len(), 2);
        let first = &results[0];
        assert_eq!(first.id, "101");
        assert_eq!(first.seed_count, 12);
        assert_eq!(first.size, Some(2048));
        assert_eq!(first.provider_ref.as_deref(), Some("101"));
        let descriptor = Descriptor::parse(first.descriptor.as_deref().expect("descriptor"))?;
        assert_eq!(descriptor.key(), "abcdef0123456789abcdef0123456789abcdef01");
        assert_eq!(
            descriptor.display_name().as_deref(),
            Some("Inception.1080p.BluRay")
        );
        assert_eq!(results[1].id, "102");
        assert_eq!(results[1].size, None);
        Ok(())
    }

    #[tokio::test]
    async fn placeholder_listing_means_no_results() -> TransferResult<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/q.php");
            then.status(200).json_body(json!([
                {
                    "id": "0",
                    "name": "No results returned",
                    "info_hash": EMPTY_INFO_HASH,
                    "seeders": "0",
                    "size": "0"
                }
            ]));
        });
        assert!(index(&server).search("zzz").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn server_error_maps_to_search_error() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/q.php");
            then.status(503);
        });
        let err = index(&server).search("x").await.expect_err("503");
        assert!(matches!(
            err,
            TransferError::Search {
                provider: PROVIDER_NAME,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn lookup_fetches_listing_by_reference() -> TransferResult<()> {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET).path("/t.php").query_param("id", "55");
            then.status(200).json_body(json!({
                "id": 55,
                "name": "Heat 1995 720p",
                "info_hash": "2222222222222222222222222222222222222222"
            }));
        });
        let record = SearchResult {
            id: "55".into(),
            title: "Heat 1995 720p".into(),
            size: None,
            seed_count: 3,
            descriptor: None,
            provider: PROVIDER_NAME.into(),
            provider_ref: Some("55".into()),
        };
        let descriptor = index(&server).get_descriptor(&record).await?;
        mock.assert();
        assert_eq!(
            descriptor.map(|d| d.key().to_string()).as_deref(),
            Some("2222222222222222222222222222222222222222")
        );
        Ok(())
    }

    #[tokio::test]
    async fn lookup_without_reference_or_listing_is_none() -> TransferResult<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/t.php");
            then.status(404);
        });
        let mut record = SearchResult {
            id: "9".into(),
            title: "Gone".into(),
            size: None,
            seed_count: 1,
            descriptor: None,
            provider: PROVIDER_NAME.into(),
            provider_ref: None,
        };
        let index = index(&server);
        assert!(index.get_descriptor(&record).await?.is_none());
        record.provider_ref = Some("9".into());
        assert!(index.get_descriptor(&record).await?.is_none());
        Ok(())
    }

    #[test]
    fn base_url_gains_trailing_slash() {
        let index = ApibayIndex::new(Client::new(), "http://index.local/api").expect("index");
        assert_eq!(index.base().as_str(), "http://index.local/api/");
        assert!(ApibayIndex::new(Client::new(), "not a url").is_err());
    }
}
