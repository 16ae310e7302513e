//! Alchemy NFT REST API Client
//!
//! Thin transport over the three NFT endpoints the aggregation pass needs.
//! Records are returned as raw JSON; shaping them is the extractor's job.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://eth-mainnet.g.alchemy.com/nft/v3";

/// Largest page the collection listing will return.
pub const MAX_PAGE_SIZE: usize = 100;

/// Largest token list accepted by the batch metadata endpoint.
pub const MAX_BATCH_SIZE: usize = 50;

/// Keys the listing has used for its continuation cursor.
const CURSOR_KEYS: [&str; 4] = ["nextToken", "pageKey", "next_token", "continuation"];

/// One page of `getNFTsForCollection`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionPage {
    /// `None` when the response carried no `nfts` key at all.
    pub nfts: Option<Vec<Value>>,
    pub next_token: Option<String>,
    /// Provider-level error marker.
    pub error: Option<String>,
}

impl CollectionPage {
    pub fn from_json(body: Value) -> Self {
        let next_token = CURSOR_KEYS
            .iter()
            .filter_map(|key| body.get(*key))
            .find_map(cursor_string);
        let error = provider_error(&body);
        Self {
            nfts: take_nfts(body),
            next_token,
            error,
        }
    }
}

/// Response of `getNFTMetadataBatch`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataBatch {
    pub nfts: Option<Vec<Value>>,
    pub error: Option<String>,
}

impl MetadataBatch {
    pub fn from_json(body: Value) -> Self {
        let error = provider_error(&body);
        Self {
            nfts: take_nfts(body),
            error,
        }
    }
}

/// Upstream metadata provider. Implemented over HTTP by [`AlchemyClient`].
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// One page of a collection listing with metadata.
    async fn collection_page(
        &self,
        contract: &str,
        start_token: Option<&str>,
        limit: usize,
    ) -> Result<CollectionPage>;

    /// Metadata for an explicit token list (at most [`MAX_BATCH_SIZE`]).
    async fn metadata_batch(&self, contract: &str, token_ids: &[String]) -> Result<MetadataBatch>;

    /// Metadata for one token. Provider error markers are reported as `Err`.
    async fn token_metadata(&self, contract: &str, token_id: &str) -> Result<Value>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchToken<'a> {
    contract_address: &'a str,
    token_id: &'a str,
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    tokens: Vec<BatchToken<'a>>,
}

#[derive(Clone)]
pub struct AlchemyClient {
    client: Client,
    base_url: String,
}

impl AlchemyClient {
    /// The API key is embedded as the last path segment of every request URL.
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            bail!("Alchemy API key is empty");
        }

        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .context("Failed to build AlchemyClient")?;

        Ok(Self {
            client,
            base_url: format!("{}/{}", base_url.trim_end_matches('/'), api_key),
        })
    }

    #[inline]
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Reads a JSON body, turning non-2xx statuses into errors. Errors never carry the URL
    /// since it contains the API key.
    async fn read_json(resp: reqwest::Response, what: &str) -> Result<Value> {
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("{} {}: {}", what, status, text));
        }

        resp.json::<Value>()
            .await
            .map_err(|e| e.without_url())
            .with_context(|| format!("Failed to parse {} response", what))
    }
}

#[async_trait]
impl MetadataProvider for AlchemyClient {
    async fn collection_page(
        &self,
        contract: &str,
        start_token: Option<&str>,
        limit: usize,
    ) -> Result<CollectionPage> {
        let url = self.url("/getNFTsForCollection");
        let mut qp: Vec<(&str, String)> = Vec::with_capacity(4);
        qp.push(("contractAddress", contract.to_string()));
        qp.push(("withMetadata", "true".to_string()));
        qp.push(("limit", limit.to_string()));
        if let Some(token) = start_token {
            qp.push(("startToken", token.to_string()));
        }

        let resp = self
            .client
            .get(url)
            .query(&qp)
            .send()
            .await
            .map_err(|e| e.without_url())
            .context("GET /getNFTsForCollection failed")?;

        let body = Self::read_json(resp, "GET /getNFTsForCollection").await?;
        let page = CollectionPage::from_json(body);
        debug!(
            contract,
            start_token,
            count = page.nfts.as_ref().map(Vec::len),
            next_token = page.next_token.as_deref(),
            "collection page received"
        );
        Ok(page)
    }

    async fn metadata_batch(&self, contract: &str, token_ids: &[String]) -> Result<MetadataBatch> {
        let url = self.url("/getNFTMetadataBatch");
        let payload = BatchRequest {
            tokens: token_ids
                .iter()
                .map(|token_id| BatchToken {
                    contract_address: contract,
                    token_id,
                })
                .collect(),
        };

        let resp = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| e.without_url())
            .context("POST /getNFTMetadataBatch failed")?;

        let body = Self::read_json(resp, "POST /getNFTMetadataBatch").await?;
        Ok(MetadataBatch::from_json(body))
    }

    async fn token_metadata(&self, contract: &str, token_id: &str) -> Result<Value> {
        let url = self.url("/getNFTMetadata");
        let qp = [("contractAddress", contract), ("tokenId", token_id)];

        let resp = self
            .client
            .get(url)
            .query(&qp)
            .send()
            .await
            .map_err(|e| e.without_url())
            .context("GET /getNFTMetadata failed")?;

        let body = Self::read_json(resp, "GET /getNFTMetadata").await?;
        if let Some(err) = provider_error(&body) {
            bail!("GET /getNFTMetadata tokenId={}: provider error: {}", token_id, err);
        }
        Ok(body)
    }
}

fn take_nfts(body: Value) -> Option<Vec<Value>> {
    match body {
        Value::Object(mut map) => match map.remove("nfts") {
            Some(Value::Array(nfts)) => Some(nfts),
            Some(Value::Null) | None => None,
            Some(_) => Some(Vec::new()),
        },
        _ => None,
    }
}

fn provider_error(body: &Value) -> Option<String> {
    match body.get("error")? {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn cursor_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client_for(server: &MockServer) -> AlchemyClient {
        AlchemyClient::new(&server.base_url(), "test-key", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn page_cursor_aliases() {
        let page = CollectionPage::from_json(json!({ "nfts": [], "pageKey": "abc" }));
        assert_eq!(page.next_token.as_deref(), Some("abc"));

        let page = CollectionPage::from_json(json!({ "nfts": [], "nextToken": "  ", "continuation": "c2" }));
        assert_eq!(page.next_token.as_deref(), Some("c2"));

        let page = CollectionPage::from_json(json!({ "nfts": [{}] }));
        assert_eq!(page.next_token, None);
        assert_eq!(page.nfts.map(|n| n.len()), Some(1));
    }

    #[test]
    fn page_error_marker_and_missing_payload() {
        let page = CollectionPage::from_json(json!({ "error": "rate limited" }));
        assert_eq!(page.error.as_deref(), Some("rate limited"));
        assert_eq!(page.nfts, None);

        let page = CollectionPage::from_json(json!({ "error": { "code": 429 }, "nfts": [] }));
        assert_eq!(page.error.as_deref(), Some(r#"{"code":429}"#));
    }

    #[test]
    fn empty_api_key_is_rejected() {
        assert!(AlchemyClient::new(DEFAULT_BASE_URL, "  ", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn collection_page_sends_cursor_and_limit() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/test-key/getNFTsForCollection")
                    .query_param("contractAddress", "0xabc")
                    .query_param("withMetadata", "true")
                    .query_param("limit", "100")
                    .query_param("startToken", "page-2");
                then.status(200)
                    .json_body(json!({ "nfts": [{ "tokenId": "1" }], "pageKey": "page-3" }));
            })
            .await;

        let page = client_for(&server)
            .collection_page("0xabc", Some("page-2"), MAX_PAGE_SIZE)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(page.nfts.unwrap().len(), 1);
        assert_eq!(page.next_token.as_deref(), Some("page-3"));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error_without_key() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/test-key/getNFTsForCollection");
                then.status(503).body("upstream down");
            })
            .await;

        let err = client_for(&server)
            .collection_page("0xabc", None, MAX_PAGE_SIZE)
            .await
            .unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("503"), "{msg}");
        assert!(!msg.contains("test-key"), "{msg}");
    }

    #[tokio::test]
    async fn batch_posts_token_list() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/test-key/getNFTMetadataBatch")
                    .json_body(json!({ "tokens": [
                        { "contractAddress": "0xdef", "tokenId": "1" },
                        { "contractAddress": "0xdef", "tokenId": "2" },
                    ]}));
                then.status(200)
                    .json_body(json!({ "nfts": [{ "tokenId": "1" }, { "tokenId": "2" }] }));
            })
            .await;

        let batch = client_for(&server)
            .metadata_batch("0xdef", &["1".to_string(), "2".to_string()])
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(batch.error, None);
        assert_eq!(batch.nfts.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn single_token_error_marker_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/test-key/getNFTMetadata")
                    .query_param("tokenId", "9");
                then.status(200).json_body(json!({ "error": "token not found" }));
            })
            .await;

        let result = client_for(&server).token_metadata("0xdef", "9").await;
        assert!(result.is_err());
    }
}
