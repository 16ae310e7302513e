//! Collection Fetcher
//!
//! Best-effort retrieval on top of a [`MetadataProvider`]: pagination stops early
//! on failure and batch lookups degrade to per-token requests. Neither operation
//! fails; what went wrong is reported alongside whatever was collected.

use super::alchemy::{MetadataProvider, MAX_BATCH_SIZE, MAX_PAGE_SIZE};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftErrorKind {
    /// The HTTP call itself failed or returned a non-success status.
    Transport,
    /// The provider answered with an explicit error marker.
    Provider,
    /// The response carried no `nfts` payload.
    MissingPayload,
    /// The provider handed back the cursor that was just requested.
    RepeatedCursor,
    /// A single-token fallback request failed.
    TokenFetch,
}

/// A failure that degraded a fetch without aborting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftError {
    pub kind: SoftErrorKind,
    pub message: String,
    pub token_id: Option<String>,
}

impl SoftError {
    pub fn new(kind: SoftErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            token_id: None,
        }
    }

    pub fn for_token(kind: SoftErrorKind, token_id: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            token_id: Some(token_id.to_string()),
        }
    }
}

impl fmt::Display for SoftError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.token_id {
            Some(id) => write!(f, "{:?} (token {}): {}", self.kind, id, self.message),
            None => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

/// Accumulated data plus the soft errors encountered while collecting it.
#[derive(Debug, Clone, Default)]
pub struct Partial<T> {
    pub items: T,
    pub soft_errors: Vec<SoftError>,
}

impl<T> Partial<T> {
    pub fn complete(items: T) -> Self {
        Self {
            items,
            soft_errors: Vec::new(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        !self.soft_errors.is_empty()
    }
}

impl Partial<Vec<Value>> {
    fn merge(&mut self, other: Partial<Vec<Value>>) {
        self.items.extend(other.items);
        self.soft_errors.extend(other.soft_errors);
    }
}

#[derive(Clone)]
pub struct CollectionFetcher {
    provider: Arc<dyn MetadataProvider>,
}

impl CollectionFetcher {
    pub fn new(provider: Arc<dyn MetadataProvider>) -> Self {
        Self { provider }
    }

    /// Pages through a whole collection, sequentially, from the first page.
    pub async fn fetch_full_collection(&self, contract: &str) -> Partial<Vec<Value>> {
        let mut out: Partial<Vec<Value>> = Partial::default();
        let mut cursor: Option<String> = None;

        loop {
            let page = match self
                .provider
                .collection_page(contract, cursor.as_deref(), MAX_PAGE_SIZE)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    warn!(contract, fetched = out.items.len(), error = %format!("{e:#}"), "collection page request failed; keeping partial result");
                    out.soft_errors
                        .push(SoftError::new(SoftErrorKind::Transport, format!("{e:#}")));
                    break;
                }
            };

            if let Some(err) = page.error {
                warn!(contract, fetched = out.items.len(), error = %err, "provider error during pagination");
                out.soft_errors
                    .push(SoftError::new(SoftErrorKind::Provider, err));
                break;
            }

            let Some(nfts) = page.nfts else {
                warn!(contract, "collection page carried no nfts payload");
                out.soft_errors.push(SoftError::new(
                    SoftErrorKind::MissingPayload,
                    "collection page carried no nfts payload",
                ));
                break;
            };

            let batch_size = nfts.len();
            out.items.extend(nfts);
            debug!(contract, batch_size, total = out.items.len(), "fetched collection page");

            // A short page is the end regardless of any cursor the provider also sent.
            if batch_size < MAX_PAGE_SIZE {
                debug!(contract, batch_size, "short page, reached end of collection");
                break;
            }

            match page.next_token {
                Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                    warn!(contract, cursor = %next, "provider repeated the requested cursor");
                    out.soft_errors.push(SoftError::new(
                        SoftErrorKind::RepeatedCursor,
                        format!("cursor {} repeated", next),
                    ));
                    break;
                }
                Some(next) => cursor = Some(next),
                None => {
                    warn!(
                        contract,
                        total = out.items.len(),
                        "full page without a continuation cursor; collection may be truncated"
                    );
                    break;
                }
            }
        }

        info!(
            contract,
            total = out.items.len(),
            soft_errors = out.soft_errors.len(),
            "collection fetch finished"
        );
        out
    }

    /// Metadata for one pre-chunked batch of at most [`MAX_BATCH_SIZE`] tokens.
    ///
    /// If the batch call fails, every token is requested on its own, in order,
    /// and only the ones that succeed are returned.
    pub async fn fetch_metadata_batch(&self, contract: &str, token_ids: &[String]) -> Partial<Vec<Value>> {
        debug_assert!(token_ids.len() <= MAX_BATCH_SIZE);
        if token_ids.is_empty() {
            return Partial::default();
        }

        let failure = match self.provider.metadata_batch(contract, token_ids).await {
            Ok(batch) => match (batch.error, batch.nfts) {
                (Some(err), _) => SoftError::new(SoftErrorKind::Provider, err),
                (None, Some(nfts)) => return Partial::complete(nfts),
                (None, None) => SoftError::new(
                    SoftErrorKind::MissingPayload,
                    "batch response carried no nfts payload",
                ),
            },
            Err(e) => SoftError::new(SoftErrorKind::Transport, format!("{e:#}")),
        };

        warn!(
            contract,
            batch_size = token_ids.len(),
            first_tokens = ?&token_ids[..token_ids.len().min(5)],
            error = %failure,
            "batch metadata request failed; fetching tokens individually"
        );

        let mut out = Partial {
            items: Vec::with_capacity(token_ids.len()),
            soft_errors: vec![failure],
        };
        for token_id in token_ids {
            match self.provider.token_metadata(contract, token_id).await {
                Ok(record) => out.items.push(record),
                Err(e) => {
                    warn!(contract, token_id = %token_id, error = %format!("{e:#}"), "failed to fetch token");
                    out.soft_errors.push(SoftError::for_token(
                        SoftErrorKind::TokenFetch,
                        token_id,
                        format!("{e:#}"),
                    ));
                }
            }
        }
        out
    }

    /// Chunks `token_ids` into provider-sized batches and fetches them one after another.
    pub async fn fetch_metadata(&self, contract: &str, token_ids: &[String]) -> Partial<Vec<Value>> {
        let mut out: Partial<Vec<Value>> = Partial::default();
        for (index, chunk) in token_ids.chunks(MAX_BATCH_SIZE).enumerate() {
            let batch = self.fetch_metadata_batch(contract, chunk).await;
            debug!(
                contract,
                batch = index + 1,
                requested = chunk.len(),
                received = batch.items.len(),
                "fetched metadata batch"
            );
            out.merge(batch);
        }
        out
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::scrapers::alchemy::{CollectionPage, MetadataBatch};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};

    /// Scripted in-memory provider.
    #[derive(Default)]
    pub(crate) struct FakeProvider {
        pub pages: Mutex<Vec<Result<CollectionPage>>>,
        pub page_requests: Mutex<Vec<Option<String>>>,
        pub batch_fails: bool,
        /// Error marker returned in an otherwise successful batch response.
        pub batch_error: Option<String>,
        /// Batch responses omit the `nfts` key.
        pub batch_without_payload: bool,
        pub batch_calls: Mutex<Vec<Vec<String>>>,
        pub tokens: HashMap<String, Value>,
        pub broken_tokens: HashSet<String>,
    }

    impl FakeProvider {
        pub(crate) fn with_pages(pages: Vec<Result<CollectionPage>>) -> Self {
            Self {
                pages: Mutex::new(pages),
                ..Default::default()
            }
        }

        pub(crate) fn page_request_count(&self) -> usize {
            self.page_requests.lock().len()
        }
    }

    #[async_trait]
    impl MetadataProvider for FakeProvider {
        async fn collection_page(
            &self,
            _contract: &str,
            start_token: Option<&str>,
            _limit: usize,
        ) -> Result<CollectionPage> {
            self.page_requests.lock().push(start_token.map(str::to_string));
            let mut pages = self.pages.lock();
            if pages.is_empty() {
                return Err(anyhow!("no more scripted pages"));
            }
            pages.remove(0)
        }

        async fn metadata_batch(&self, _contract: &str, token_ids: &[String]) -> Result<MetadataBatch> {
            self.batch_calls.lock().push(token_ids.to_vec());
            if self.batch_fails {
                return Err(anyhow!("POST /getNFTMetadataBatch 500 Internal Server Error: boom"));
            }
            if self.batch_error.is_some() || self.batch_without_payload {
                return Ok(MetadataBatch {
                    nfts: None,
                    error: self.batch_error.clone(),
                });
            }
            Ok(MetadataBatch {
                nfts: Some(
                    token_ids
                        .iter()
                        .filter_map(|id| self.tokens.get(id).cloned())
                        .collect(),
                ),
                error: None,
            })
        }

        async fn token_metadata(&self, _contract: &str, token_id: &str) -> Result<Value> {
            if self.broken_tokens.contains(token_id) {
                return Err(anyhow!("GET /getNFTMetadata 404 Not Found"));
            }
            self.tokens
                .get(token_id)
                .cloned()
                .ok_or_else(|| anyhow!("unknown token {}", token_id))
        }
    }

    pub(crate) fn page(start: usize, len: usize, next: Option<&str>) -> Result<CollectionPage> {
        Ok(CollectionPage {
            nfts: Some((start..start + len).map(|i| json!({ "tokenId": i.to_string() })).collect()),
            next_token: next.map(str::to_string),
            error: None,
        })
    }

    fn fetcher(provider: FakeProvider) -> (CollectionFetcher, Arc<FakeProvider>) {
        let provider = Arc::new(provider);
        (CollectionFetcher::new(provider.clone()), provider)
    }

    #[tokio::test]
    async fn pagination_stops_after_short_page() {
        let (fetcher, provider) = fetcher(FakeProvider::with_pages(vec![
            page(0, 100, Some("p2")),
            page(100, 100, Some("p3")),
            page(200, 37, Some("p4")),
            page(237, 100, None),
        ]));

        let result = fetcher.fetch_full_collection("0xsouls").await;

        assert_eq!(result.items.len(), 237);
        assert!(!result.is_degraded());
        assert_eq!(
            *provider.page_requests.lock(),
            vec![None, Some("p2".to_string()), Some("p3".to_string())]
        );
    }

    #[tokio::test]
    async fn pagination_stops_without_cursor() {
        let (fetcher, provider) = fetcher(FakeProvider::with_pages(vec![
            page(0, 100, None),
            page(100, 100, None),
        ]));

        let result = fetcher.fetch_full_collection("0xsouls").await;

        assert_eq!(result.items.len(), 100);
        assert_eq!(provider.page_request_count(), 1);
    }

    #[tokio::test]
    async fn transport_failure_keeps_partial_result() {
        let (fetcher, _) = fetcher(FakeProvider::with_pages(vec![
            page(0, 100, Some("p2")),
            Err(anyhow!("connection reset")),
        ]));

        let result = fetcher.fetch_full_collection("0xsouls").await;

        assert_eq!(result.items.len(), 100);
        assert_eq!(result.soft_errors.len(), 1);
        assert_eq!(result.soft_errors[0].kind, SoftErrorKind::Transport);
    }

    #[tokio::test]
    async fn provider_error_marker_ends_pagination() {
        let (fetcher, provider) = fetcher(FakeProvider::with_pages(vec![
            page(0, 100, Some("p2")),
            Ok(CollectionPage {
                nfts: Some(vec![json!({ "tokenId": "x" })]),
                next_token: Some("p3".into()),
                error: Some("quota exceeded".into()),
            }),
            page(100, 100, Some("p4")),
        ]));

        let result = fetcher.fetch_full_collection("0xsouls").await;

        assert_eq!(result.items.len(), 100);
        assert_eq!(result.soft_errors[0].kind, SoftErrorKind::Provider);
        assert_eq!(provider.page_request_count(), 2);
    }

    #[tokio::test]
    async fn repeated_cursor_ends_pagination() {
        let (fetcher, provider) = fetcher(FakeProvider::with_pages(vec![
            page(0, 100, Some("same")),
            page(100, 100, Some("same")),
            page(200, 100, Some("same")),
        ]));

        let result = fetcher.fetch_full_collection("0xsouls").await;

        assert_eq!(result.items.len(), 200);
        assert_eq!(result.soft_errors[0].kind, SoftErrorKind::RepeatedCursor);
        assert_eq!(provider.page_request_count(), 2);
    }

    #[tokio::test]
    async fn missing_payload_ends_pagination() {
        let (fetcher, _) = fetcher(FakeProvider::with_pages(vec![Ok(CollectionPage::default())]));

        let result = fetcher.fetch_full_collection("0xsouls").await;

        assert!(result.items.is_empty());
        assert_eq!(result.soft_errors[0].kind, SoftErrorKind::MissingPayload);
    }

    fn token_provider(ids: &[&str]) -> FakeProvider {
        FakeProvider {
            tokens: ids
                .iter()
                .map(|id| (id.to_string(), json!({ "tokenId": id })))
                .collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn batch_success_returns_records() {
        let (fetcher, provider) = fetcher(token_provider(&["1", "2"]));
        let ids = vec!["1".to_string(), "2".to_string()];

        let result = fetcher.fetch_metadata_batch("0xwizards", &ids).await;

        assert_eq!(result.items.len(), 2);
        assert!(!result.is_degraded());
        assert_eq!(provider.batch_calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn failed_batch_falls_back_to_individual_fetches() {
        let mut provider = token_provider(&["1", "2", "3"]);
        provider.batch_fails = true;
        provider.broken_tokens.insert("2".to_string());
        let (fetcher, _) = fetcher(provider);
        let ids: Vec<String> = ["1", "2", "3"].iter().map(|s| s.to_string()).collect();

        let result = fetcher.fetch_metadata_batch("0xwizards", &ids).await;

        let got: HashSet<&str> = result
            .items
            .iter()
            .filter_map(|r| r["tokenId"].as_str())
            .collect();
        assert_eq!(got, HashSet::from(["1", "3"]));
        assert_eq!(result.soft_errors.len(), 2);
        assert_eq!(result.soft_errors[0].kind, SoftErrorKind::Transport);
        assert_eq!(result.soft_errors[1].token_id.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn provider_error_in_batch_falls_back_to_individual_fetches() {
        let mut provider = token_provider(&["4", "5"]);
        provider.batch_error = Some("Too many tokens".to_string());
        let (fetcher, provider) = fetcher(provider);
        let ids = vec!["4".to_string(), "5".to_string()];

        let result = fetcher.fetch_metadata_batch("0xwizards", &ids).await;

        assert_eq!(provider.batch_calls.lock().len(), 1);
        assert_eq!(result.items.len(), 2);
        assert_eq!(result.soft_errors.len(), 1);
        assert_eq!(result.soft_errors[0].kind, SoftErrorKind::Provider);
        assert_eq!(result.soft_errors[0].message, "Too many tokens");
    }

    #[tokio::test]
    async fn batch_without_payload_falls_back_to_individual_fetches() {
        let mut provider = token_provider(&["4", "5"]);
        provider.batch_without_payload = true;
        provider.broken_tokens.insert("5".to_string());
        let (fetcher, _) = fetcher(provider);
        let ids = vec!["4".to_string(), "5".to_string()];

        let result = fetcher.fetch_metadata_batch("0xwizards", &ids).await;

        assert_eq!(result.items, vec![json!({ "tokenId": "4" })]);
        let kinds: Vec<SoftErrorKind> = result.soft_errors.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![SoftErrorKind::MissingPayload, SoftErrorKind::TokenFetch]);
    }

    #[tokio::test]
    async fn metadata_is_chunked_into_provider_batches() {
        let ids: Vec<String> = (0..120).map(|i| i.to_string()).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let (fetcher, provider) = fetcher(token_provider(&refs));

        let result = fetcher.fetch_metadata("0xwizards", &ids).await;

        assert_eq!(result.items.len(), 120);
        let sizes: Vec<usize> = provider.batch_calls.lock().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![50, 50, 20]);
    }

    #[tokio::test]
    async fn empty_token_list_makes_no_calls() {
        let (fetcher, provider) = fetcher(token_provider(&[]));

        let result = fetcher.fetch_metadata("0xwizards", &[]).await;

        assert!(result.items.is_empty());
        assert!(provider.batch_calls.lock().is_empty());
    }
}
