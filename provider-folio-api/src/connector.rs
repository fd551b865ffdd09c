//! Folio API connector implementation
//!
//! Implements the `RemoteApi` trait over any `HttpClient`.

use async_trait::async_trait;
use bridge_traits::error::Result;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bridge_traits::remote::{
    paths, BookId, ChapterId, ReadingRecordUpsert, RemoteApi, RemoteBook, RemoteChapter,
};
use bridge_traits::storage::{SecureStore, BEARER_TOKEN_KEY};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::FolioApiError;
use crate::types::{ApiBody, ApiErrorBody, FavoriteRequest, ShelfAddRequest};

/// Default per-request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Folio API connector
///
/// # Features
///
/// - JSON bodies, with or without a `{"data": ...}` envelope
/// - Bearer token read from the `SecureStore` on every request, so a token
///   cleared after a 401 is never sent again
/// - No retries: connectivity failures surface immediately so the caller can
///   fall back to the cache or the sync queue
///
/// # Example
///
/// ```ignore
/// use provider_folio_api::FolioApiConnector;
/// use bridge_traits::remote::RemoteApi;
///
/// let connector = FolioApiConnector::new(http_client, secure_store, "https://api.folio.example")?;
/// let book = connector.get_book(42).await?;
/// ```
pub struct FolioApiConnector {
    http_client: Arc<dyn HttpClient>,
    secure_store: Arc<dyn SecureStore>,
    base_url: String,
    timeout: Duration,
}

impl FolioApiConnector {
    /// Create a new connector
    ///
    /// # Arguments
    ///
    /// * `http_client` - HTTP client implementation
    /// * `secure_store` - Where the bearer token lives
    /// * `base_url` - API root, e.g. `https://api.folio.example/api`
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        secure_store: Arc<dyn SecureStore>,
        base_url: impl Into<String>,
    ) -> crate::Result<Self> {
        let base_url = base_url.into();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(FolioApiError::InvalidBaseUrl(base_url));
        }

        Ok(Self {
            http_client,
            secure_store,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Build a request with auth and accept headers
    async fn request(&self, method: HttpMethod, path: &str) -> crate::Result<HttpRequest> {
        let mut request = HttpRequest::new(method, self.url(path))
            .header("Accept", "application/json")
            .timeout(self.timeout);

        if let Some(token) = self.secure_store.get_secret(BEARER_TOKEN_KEY).await? {
            let token = String::from_utf8(token)
                .map_err(|e| FolioApiError::ParseError(format!("Stored token: {}", e)))?;
            request = request.bearer_token(token);
        } else {
            debug!("No bearer token stored; sending unauthenticated request");
        }

        Ok(request)
    }

    /// Execute and classify the response
    #[instrument(skip(self, request), fields(method = ?request.method, url = %request.url))]
    async fn send(&self, request: HttpRequest) -> crate::Result<HttpResponse> {
        let response = self.http_client.execute(request).await?;

        if response.is_success() {
            debug!(status = response.status, "API request succeeded");
            return Ok(response);
        }

        let message = response
            .json::<ApiErrorBody>()
            .map(|body| body.message)
            .unwrap_or_else(|_| String::from_utf8_lossy(&response.body).to_string());
        warn!(status = response.status, "API request failed");

        Err(FolioApiError::ApiError {
            status_code: response.status,
            message,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> crate::Result<T> {
        let request = self.request(HttpMethod::Get, path).await?;
        let response = self.send(request).await?;
        let body: ApiBody<T> = serde_json::from_slice(&response.body)
            .map_err(|e| FolioApiError::ParseError(e.to_string()))?;
        Ok(body.into_inner())
    }

    async fn send_json<B: Serialize>(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&B>,
    ) -> crate::Result<()> {
        let mut request = self.request(method, path).await?;
        if let Some(body) = body {
            request = request.json(body)?;
        }
        self.send(request).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteApi for FolioApiConnector {
    #[instrument(skip(self))]
    async fn get_book(&self, book_id: BookId) -> Result<RemoteBook> {
        Ok(self.get_json(&paths::book(book_id)).await?)
    }

    #[instrument(skip(self))]
    async fn get_book_chapters(&self, book_id: BookId) -> Result<Vec<RemoteChapter>> {
        let mut chapters: Vec<RemoteChapter> =
            self.get_json(&paths::book_chapters(book_id)).await?;
        chapters.sort_by_key(|c| c.chapter_number);
        info!(count = chapters.len(), "Retrieved chapter list");
        Ok(chapters)
    }

    #[instrument(skip(self))]
    async fn get_chapter(&self, chapter_id: ChapterId) -> Result<RemoteChapter> {
        Ok(self.get_json(&paths::chapter(chapter_id)).await?)
    }

    #[instrument(skip(self, record), fields(book_id = record.book_id, chapter_id = record.chapter_id))]
    async fn upsert_reading_record(&self, record: &ReadingRecordUpsert) -> Result<()> {
        Ok(self
            .send_json(HttpMethod::Post, &paths::reading_records(), Some(record))
            .await?)
    }

    #[instrument(skip(self))]
    async fn add_to_shelf(&self, book_id: BookId) -> Result<()> {
        let body = ShelfAddRequest { book_id };
        match self
            .send_json(HttpMethod::Post, &paths::bookshelf(), Some(&body))
            .await
        {
            // Already on the shelf is the desired end state
            Err(FolioApiError::ApiError {
                status_code: 409, ..
            }) => Ok(()),
            other => Ok(other?),
        }
    }

    #[instrument(skip(self))]
    async fn remove_from_shelf(&self, book_id: BookId) -> Result<()> {
        match self
            .send_json::<()>(HttpMethod::Delete, &paths::bookshelf_entry(book_id), None)
            .await
        {
            // Already gone is the desired end state
            Err(FolioApiError::ApiError {
                status_code: 404, ..
            }) => Ok(()),
            other => Ok(other?),
        }
    }

    #[instrument(skip(self))]
    async fn set_favorite(&self, book_id: BookId, favorite: bool) -> Result<()> {
        let body = FavoriteRequest {
            is_favorite: favorite,
        };
        Ok(self
            .send_json(
                HttpMethod::Patch,
                &paths::bookshelf_favorite(book_id),
                Some(&body),
            )
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_desktop::InMemorySecureStore;
    use bridge_traits::error::BridgeError;
    use bytes::Bytes;
    use mockall::mock;
    use std::collections::HashMap;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
        }
    }

    const BASE: &str = "https://api.folio.test/api";

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: HashMap::new(),
            body: Bytes::from(body.to_string()),
        }
    }

    async fn store_with_token() -> Arc<InMemorySecureStore> {
        let store = Arc::new(InMemorySecureStore::new());
        store
            .set_secret(BEARER_TOKEN_KEY, b"test_token")
            .await
            .unwrap();
        store
    }

    fn connector(mock: MockHttpClient, store: Arc<InMemorySecureStore>) -> FolioApiConnector {
        FolioApiConnector::new(Arc::new(mock), store, format!("{}/", BASE)).unwrap()
    }

    #[test]
    fn test_rejects_relative_base_url() {
        let result = FolioApiConnector::new(
            Arc::new(MockHttpClient::new()),
            Arc::new(InMemorySecureStore::new()),
            "api.folio.test",
        );
        assert!(matches!(result, Err(FolioApiError::InvalidBaseUrl(_))));
    }

    #[tokio::test]
    async fn test_get_book_sends_bearer_token() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().times(1).returning(|req| {
            assert_eq!(req.method, HttpMethod::Get);
            assert_eq!(req.url, "https://api.folio.test/api/books/42");
            assert_eq!(
                req.headers.get("Authorization"),
                Some(&"Bearer test_token".to_string())
            );
            Ok(response(
                200,
                r#"{"data":{"id":42,"title":"Dune","author":"Frank Herbert","wordCount":180000,"chapterCount":48}}"#,
            ))
        });

        let connector = connector(mock_http, store_with_token().await);
        let book = connector.get_book(42).await.unwrap();

        assert_eq!(book.id, 42);
        assert_eq!(book.chapter_count, 48);
    }

    #[tokio::test]
    async fn test_get_book_chapters_sorted_by_number() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().times(1).returning(|_| {
            Ok(response(
                200,
                r#"[
                    {"id":12,"bookId":42,"chapterNumber":2,"title":"Two"},
                    {"id":11,"bookId":42,"chapterNumber":1,"title":"One"}
                ]"#,
            ))
        });

        let connector = connector(mock_http, store_with_token().await);
        let chapters = connector.get_book_chapters(42).await.unwrap();

        let numbers: Vec<u32> = chapters.iter().map(|c| c.chapter_number).collect();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_upsert_reading_record_body() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().times(1).returning(|req| {
            assert_eq!(req.method, HttpMethod::Post);
            assert!(req.url.ends_with("/reading-records"));
            let body: serde_json::Value =
                serde_json::from_slice(req.body.as_ref().unwrap()).unwrap();
            assert_eq!(body["bookId"], 42);
            assert_eq!(body["chapterId"], 3);
            assert_eq!(body["progressPercentage"], 55.0);
            Ok(response(200, "{}"))
        });

        let connector = connector(mock_http, store_with_token().await);
        connector
            .upsert_reading_record(&ReadingRecordUpsert {
                book_id: 42,
                chapter_id: 3,
                progress_percentage: 55.0,
                reading_position: 0.0,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_shelf_writes_converge() {
        let mut mock_http = MockHttpClient::new();
        let mut seq = mockall::Sequence::new();
        mock_http
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(response(409, r#"{"message":"Already on shelf"}"#)));
        mock_http
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|req| {
                assert_eq!(req.method, HttpMethod::Delete);
                Ok(response(404, r#"{"message":"Not on shelf"}"#))
            });

        let connector = connector(mock_http, store_with_token().await);
        connector.add_to_shelf(42).await.unwrap();
        connector.remove_from_shelf(42).await.unwrap();
    }

    #[tokio::test]
    async fn test_set_favorite_sends_target_value() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().times(1).returning(|req| {
            assert_eq!(req.method, HttpMethod::Patch);
            assert!(req.url.ends_with("/bookshelf/42/favorite"));
            let body: serde_json::Value =
                serde_json::from_slice(req.body.as_ref().unwrap()).unwrap();
            assert_eq!(body["isFavorite"], false);
            Ok(response(204, ""))
        });

        let connector = connector(mock_http, store_with_token().await);
        connector.set_favorite(42, false).await.unwrap();
    }

    #[tokio::test]
    async fn test_unauthorized_is_distinct() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(1)
            .returning(|_| Ok(response(401, r#"{"message":"Token expired"}"#)));

        let connector = connector(mock_http, store_with_token().await);
        let err = connector.get_chapter(3).await.unwrap_err();

        assert_eq!(err, BridgeError::Unauthorized("Token expired".to_string()));
    }

    #[tokio::test]
    async fn test_transport_failure_passes_through() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(1)
            .returning(|_| Err(BridgeError::Connectivity("connection refused".into())));

        let connector = connector(mock_http, store_with_token().await);
        let err = connector.get_book(42).await.unwrap_err();

        assert!(err.is_connectivity());
    }

    #[tokio::test]
    async fn test_missing_token_sends_no_header() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().times(1).returning(|req| {
            assert!(!req.headers.contains_key("Authorization"));
            Ok(response(200, r#"{"id":3,"bookId":42,"chapterNumber":3,"title":"Three","content":"..."}"#))
        });

        let connector = connector(mock_http, Arc::new(InMemorySecureStore::new()));
        let chapter = connector.get_chapter(3).await.unwrap();
        assert_eq!(chapter.book_id, 42);
    }
}
