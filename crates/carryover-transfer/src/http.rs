//! Bearer-authenticated HTTP client with a single refresh-and-retry.
//!
//! Every request goes out with the session's current access token. A 401
//! triggers exactly one credential refresh and one retry; a second 401 is
//! an [`AuthRefresh`](crate::error::TransferErrorCode::AuthRefresh) error.
//! A 413 is always a quota error and never retried. Streamed bodies are
//! rewound to their starting position before the retry.

use std::io::SeekFrom;
use std::sync::Arc;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};
use url::Url;

use crate::auth::CredentialStore;
use crate::error::{TransferError, TransferResult};

/// Chunk size used when streaming an upload body.
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// A readable, seekable upload source (a file, a blob store entry, a
/// buffer).
pub trait UploadSource: AsyncRead + AsyncSeek + Send + Sync + Unpin {}

impl<T> UploadSource for T where T: AsyncRead + AsyncSeek + Send + Sync + Unpin {}

struct SourceState {
    source: Box<dyn UploadSource>,
    /// Bumped on every rewind; body streams from an earlier attempt stop
    /// reading once it changes.
    generation: u64,
}

/// A streamed request body that can be replayed from its start.
///
/// The underlying source is closed when the last clone is dropped.
#[derive(Clone)]
pub struct UploadStream {
    state: Arc<Mutex<SourceState>>,
    start: u64,
}

impl UploadStream {
    /// Wraps `source`, remembering its current position as the replay
    /// point.
    pub async fn new(mut source: Box<dyn UploadSource>) -> TransferResult<Self> {
        let start = source.stream_position().await.map_err(|e| {
            TransferError::internal("failed to read upload stream position").with_source(e)
        })?;
        Ok(Self {
            state: Arc::new(Mutex::new(SourceState {
                source,
                generation: 0,
            })),
            start,
        })
    }

    /// Wraps an in-memory buffer.
    pub async fn from_bytes(data: Vec<u8>) -> TransferResult<Self> {
        Self::new(Box::new(std::io::Cursor::new(data))).await
    }

    /// Seeks back to the replay point.
    pub async fn rewind(&self) -> TransferResult<()> {
        let mut state = self.state.lock().await;
        state.generation += 1;
        state
            .source
            .seek(SeekFrom::Start(self.start))
            .await
            .map_err(|e| TransferError::internal("failed to rewind upload stream").with_source(e))?;
        trace!(position = self.start, "rewound upload stream");
        Ok(())
    }

    async fn body(&self) -> reqwest::Body {
        let generation = self.state.lock().await.generation;
        let state = self.state.clone();
        let chunks = futures_util::stream::unfold(Some(state), move |state| async move {
            let state = state?;
            let mut buf = vec![0u8; UPLOAD_CHUNK_SIZE];
            let read = {
                let mut guard = state.lock().await;
                if guard.generation != generation {
                    return None;
                }
                guard.source.read(&mut buf).await
            };
            match read {
                Ok(0) => None,
                Ok(n) => {
                    buf.truncate(n);
                    Some((Ok(buf), Some(state)))
                }
                Err(e) => Some((Err(e), None)),
            }
        });
        reqwest::Body::wrap_stream(chunks)
    }
}

impl std::fmt::Debug for UploadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadStream")
            .field("start", &self.start)
            .finish_non_exhaustive()
    }
}

/// The body of a [`RequestTemplate`].
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Bytes {
        content_type: String,
        data: Vec<u8>,
    },
    Stream {
        content_type: String,
        stream: UploadStream,
    },
}

/// A request that can be sent more than once.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: RequestBody,
    /// Non-2xx statuses the caller treats as success (e.g. 409 on folder
    /// creation).
    accepted: Vec<StatusCode>,
}

impl RequestTemplate {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            accepted: Vec::new(),
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: Url) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: Url) -> Self {
        Self::new(Method::PUT, url)
    }

    /// Builder method to set a JSON body.
    pub fn with_json<T: Serialize + ?Sized>(mut self, value: &T) -> TransferResult<Self> {
        let data = serde_json::to_vec(value).map_err(|e| {
            TransferError::internal(format!("failed to serialize request body: {}", e))
        })?;
        self.body = RequestBody::Bytes {
            content_type: "application/json".to_string(),
            data,
        };
        Ok(self)
    }

    /// Builder method to set an in-memory body.
    pub fn with_bytes(mut self, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        self.body = RequestBody::Bytes {
            content_type: content_type.into(),
            data,
        };
        self
    }

    /// Builder method to set a streamed body.
    pub fn with_stream(mut self, content_type: impl Into<String>, stream: UploadStream) -> Self {
        self.body = RequestBody::Stream {
            content_type: content_type.into(),
            stream,
        };
        self
    }

    /// Builder method to add a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Builder method to treat `status` as success.
    pub fn accept_status(mut self, status: StatusCode) -> Self {
        self.accepted.push(status);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn accepts(&self, status: StatusCode) -> bool {
        status.is_success() || self.accepted.contains(&status)
    }

    fn is_streamed(&self) -> bool {
        matches!(self.body, RequestBody::Stream { .. })
    }

    async fn rewind(&self) -> TransferResult<()> {
        match &self.body {
            RequestBody::Stream { stream, .. } => stream.rewind().await,
            _ => Ok(()),
        }
    }

    async fn build(&self, client: &reqwest::Client, token: &str) -> reqwest::RequestBuilder {
        let request = client
            .request(self.method.clone(), self.url.clone())
            .headers(self.headers.clone())
            .bearer_auth(token);
        match &self.body {
            RequestBody::Empty => request,
            RequestBody::Bytes { content_type, data } => request
                .header(CONTENT_TYPE, content_type.as_str())
                .body(data.clone()),
            RequestBody::Stream {
                content_type,
                stream,
            } => request
                .header(CONTENT_TYPE, content_type.as_str())
                .body(stream.body().await),
        }
    }
}

/// HTTP client bound to one destination and one session credential.
#[derive(Debug, Clone)]
pub struct AuthenticatedHttpClient {
    http_client: reqwest::Client,
    /// Used for streamed uploads, which get their own timeouts.
    upload_client: reqwest::Client,
    base_url: Url,
    credentials: Arc<CredentialStore>,
}

impl AuthenticatedHttpClient {
    pub fn new(http_client: reqwest::Client, base_url: Url, credentials: Arc<CredentialStore>) -> Self {
        Self {
            upload_client: http_client.clone(),
            http_client,
            base_url,
            credentials,
        }
    }

    /// Builder method to use a separate client for streamed uploads.
    pub fn with_upload_client(mut self, upload_client: reqwest::Client) -> Self {
        self.upload_client = upload_client;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// Resolves `path` under the base URL and appends `query`.
    pub fn endpoint(&self, path: &str, query: &[(&str, &str)]) -> Url {
        let mut url = self.base_url.clone();
        let base_path = self.base_url.path().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        url.set_path(&format!("{}/{}", base_path, path));
        url.set_query(None);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        url
    }

    /// Sends `request` and returns the response if its status is accepted.
    ///
    /// The credential is refreshed at most once per call: either up front
    /// because it already expired, or after a first 401.
    pub async fn execute(&self, request: &RequestTemplate) -> TransferResult<Response> {
        let mut credential = self
            .credentials
            .current()
            .ok_or_else(|| TransferError::configuration("no credential for this session"))?;
        let mut refreshed = false;
        if credential.is_expired() {
            debug!("access token expired, refreshing before request");
            credential = self.credentials.refresh(&credential.access_token).await?;
            refreshed = true;
        }

        let response = self.dispatch(request, &credential.access_token).await?;

        let response = if response.status() != StatusCode::UNAUTHORIZED {
            response
        } else if refreshed {
            return Err(still_unauthorized(request, response).await);
        } else {
            drop(response);
            debug!(method = %request.method, url = %request.url, "received 401, refreshing credential");
            let renewed = self.credentials.refresh(&credential.access_token).await?;
            request.rewind().await?;

            let retried = self.dispatch(request, &renewed.access_token).await?;
            if retried.status() == StatusCode::UNAUTHORIZED {
                return Err(still_unauthorized(request, retried).await);
            }
            retried
        };

        let status = response.status();
        if request.accepts(status) {
            trace!(status = %status, url = %request.url, "request succeeded");
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            warn!(url = %request.url, "destination reported quota exceeded");
        } else {
            debug!(status = %status, url = %request.url, "unexpected response status");
        }
        Err(TransferError::from_status(status, &body))
    }

    /// Sends `request` and returns the response body.
    pub async fn send(&self, request: &RequestTemplate) -> TransferResult<Vec<u8>> {
        let response = self.execute(request).await?;
        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }

    /// Sends `request` and decodes the response body as JSON.
    pub async fn send_json<T: DeserializeOwned>(&self, request: &RequestTemplate) -> TransferResult<T> {
        let body = self.send(request).await?;
        serde_json::from_slice(&body).map_err(|e| {
            TransferError::malformed_response(format!("invalid response from {}: {}", request.url, e))
                .with_body(&String::from_utf8_lossy(&body))
        })
    }

    async fn dispatch(&self, request: &RequestTemplate, token: &str) -> TransferResult<Response> {
        let client = if request.is_streamed() {
            &self.upload_client
        } else {
            &self.http_client
        };
        trace!(method = %request.method, url = %request.url, "sending request");
        let response = request.build(client, token).await.send().await?;
        Ok(response)
    }
}

async fn still_unauthorized(request: &RequestTemplate, response: Response) -> TransferError {
    let body = response.text().await.unwrap_or_default();
    warn!(url = %request.url, "still unauthorized after refreshing credential");
    TransferError::auth_refresh("request still unauthorized after refreshing credential")
        .with_status(StatusCode::UNAUTHORIZED.as_u16())
        .with_body(&body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransferErrorCode;
    use crate::testing::{CountingRefresher, session};
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, store: Arc<CredentialStore>) -> AuthenticatedHttpClient {
        AuthenticatedHttpClient::new(
            reqwest::Client::new(),
            Url::parse(&server.uri()).unwrap(),
            store,
        )
    }

    #[tokio::test]
    async fn attaches_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .and(header("authorization", "Bearer access-0"))
            .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
            .expect(1)
            .mount(&server)
            .await;

        let (_, store) = session();
        let client = client_for(&server, store);
        let body = client
            .send(&RequestTemplate::get(client.endpoint("/ping", &[])))
            .await
            .unwrap();
        assert_eq!(body, b"pong");
    }

    #[tokio::test]
    async fn retries_once_after_401() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .and(header("authorization", "Bearer access-0"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .and(header("authorization", "Bearer access-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .expect(1)
            .mount(&server)
            .await;

        let (refresher, store) = session();
        let client = client_for(&server, store.clone());
        let body = client
            .send(&RequestTemplate::get(client.endpoint("files", &[])))
            .await
            .unwrap();
        assert_eq!(body, b"[]");
        assert_eq!(refresher.calls(), 1);
        assert_eq!(store.access_token().unwrap(), "access-1");
    }

    #[tokio::test]
    async fn second_401_is_auth_error_without_third_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .respond_with(ResponseTemplate::new(401).set_body_string("nope"))
            .expect(2)
            .mount(&server)
            .await;

        let (refresher, store) = session();
        let client = client_for(&server, store);
        let err = client
            .send(&RequestTemplate::get(client.endpoint("files", &[])))
            .await
            .unwrap_err();
        assert_eq!(err.code(), TransferErrorCode::AuthRefresh);
        assert_eq!(err.status(), Some(401));
        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test]
    async fn expired_credential_is_refreshed_only_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .and(header("authorization", "Bearer access-1"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let (refresher, store) = session();
        store.expire_now();
        let client = client_for(&server, store.clone());
        let err = client
            .send(&RequestTemplate::get(client.endpoint("files", &[])))
            .await
            .unwrap_err();
        assert_eq!(err.code(), TransferErrorCode::AuthRefresh);
        assert_eq!(refresher.calls(), 1);
        assert_eq!(store.access_token().unwrap(), "access-1");
    }

    #[tokio::test]
    async fn expired_credential_is_refreshed_before_sending() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .and(header("authorization", "Bearer access-1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (refresher, store) = session();
        store.expire_now();
        let client = client_for(&server, store);
        client
            .send(&RequestTemplate::get(client.endpoint("files", &[])))
            .await
            .unwrap();
        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test]
    async fn payload_too_large_is_quota_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/anything"))
            .respond_with(ResponseTemplate::new(413).set_body_string("storage full"))
            .expect(1)
            .mount(&server)
            .await;

        let (refresher, store) = session();
        let client = client_for(&server, store);
        let request = RequestTemplate::post(client.endpoint("anything", &[]))
            .with_json(&serde_json::json!({"name": "x"}))
            .unwrap();
        let err = client.send(&request).await.unwrap_err();
        assert_eq!(err.code(), TransferErrorCode::QuotaExceeded);
        assert!(err.is_fatal());
        assert_eq!(err.body(), Some("storage full"));
        assert_eq!(refresher.calls(), 0);
    }

    #[tokio::test]
    async fn accepted_status_is_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/folder"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;

        let (_, store) = session();
        let client = client_for(&server, store);
        let url = client.endpoint("folder", &[]);

        let err = client.send(&RequestTemplate::post(url.clone())).await.unwrap_err();
        assert_eq!(err.code(), TransferErrorCode::RemoteRequest);
        assert_eq!(err.status(), Some(409));

        let accepted = RequestTemplate::post(url).accept_status(StatusCode::CONFLICT);
        assert!(client.send(&accepted).await.is_ok());
    }

    #[tokio::test]
    async fn streamed_body_is_replayed_intact_after_401() {
        let payload = "0123456789".repeat(20_000);
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/upload"))
            .and(header("authorization", "Bearer access-0"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/upload"))
            .and(header("authorization", "Bearer access-1"))
            .and(header("content-type", "image/jpeg"))
            .and(body_string(payload.clone()))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let (_, store) = session();
        let client = client_for(&server, store);
        let stream = UploadStream::from_bytes(payload.into_bytes()).await.unwrap();
        let request =
            RequestTemplate::put(client.endpoint("upload", &[])).with_stream("image/jpeg", stream);
        client.send(&request).await.unwrap();
    }

    #[tokio::test]
    async fn stream_rewinds_to_its_initial_position() {
        let mut cursor = std::io::Cursor::new(b"headerBODY".to_vec());
        cursor.set_position(6);
        let stream = UploadStream::new(Box::new(cursor)).await.unwrap();

        let mut first = Vec::new();
        stream.state.lock().await.source.read_to_end(&mut first).await.unwrap();
        assert_eq!(first, b"BODY");

        stream.rewind().await.unwrap();
        let mut second = Vec::new();
        stream.state.lock().await.source.read_to_end(&mut second).await.unwrap();
        assert_eq!(second, b"BODY");
    }

    #[tokio::test]
    async fn missing_credential_is_configuration_error() {
        let server = MockServer::start().await;
        let store = Arc::new(CredentialStore::new(Arc::new(CountingRefresher::default())));
        let client = client_for(&server, store);
        let err = client
            .send(&RequestTemplate::get(client.endpoint("x", &[])))
            .await
            .unwrap_err();
        assert_eq!(err.code(), TransferErrorCode::Configuration);
    }

    #[test]
    fn endpoint_joins_base_path_and_query() {
        let (_, store) = session();
        let client = AuthenticatedHttpClient::new(
            reqwest::Client::new(),
            Url::parse("https://pod.example.com/api/").unwrap(),
            store,
        );
        let url = client.endpoint("/mounts/primary/files/info", &[("path", "/r/My Album")]);
        assert_eq!(
            url.as_str(),
            "https://pod.example.com/api/mounts/primary/files/info?path=%2Fr%2FMy+Album"
        );
    }

    #[tokio::test]
    async fn malformed_json_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let (_, store) = session();
        let client = client_for(&server, store);
        let err = client
            .send_json::<serde_json::Value>(&RequestTemplate::get(client.endpoint("x", &[])))
            .await
            .unwrap_err();
        assert_eq!(err.code(), TransferErrorCode::MalformedResponse);
    }
}
