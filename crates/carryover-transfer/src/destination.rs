//! REST client for the destination's file and folder endpoints.
//!
//! Folders and file metadata go through the `/api/v2/mounts/primary`
//! API. Content is written with a PUT under the owner's namespace
//! (`/<owner>/...`), where the owner is taken from the `webid` claim of
//! the session's access token.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::StatusCode;
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::debug;
use url::Url;

use crate::auth::{AuthData, CredentialStore, TokenRefresher};
use crate::error::{TransferError, TransferResult};
use crate::http::{AuthenticatedHttpClient, RequestTemplate, UploadStream};

const API_PATH_PREFIX: &str = "/api/v2";
const ROOT_NAME: &str = "r";
const VIDEOS_FOLDER_NAME: &str = "Videos";

/// Longest description the destination accepts, in characters.
pub const MAX_DESCRIPTION_CHARS: usize = 1000;

/// Client for one destination account, bound to one session credential.
#[derive(Debug)]
pub struct DestinationClient {
    http: AuthenticatedHttpClient,
    root_folder: OnceCell<String>,
    videos_folder: OnceCell<String>,
}

impl DestinationClient {
    pub fn new(http: AuthenticatedHttpClient) -> Self {
        Self {
            http,
            root_folder: OnceCell::new(),
            videos_folder: OnceCell::new(),
        }
    }

    pub fn http(&self) -> &AuthenticatedHttpClient {
        &self.http
    }

    /// Path of the folder all imported media is placed under.
    pub fn root_path() -> String {
        format!("/{}", ROOT_NAME)
    }

    /// Returns whether `path` exists on the destination.
    pub async fn file_exists(&self, path: &str) -> TransferResult<bool> {
        let url = self
            .http
            .endpoint("/mounts/primary/files/info", &[("path", path)]);
        let request = RequestTemplate::get(url).accept_status(StatusCode::NOT_FOUND);
        let response = self.http.execute(&request).await?;
        Ok(response.status() != StatusCode::NOT_FOUND)
    }

    /// Creates folder `name` under `parent` and returns its full path.
    ///
    /// An existing folder (409) counts as created.
    pub async fn ensure_folder(&self, parent: &str, name: &str) -> TransferResult<String> {
        let url = self.http.endpoint(
            &format!("{}/mounts/primary/files/folder", API_PATH_PREFIX),
            &[("path", parent)],
        );
        let request = RequestTemplate::post(url)
            .with_json(&json!({ "name": name }))?
            .accept_status(StatusCode::CONFLICT);
        let response = self.http.execute(&request).await?;
        let path = join_path(parent, name);
        if response.status() == StatusCode::CONFLICT {
            debug!(path = %path, "folder already exists");
        } else {
            debug!(path = %path, "created folder");
        }
        Ok(path)
    }

    /// Creates the root folder on first call and returns its path.
    pub async fn ensure_root_folder(&self) -> TransferResult<String> {
        self.root_folder
            .get_or_try_init(|| async {
                self.ensure_folder("/", ROOT_NAME).await?;
                Ok::<_, TransferError>(Self::root_path())
            })
            .await
            .cloned()
    }

    /// Creates the folder for videos without an album and returns its path.
    pub async fn ensure_videos_folder(&self) -> TransferResult<String> {
        self.videos_folder
            .get_or_try_init(|| async {
                let root = self.ensure_root_folder().await?;
                self.ensure_folder(&root, VIDEOS_FOLDER_NAME).await
            })
            .await
            .cloned()
    }

    /// Tags `path` with a description.
    pub async fn add_description(&self, path: &str, description: &str) -> TransferResult<()> {
        let url = self.http.endpoint(
            &format!("{}/mounts/primary/files/tags/add", API_PATH_PREFIX),
            &[("path", path)],
        );
        let request = RequestTemplate::post(url)
            .with_json(&json!({ "tags": { "description": [description] } }))?
            .accept_status(StatusCode::CONFLICT);
        self.http.execute(&request).await?;
        Ok(())
    }

    /// Uploads a media file into the `parent` folder and returns its path.
    pub async fn upload_file(
        &self,
        parent: &str,
        name: &str,
        body: UploadStream,
        media_type: &str,
    ) -> TransferResult<String> {
        let path = format!(
            "{}/photos{}/{}",
            ensure_front_slash(&self.owner()),
            ensure_front_slash(remove_trailing_slash(parent)),
            name
        );
        let request = RequestTemplate::put(self.http.endpoint(&path, &[])).with_stream(media_type, body);
        self.http.send(&request).await?;
        debug!(parent = %parent, name = %name, "uploaded file");
        Ok(join_path(parent, name))
    }

    /// Writes a JSON document `title` into `folder` and returns its path.
    pub async fn upload_json(
        &self,
        folder: &str,
        title: &str,
        document: &serde_json::Value,
    ) -> TransferResult<String> {
        let path = format!(
            "{}{}{}",
            ensure_front_slash(&self.owner()),
            ensure_front_slash(remove_trailing_slash(folder)),
            ensure_front_slash(remove_trailing_slash(title))
        );
        let data = serde_json::to_vec(document).map_err(|e| {
            TransferError::internal(format!("failed to serialize {}: {}", title, e))
        })?;
        let stream = UploadStream::from_bytes(data).await?;
        let request = RequestTemplate::put(self.http.endpoint(&path, &[]))
            .with_stream("application/json", stream);
        self.http.send(&request).await?;
        debug!(folder = %folder, title = %title, "uploaded document");
        Ok(join_path(folder, title))
    }

    /// Submits an order record to the order import endpoint.
    pub async fn import_order(&self, order_json: &str) -> TransferResult<()> {
        let url = self
            .http
            .endpoint("/order/importOrder", &[("jsonStr", order_json)]);
        self.http.send(&RequestTemplate::get(url)).await?;
        Ok(())
    }

    /// The account segment content paths are written under.
    fn owner(&self) -> String {
        self.http
            .credentials()
            .current()
            .and_then(|c| owner_from_access_token(&c.access_token))
            .unwrap_or_default()
    }
}

/// Builds a [`DestinationClient`] per import session.
#[derive(Clone)]
pub struct DestinationClientFactory {
    http_client: reqwest::Client,
    upload_client: reqwest::Client,
    base_url: Url,
    refresher: Arc<dyn TokenRefresher>,
}

impl DestinationClientFactory {
    pub fn new(
        http_client: reqwest::Client,
        upload_client: reqwest::Client,
        base_url: Url,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Self {
        Self {
            http_client,
            upload_client,
            base_url,
            refresher,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Creates a client with a fresh credential store seeded from
    /// `auth_data`.
    pub fn create(&self, auth_data: &AuthData) -> TransferResult<DestinationClient> {
        let credentials = Arc::new(CredentialStore::new(self.refresher.clone()));
        credentials.get_or_create_credential(auth_data)?;
        let http = AuthenticatedHttpClient::new(
            self.http_client.clone(),
            self.base_url.clone(),
            credentials,
        )
        .with_upload_client(self.upload_client.clone());
        Ok(DestinationClient::new(http))
    }
}

impl std::fmt::Debug for DestinationClientFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestinationClientFactory")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

/// Extracts the owner segment from a JWT access token's `webid` claim.
///
/// `https://host/alice/profile/card#me` yields `alice`.
pub fn owner_from_access_token(token: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let webid = Url::parse(claims.get("webid")?.as_str()?).ok()?;
    let owner = webid.path_segments()?.next()?;
    Some(owner.to_string())
}

/// Caps a description at [`MAX_DESCRIPTION_CHARS`] characters.
pub fn trim_description(description: Option<&str>) -> Option<String> {
    description.map(|d| d.chars().take(MAX_DESCRIPTION_CHARS).collect())
}

/// Replaces leading slashes with exactly one. Empty stays empty.
pub fn ensure_front_slash(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    format!("/{}", path.trim_start_matches(['/', '\\']))
}

/// Replaces trailing slashes with exactly one. Empty stays empty.
pub fn ensure_trailing_slash(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    format!("{}/", path.trim_end_matches(['/', '\\']))
}

pub fn remove_trailing_slash(path: &str) -> &str {
    path.trim_end_matches(['/', '\\'])
}

/// Joins a folder path and a child name with a single slash.
pub fn join_path(parent: &str, name: &str) -> String {
    format!(
        "{}/{}",
        remove_trailing_slash(parent),
        name.trim_start_matches(['/', '\\'])
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransferErrorCode;
    use crate::testing::session;
    use wiremock::matchers::{body_json, body_string, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn jwt_with_webid(webid: &str) -> String {
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"webid":"{}"}}"#, webid));
        format!("eyJhbGciOiJSUzI1NiJ9.{}.sig", payload)
    }

    fn client_for(server: &MockServer) -> DestinationClient {
        let (_, store) = session();
        DestinationClient::new(AuthenticatedHttpClient::new(
            reqwest::Client::new(),
            Url::parse(&server.uri()).unwrap(),
            store,
        ))
    }

    fn client_with_token(server: &MockServer, token: &str) -> DestinationClient {
        let factory = DestinationClientFactory::new(
            reqwest::Client::new(),
            reqwest::Client::new(),
            Url::parse(&server.uri()).unwrap(),
            Arc::new(crate::testing::CountingRefresher::default()),
        );
        factory
            .create(&AuthData::new(token, "refresh", "https://idp/token"))
            .unwrap()
    }

    #[test]
    fn path_helpers() {
        assert_eq!(ensure_front_slash("//a/b"), "/a/b");
        assert_eq!(ensure_front_slash(""), "");
        assert_eq!(ensure_trailing_slash("a/b//"), "a/b/");
        assert_eq!(ensure_trailing_slash(""), "");
        assert_eq!(remove_trailing_slash("/r/x/"), "/r/x");
        assert_eq!(join_path("/", "r"), "/r");
        assert_eq!(join_path("/r/", "/A"), "/r/A");
    }

    #[test]
    fn descriptions_are_capped() {
        let long = "é".repeat(MAX_DESCRIPTION_CHARS + 5);
        let trimmed = trim_description(Some(&long)).unwrap();
        assert_eq!(trimmed.chars().count(), MAX_DESCRIPTION_CHARS);
        assert_eq!(trim_description(Some("short")).as_deref(), Some("short"));
        assert_eq!(trim_description(None), None);
    }

    #[test]
    fn owner_comes_from_webid_claim() {
        let token = jwt_with_webid("https://pod.example.com:3000/alice/profile/card#me");
        assert_eq!(owner_from_access_token(&token).as_deref(), Some("alice"));
        assert_eq!(owner_from_access_token("opaque-token"), None);
        assert_eq!(owner_from_access_token("a.!!!.c"), None);
    }

    #[tokio::test]
    async fn file_exists_maps_200_and_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/mounts/primary/files/info"))
            .and(query_param("path", "/r/present.jpg"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/mounts/primary/files/info"))
            .and(query_param("path", "/r/absent.jpg"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/mounts/primary/files/info"))
            .and(query_param("path", "/r/broken.jpg"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(client.file_exists("/r/present.jpg").await.unwrap());
        assert!(!client.file_exists("/r/absent.jpg").await.unwrap());
        let err = client.file_exists("/r/broken.jpg").await.unwrap_err();
        assert_eq!(err.code(), TransferErrorCode::RemoteRequest);
    }

    #[tokio::test]
    async fn existing_folder_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/mounts/primary/files/folder"))
            .and(query_param("path", "/r"))
            .and(body_json(json!({"name": "Album 1"})))
            .respond_with(ResponseTemplate::new(409))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let path = client.ensure_folder("/r", "Album 1").await.unwrap();
        assert_eq!(path, "/r/Album 1");
    }

    #[tokio::test]
    async fn root_folder_is_created_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/mounts/primary/files/folder"))
            .and(query_param("path", "/"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v2/mounts/primary/files/folder"))
            .and(query_param("path", "/r"))
            .and(body_json(json!({"name": "Videos"})))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert_eq!(client.ensure_root_folder().await.unwrap(), "/r");
        assert_eq!(client.ensure_root_folder().await.unwrap(), "/r");
        assert_eq!(client.ensure_videos_folder().await.unwrap(), "/r/Videos");
        assert_eq!(client.ensure_videos_folder().await.unwrap(), "/r/Videos");
    }

    #[tokio::test]
    async fn add_description_posts_tags() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/mounts/primary/files/tags/add"))
            .and(query_param("path", "/r/A"))
            .and(body_json(json!({"tags": {"description": ["summer trip"]}})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.add_description("/r/A", "summer trip").await.unwrap();
    }

    #[tokio::test]
    async fn upload_file_puts_under_owner_namespace() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/alice/photos/r/Album/beach.jpg"))
            .and(body_string("jpeg-bytes"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let token = jwt_with_webid("https://pod.example.com/alice/profile/card#me");
        let client = client_with_token(&server, &token);
        let stream = UploadStream::from_bytes(b"jpeg-bytes".to_vec()).await.unwrap();
        let path = client
            .upload_file("/r/Album/", "beach.jpg", stream, "image/jpeg")
            .await
            .unwrap();
        assert_eq!(path, "/r/Album/beach.jpg");
    }

    #[tokio::test]
    async fn upload_quota_exceeded() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(413))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let stream = UploadStream::from_bytes(vec![0; 16]).await.unwrap();
        let err = client
            .upload_file("/r", "big.mov", stream, "video/quicktime")
            .await
            .unwrap_err();
        assert_eq!(err.code(), TransferErrorCode::QuotaExceeded);
    }

    #[tokio::test]
    async fn upload_json_and_import_order() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/calendar/Work/calendar.json"))
            .and(body_json(json!({"id": "C1"})))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/order/importOrder"))
            .and(query_param("jsonStr", r#"{"serial":"S1"}"#))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        // The test session token is not a JWT, so there is no owner segment.
        let client = client_for(&server);
        let path = client
            .upload_json("calendar/Work", "calendar.json", &json!({"id": "C1"}))
            .await
            .unwrap();
        assert_eq!(path, "calendar/Work/calendar.json");
        client.import_order(r#"{"serial":"S1"}"#).await.unwrap();
    }
}
