use std::sync::Arc;

use carryover_core::{DataType, ResourceContainer, VideoAlbum, VideoObject};
use tracing::{debug, info, warn};

use super::{MediaSource, create_album_folder, path_segment};
use crate::BoxFuture;
use crate::auth::AuthData;
use crate::destination::{DestinationClient, DestinationClientFactory, join_path, trim_description};
use crate::error::TransferResult;
use crate::executor::IdempotentImportExecutor;
use crate::importer::{Importer, unexpected_container};
use crate::pipeline::{ImportReport, ResourceHandler, ResourceImportPipeline};
use crate::store::JobStore;

/// Imports videos. Videos outside any album land in the shared videos
/// folder.
pub struct VideosImporter {
    clients: DestinationClientFactory,
    job_store: Arc<dyn JobStore>,
    media_client: reqwest::Client,
}

impl VideosImporter {
    pub fn new(
        clients: DestinationClientFactory,
        job_store: Arc<dyn JobStore>,
        media_client: reqwest::Client,
    ) -> Self {
        Self {
            clients,
            job_store,
            media_client,
        }
    }
}

impl Importer for VideosImporter {
    fn data_type(&self) -> DataType {
        DataType::Videos
    }

    fn import_item<'a>(
        &'a self,
        job_id: &'a str,
        executor: &'a dyn IdempotentImportExecutor,
        auth_data: &'a AuthData,
        container: &'a ResourceContainer,
    ) -> BoxFuture<'a, TransferResult<ImportReport>> {
        Box::pin(async move {
            let ResourceContainer::Videos(videos) = container else {
                return Err(unexpected_container(DataType::Videos, container));
            };
            let client = self.clients.create(auth_data)?;
            info!(
                job_id = %job_id,
                albums = videos.albums.len(),
                videos = videos.videos.len(),
                "importing videos"
            );
            let handler = VideoHandler {
                client: &client,
                job_store: self.job_store.as_ref(),
                media_client: &self.media_client,
            };
            ResourceImportPipeline::new(DataType::Videos, &handler, executor)
                .run(&videos.albums, &videos.videos)
                .await
        })
    }
}

struct VideoHandler<'a> {
    client: &'a DestinationClient,
    job_store: &'a dyn JobStore,
    media_client: &'a reqwest::Client,
}

impl VideoHandler<'_> {
    async fn folder_for(&self, parent_path: Option<&str>) -> TransferResult<String> {
        match parent_path {
            Some(path) => Ok(path.to_string()),
            None => self.client.ensure_videos_folder().await,
        }
    }
}

impl ResourceHandler for VideoHandler<'_> {
    type Parent = VideoAlbum;
    type Child = VideoObject;

    fn parent_key(&self, album: &VideoAlbum) -> String {
        album.id.clone()
    }

    fn parent_name(&self, album: &VideoAlbum) -> String {
        album.name.clone()
    }

    fn create_parent<'a>(&'a self, album: &'a VideoAlbum) -> BoxFuture<'a, TransferResult<String>> {
        Box::pin(create_album_folder(
            self.client,
            &album.name,
            album.description.as_deref(),
        ))
    }

    fn child_key(&self, video: &VideoObject) -> String {
        match video.album_id {
            Some(ref album_id) => format!("{}-{}", album_id, video.data_id),
            None => video.data_id.clone(),
        }
    }

    fn child_name(&self, video: &VideoObject) -> String {
        video.name.clone()
    }

    fn child_parent_key(&self, video: &VideoObject) -> Option<String> {
        video.album_id.clone()
    }

    fn find_existing<'a>(
        &'a self,
        video: &'a VideoObject,
        parent_path: Option<&'a str>,
    ) -> BoxFuture<'a, TransferResult<Option<String>>> {
        Box::pin(async move {
            let folder = self.folder_for(parent_path).await?;
            let path = join_path(&folder, &path_segment(&video.name, &video.data_id));
            Ok(self.client.file_exists(&path).await?.then_some(path))
        })
    }

    fn create_child<'a>(
        &'a self,
        video: &'a VideoObject,
        parent_path: Option<&'a str>,
    ) -> BoxFuture<'a, TransferResult<String>> {
        Box::pin(async move {
            let folder = self.folder_for(parent_path).await?;
            let body = MediaSource::Remote {
                url: &video.content_url,
            }
            .open(self.job_store, self.media_client)
            .await?;
            let path = self
                .client
                .upload_file(
                    &folder,
                    &path_segment(&video.name, &video.data_id),
                    body,
                    &video.encoding_format,
                )
                .await?;
            // Only fatal tagging errors undo the import.
            if let Some(description) =
                trim_description(video.description.as_deref()).filter(|d| !d.is_empty())
            {
                match self.client.add_description(&path, &description).await {
                    Ok(()) => {}
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(path = %path, error = %e, "could not attach video description")
                    }
                }
            }
            debug!(path = %path, "imported video");
            Ok(path)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carryover_core::VideosContainer;
    use url::Url;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::error::TransferErrorCode;
    use crate::executor::InMemoryImportExecutor;
    use crate::store::InMemoryJobStore;
    use crate::testing::CountingRefresher;

    async fn mount_upload(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/api/v2/mounts/primary/files/folder"))
            .respond_with(ResponseTemplate::new(201))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/mounts/primary/files/info"))
            .respond_with(ResponseTemplate::new(404))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/media/clip.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"clip".to_vec()))
            .mount(server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/photos/r/Videos/clip.mp4"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(server)
            .await;
    }

    async fn import(server: &MockServer) -> (TransferResult<ImportReport>, InMemoryImportExecutor) {
        let importer = VideosImporter::new(
            DestinationClientFactory::new(
                reqwest::Client::new(),
                reqwest::Client::new(),
                Url::parse(&server.uri()).unwrap(),
                Arc::new(CountingRefresher::default()),
            ),
            Arc::new(InMemoryJobStore::new()),
            reqwest::Client::new(),
        );
        let mut video = VideoObject::new(
            "V1",
            "clip.mp4",
            format!("{}/media/clip.mp4", server.uri()),
            "video/mp4",
        );
        video.description = Some("Birthday".to_string());
        let container = ResourceContainer::Videos(VideosContainer {
            albums: vec![],
            videos: vec![video],
        });
        let executor = InMemoryImportExecutor::new();
        let auth = AuthData::new("access-0", "refresh", "https://idp.example.com/token");
        let result = importer
            .import_item("job-1", &executor, &auth, &container)
            .await;
        (result, executor)
    }

    #[tokio::test]
    async fn failed_description_does_not_fail_the_video() {
        let server = MockServer::start().await;
        mount_upload(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/v2/mounts/primary/files/tags/add"))
            .and(query_param("path", "/r/Videos/clip.mp4"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let (result, executor) = import(&server).await;
        let report = result.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.destination("V1"), Some("/r/Videos/clip.mp4"));
        assert!(executor.error_for("V1").is_none());
    }

    #[tokio::test]
    async fn quota_while_tagging_is_still_fatal() {
        let server = MockServer::start().await;
        mount_upload(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/v2/mounts/primary/files/tags/add"))
            .respond_with(ResponseTemplate::new(413))
            .expect(1)
            .mount(&server)
            .await;

        let (result, _) = import(&server).await;
        assert_eq!(result.unwrap_err().code(), TransferErrorCode::QuotaExceeded);
    }
}
