//! Importers for each supported data type.

mod calendar;
mod orders;
mod photos;
mod tasks;
mod videos;

pub use calendar::CalendarImporter;
pub use orders::OrdersImporter;
pub use photos::PhotosImporter;
pub use tasks::TasksImporter;
pub use videos::VideosImporter;

use serde::Serialize;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::destination::{DestinationClient, trim_description};
use crate::error::{TransferError, TransferResult};
use crate::http::UploadStream;
use crate::store::JobStore;

/// Makes a display name usable as a single path segment.
pub(crate) fn path_segment(name: &str, fallback: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect();
    if cleaned.is_empty() {
        fallback.to_string()
    } else {
        cleaned
    }
}

/// Returns the text before the first line break.
pub(crate) fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

/// Serializes a model into the JSON document stored on the destination.
pub(crate) fn to_document<T: Serialize>(value: &T, what: &str) -> TransferResult<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| TransferError::internal(format!("failed to serialize {}: {}", what, e)))
}

/// Creates an album folder under the root folder, tagging it with the
/// album description if there is one.
pub(crate) async fn create_album_folder(
    client: &DestinationClient,
    name: &str,
    description: Option<&str>,
) -> TransferResult<String> {
    let root = client.ensure_root_folder().await?;
    let path = client
        .ensure_folder(&root, &path_segment(name, "Untitled album"))
        .await?;
    if let Some(description) = trim_description(description).filter(|d| !d.is_empty()) {
        client.add_description(&path, &description).await?;
    }
    Ok(path)
}

/// Where a media item's bytes come from.
pub(crate) enum MediaSource<'a> {
    /// A handle in the job blob store.
    JobStore { job_id: &'a str, handle: &'a str },
    /// A plain URL on the source service.
    Remote { url: &'a str },
}

impl MediaSource<'_> {
    /// Opens the media as a replayable upload body.
    pub(crate) async fn open(
        &self,
        job_store: &dyn JobStore,
        media_client: &reqwest::Client,
    ) -> TransferResult<UploadStream> {
        match self {
            Self::JobStore { job_id, handle } => {
                let source = job_store.get_stream(job_id, handle).await?;
                UploadStream::new(source).await
            }
            Self::Remote { url } => UploadStream::from_bytes(fetch(media_client, url).await?).await,
        }
    }

    /// Reads the whole media into memory.
    pub(crate) async fn read(
        &self,
        job_store: &dyn JobStore,
        media_client: &reqwest::Client,
    ) -> TransferResult<Vec<u8>> {
        match self {
            Self::JobStore { job_id, handle } => {
                let mut source = job_store.get_stream(job_id, handle).await?;
                let mut bytes = Vec::new();
                source.read_to_end(&mut bytes).await.map_err(|e| {
                    TransferError::internal(format!("failed to read staged media {}", handle))
                        .with_source(e)
                })?;
                Ok(bytes)
            }
            Self::Remote { url } => fetch(media_client, url).await,
        }
    }
}

async fn fetch(media_client: &reqwest::Client, url: &str) -> TransferResult<Vec<u8>> {
    debug!(url = %url, "fetching media");
    let response = media_client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(
            TransferError::remote_request(format!("failed to fetch media from {}", url))
                .with_status(status.as_u16())
                .with_body(&body),
        );
    }
    Ok(response.bytes().await?.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_segment_strips_separators() {
        assert_eq!(path_segment(" Summer/2024 ", "x"), "Summer_2024");
        assert_eq!(path_segment("a\\b", "x"), "a_b");
        assert_eq!(path_segment("   ", "Untitled"), "Untitled");
    }

    #[tokio::test]
    async fn staged_media_is_read_whole() {
        let store = crate::store::InMemoryJobStore::new();
        store.put("job-1", "blob-1", b"abc".to_vec());
        let source = MediaSource::JobStore {
            job_id: "job-1",
            handle: "blob-1",
        };
        let bytes = source.read(&store, &reqwest::Client::new()).await.unwrap();
        assert_eq!(bytes, b"abc");

        let missing = MediaSource::JobStore {
            job_id: "job-1",
            handle: "blob-2",
        };
        assert!(missing.read(&store, &reqwest::Client::new()).await.is_err());
    }

    #[test]
    fn first_line_cuts_at_newline() {
        assert_eq!(first_line("Standup\nnotes"), "Standup");
        assert_eq!(first_line("Dinner\r\nlater"), "Dinner");
        assert_eq!(first_line(""), "");
    }
}
