use std::io::Cursor;
use std::sync::Arc;

use carryover_core::{DataType, PhotoAlbum, PhotoModel, ResourceContainer};
use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use exif::{In, Tag, Value};
use tracing::{debug, info};

use super::{MediaSource, create_album_folder, path_segment};
use crate::BoxFuture;
use crate::auth::AuthData;
use crate::destination::{DestinationClient, DestinationClientFactory, join_path};
use crate::error::{TransferError, TransferResult};
use crate::http::UploadStream;
use crate::executor::IdempotentImportExecutor;
use crate::importer::{Importer, unexpected_container};
use crate::pipeline::{ImportReport, ResourceHandler, ResourceImportPipeline};
use crate::store::JobStore;

/// Imports photo albums as folders under the root folder and photos as
/// files inside them.
pub struct PhotosImporter {
    clients: DestinationClientFactory,
    job_store: Arc<dyn JobStore>,
    media_client: reqwest::Client,
}

impl PhotosImporter {
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

impl Importer for PhotosImporter {
    fn data_type(&self) -> DataType {
        DataType::Photos
    }

    fn import_item<'a>(
        &'a self,
        job_id: &'a str,
        executor: &'a dyn IdempotentImportExecutor,
        auth_data: &'a AuthData,
        container: &'a ResourceContainer,
    ) -> BoxFuture<'a, TransferResult<ImportReport>> {
        Box::pin(async move {
            let ResourceContainer::Photos(photos) = container else {
                return Err(unexpected_container(DataType::Photos, container));
            };
            let client = self.clients.create(auth_data)?;
            info!(
                job_id = %job_id,
                albums = photos.albums.len(),
                photos = photos.photos.len(),
                "importing photos"
            );
            let handler = PhotoHandler {
                job_id,
                time_zone: self.job_store.user_time_zone(job_id),
                client: &client,
                job_store: self.job_store.as_ref(),
                media_client: &self.media_client,
            };
            ResourceImportPipeline::new(DataType::Photos, &handler, executor)
                .run(&photos.albums, &photos.photos)
                .await
        })
    }
}

struct PhotoHandler<'a> {
    job_id: &'a str,
    /// Zone upload times are shown in; UTC when unset.
    time_zone: Option<Tz>,
    client: &'a DestinationClient,
    job_store: &'a dyn JobStore,
    media_client: &'a reqwest::Client,
}

impl PhotoHandler<'_> {
    async fn folder_for(&self, parent_path: Option<&str>) -> TransferResult<String> {
        match parent_path {
            Some(path) => Ok(path.to_string()),
            None => self.client.ensure_root_folder().await,
        }
    }

    fn source<'p>(&'p self, photo: &'p PhotoModel) -> TransferResult<MediaSource<'p>> {
        let Some(ref url) = photo.fetchable_url else {
            return Err(TransferError::internal(format!(
                "photo {} has no source to read from",
                photo.data_id
            )));
        };
        Ok(if photo.in_temp_store {
            MediaSource::JobStore {
                job_id: self.job_id,
                handle: url,
            }
        } else {
            MediaSource::Remote { url }
        })
    }

    async fn discard_staged(&self, photo: &PhotoModel) {
        let Some(ref handle) = photo.fetchable_url else {
            return;
        };
        if photo.in_temp_store {
            if let Err(e) = self.job_store.remove_data(self.job_id, handle).await {
                info!(job_id = %self.job_id, handle = %handle, error = %e, "could not remove staged photo");
            }
        }
    }
}

const TITLE_DATE_FORMAT: &str = "%Y-%m-%d %H.%M.%S";

/// When a photo was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CaptureTime {
    /// Upload time reported by the source.
    Uploaded(DateTime<Utc>),
    /// Camera clock reading from EXIF, which carries no zone.
    Camera(NaiveDateTime),
}

/// The file name a photo is stored under: its capture time (when known)
/// followed by the title.
pub(crate) fn photo_file_name(
    photo: &PhotoModel,
    taken: Option<CaptureTime>,
    time_zone: Option<Tz>,
) -> String {
    let title = path_segment(&photo.title, &photo.data_id);
    let stamp = match (taken, time_zone) {
        (None, _) => return title,
        (Some(CaptureTime::Uploaded(time)), Some(zone)) => {
            time.with_timezone(&zone).format(TITLE_DATE_FORMAT).to_string()
        }
        (Some(CaptureTime::Uploaded(time)), None) => time.format(TITLE_DATE_FORMAT).to_string(),
        (Some(CaptureTime::Camera(time)), _) => time.format(TITLE_DATE_FORMAT).to_string(),
    };
    format!("{} {}", stamp, title)
}

/// Reads `DateTimeOriginal`, falling back to `DateTimeDigitized`.
pub(crate) fn exif_capture_time(bytes: &[u8]) -> Option<NaiveDateTime> {
    let exif = match exif::Reader::new().read_from_container(&mut Cursor::new(bytes)) {
        Ok(exif) => exif,
        Err(e) => {
            debug!(error = %e, "no readable EXIF data");
            return None;
        }
    };
    [Tag::DateTimeOriginal, Tag::DateTimeDigitized]
        .into_iter()
        .find_map(|tag| {
            let field = exif.get_field(tag, In::PRIMARY)?;
            let Value::Ascii(ref values) = field.value else {
                return None;
            };
            let raw = std::str::from_utf8(values.first()?).ok()?;
            NaiveDateTime::parse_from_str(raw.trim(), "%Y:%m:%d %H:%M:%S").ok()
        })
}

impl ResourceHandler for PhotoHandler<'_> {
    type Parent = PhotoAlbum;
    type Child = PhotoModel;

    fn parent_key(&self, album: &PhotoAlbum) -> String {
        album.id.clone()
    }

    fn parent_name(&self, album: &PhotoAlbum) -> String {
        album.name.clone()
    }

    fn create_parent<'a>(&'a self, album: &'a PhotoAlbum) -> BoxFuture<'a, TransferResult<String>> {
        Box::pin(create_album_folder(
            self.client,
            &album.name,
            album.description.as_deref(),
        ))
    }

    fn child_key(&self, photo: &PhotoModel) -> String {
        match photo.album_id {
            Some(ref album_id) => format!("{}-{}", album_id, photo.data_id),
            None => photo.data_id.clone(),
        }
    }

    fn child_name(&self, photo: &PhotoModel) -> String {
        photo.title.clone()
    }

    fn child_parent_key(&self, photo: &PhotoModel) -> Option<String> {
        photo.album_id.clone()
    }

    fn find_existing<'a>(
        &'a self,
        photo: &'a PhotoModel,
        parent_path: Option<&'a str>,
    ) -> BoxFuture<'a, TransferResult<Option<String>>> {
        Box::pin(async move {
            // Without an upload time the name depends on EXIF data, so the
            // check happens in `create_child` once the bytes are read.
            let Some(uploaded) = photo.uploaded_time else {
                return Ok(None);
            };
            let folder = self.folder_for(parent_path).await?;
            let name = photo_file_name(photo, Some(CaptureTime::Uploaded(uploaded)), self.time_zone);
            let path = join_path(&folder, &name);
            Ok(self.client.file_exists(&path).await?.then_some(path))
        })
    }

    fn create_child<'a>(
        &'a self,
        photo: &'a PhotoModel,
        parent_path: Option<&'a str>,
    ) -> BoxFuture<'a, TransferResult<String>> {
        Box::pin(async move {
            let folder = self.folder_for(parent_path).await?;
            let source = self.source(photo)?;
            let (name, body) = match photo.uploaded_time {
                Some(uploaded) => (
                    photo_file_name(photo, Some(CaptureTime::Uploaded(uploaded)), self.time_zone),
                    source.open(self.job_store, self.media_client).await?,
                ),
                None => {
                    let bytes = source.read(self.job_store, self.media_client).await?;
                    let taken = exif_capture_time(&bytes).map(CaptureTime::Camera);
                    let name = photo_file_name(photo, taken, self.time_zone);
                    let path = join_path(&folder, &name);
                    if self.client.file_exists(&path).await? {
                        debug!(path = %path, "photo already present at destination");
                        self.discard_staged(photo).await;
                        return Ok(path);
                    }
                    (name, UploadStream::from_bytes(bytes).await?)
                }
            };
            let path = self
                .client
                .upload_file(&folder, &name, body, &photo.media_type)
                .await?;

            self.discard_staged(photo).await;
            debug!(path = %path, "imported photo");
            Ok(path)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    /// A JPEG whose only content is an APP1 segment holding one EXIF date.
    fn jpeg_with_exif_date(tag: u16, date: &str) -> Vec<u8> {
        let mut tiff = Vec::new();
        tiff.extend_from_slice(b"MM\x00\x2a");
        tiff.extend_from_slice(&8u32.to_be_bytes());
        // IFD0: a single pointer to the Exif IFD at offset 26.
        tiff.extend_from_slice(&1u16.to_be_bytes());
        tiff.extend_from_slice(&0x8769u16.to_be_bytes());
        tiff.extend_from_slice(&4u16.to_be_bytes());
        tiff.extend_from_slice(&1u32.to_be_bytes());
        tiff.extend_from_slice(&26u32.to_be_bytes());
        tiff.extend_from_slice(&0u32.to_be_bytes());
        // Exif IFD: the date string at offset 44.
        let mut value = date.as_bytes().to_vec();
        value.push(0);
        tiff.extend_from_slice(&1u16.to_be_bytes());
        tiff.extend_from_slice(&tag.to_be_bytes());
        tiff.extend_from_slice(&2u16.to_be_bytes());
        tiff.extend_from_slice(&(value.len() as u32).to_be_bytes());
        tiff.extend_from_slice(&44u32.to_be_bytes());
        tiff.extend_from_slice(&0u32.to_be_bytes());
        tiff.extend_from_slice(&value);

        let mut jpeg = vec![0xff, 0xd8, 0xff, 0xe1];
        jpeg.extend_from_slice(&((2 + 6 + tiff.len()) as u16).to_be_bytes());
        jpeg.extend_from_slice(b"Exif\x00\x00");
        jpeg.extend_from_slice(&tiff);
        jpeg.extend_from_slice(&[0xff, 0xd9]);
        jpeg
    }

    fn camera_time(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 5, 4)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn file_name_carries_upload_time() {
        let uploaded = Utc.with_ymd_and_hms(2024, 7, 14, 9, 5, 3).unwrap();
        let photo = PhotoModel::new("P1", "beach.jpg", "https://cdn/1", "image/jpeg")
            .with_uploaded_time(uploaded);
        assert_eq!(
            photo_file_name(&photo, Some(CaptureTime::Uploaded(uploaded)), None),
            "2024-07-14 09.05.03 beach.jpg"
        );

        let untitled = PhotoModel::new("P2", "", "https://cdn/2", "image/jpeg");
        assert_eq!(photo_file_name(&untitled, None, None), "P2");
    }

    #[test]
    fn upload_time_is_shown_in_user_time_zone() {
        let uploaded = Utc.with_ymd_and_hms(2024, 7, 14, 22, 30, 0).unwrap();
        let photo = PhotoModel::new("P1", "night.jpg", "https://cdn/1", "image/jpeg");
        assert_eq!(
            photo_file_name(
                &photo,
                Some(CaptureTime::Uploaded(uploaded)),
                Some(Tz::Asia__Tokyo)
            ),
            "2024-07-15 07.30.00 night.jpg"
        );
    }

    #[test]
    fn camera_time_is_kept_as_recorded() {
        let photo = PhotoModel::new("P1", "cam.jpg", "https://cdn/1", "image/jpeg");
        let taken = Some(CaptureTime::Camera(camera_time(13, 14, 15)));
        assert_eq!(
            photo_file_name(&photo, taken, Some(Tz::America__New_York)),
            "2019-05-04 13.14.15 cam.jpg"
        );
    }

    #[test]
    fn exif_original_date_is_read() {
        let jpeg = jpeg_with_exif_date(0x9003, "2019:05:04 13:14:15");
        assert_eq!(exif_capture_time(&jpeg), Some(camera_time(13, 14, 15)));
    }

    #[test]
    fn exif_digitized_date_is_the_fallback() {
        let jpeg = jpeg_with_exif_date(0x9004, "2019:05:04 08:00:01");
        assert_eq!(exif_capture_time(&jpeg), Some(camera_time(8, 0, 1)));
    }

    #[test]
    fn media_without_exif_has_no_capture_time() {
        assert_eq!(exif_capture_time(b"staged-bytes"), None);
        let jpeg = jpeg_with_exif_date(0x9003, "not a date");
        assert_eq!(exif_capture_time(&jpeg), None);
    }
}
