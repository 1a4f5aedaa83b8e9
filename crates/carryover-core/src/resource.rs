//! Resource containers handed to an import pass.
//!
//! A container is one batch of related entities for a single
//! [`DataType`]: the parents (albums, calendars, task lists) and the
//! children that reference them by id. Field mapping from a source
//! service into these shapes happens upstream; this module only carries
//! the fields the import machinery reads.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of data a transfer job moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    /// Photo albums and photos.
    Photos,
    /// Video albums and videos.
    Videos,
    /// Calendars and their events.
    Calendar,
    /// Task lists and tasks.
    Tasks,
    /// Purchase orders.
    Order,
}

impl DataType {
    /// All known data types.
    pub const ALL: [DataType; 5] = [
        Self::Photos,
        Self::Videos,
        Self::Calendar,
        Self::Tasks,
        Self::Order,
    ];

    /// Returns the canonical upper-case name used in provider configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Photos => "PHOTOS",
            Self::Videos => "VIDEOS",
            Self::Calendar => "CALENDAR",
            Self::Tasks => "TASKS",
            Self::Order => "ORDER",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown data type name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown data type: {0}")]
pub struct UnknownDataType(pub String);

impl FromStr for DataType {
    type Err = UnknownDataType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataType::ALL
            .into_iter()
            .find(|dt| dt.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownDataType(s.to_string()))
    }
}

/// A photo album.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoAlbum {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
}

impl PhotoAlbum {
    /// Creates an album with no description.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
        }
    }

    /// Builder method to set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A single photo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoModel {
    /// Source-side identifier, stable across job retries.
    pub data_id: String,
    pub title: String,
    pub description: Option<String>,
    /// Album this photo belongs to, if any.
    pub album_id: Option<String>,
    /// Where the bytes live: a job blob store handle when `in_temp_store`
    /// is set, a remote URL otherwise.
    pub fetchable_url: Option<String>,
    pub media_type: String,
    pub in_temp_store: bool,
    pub uploaded_time: Option<DateTime<Utc>>,
}

impl PhotoModel {
    /// Creates a photo fetched from a remote URL.
    pub fn new(
        data_id: impl Into<String>,
        title: impl Into<String>,
        fetchable_url: impl Into<String>,
        media_type: impl Into<String>,
    ) -> Self {
        Self {
            data_id: data_id.into(),
            title: title.into(),
            description: None,
            album_id: None,
            fetchable_url: Some(fetchable_url.into()),
            media_type: media_type.into(),
            in_temp_store: false,
            uploaded_time: None,
        }
    }

    /// Builder method to place the photo in an album.
    pub fn with_album(mut self, album_id: impl Into<String>) -> Self {
        self.album_id = Some(album_id.into());
        self
    }

    /// Builder method to mark the bytes as held in the job blob store.
    pub fn in_temp_store(mut self, in_temp_store: bool) -> Self {
        self.in_temp_store = in_temp_store;
        self
    }

    /// Builder method to set the upload time.
    pub fn with_uploaded_time(mut self, time: DateTime<Utc>) -> Self {
        self.uploaded_time = Some(time);
        self
    }

    /// Builder method to set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Photo albums and photos.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotosContainer {
    pub albums: Vec<PhotoAlbum>,
    pub photos: Vec<PhotoModel>,
}

/// A video album.
pub type VideoAlbum = PhotoAlbum;

/// A single video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoObject {
    pub data_id: String,
    pub name: String,
    pub description: Option<String>,
    pub album_id: Option<String>,
    pub content_url: String,
    pub encoding_format: String,
}

impl VideoObject {
    pub fn new(
        data_id: impl Into<String>,
        name: impl Into<String>,
        content_url: impl Into<String>,
        encoding_format: impl Into<String>,
    ) -> Self {
        Self {
            data_id: data_id.into(),
            name: name.into(),
            description: None,
            album_id: None,
            content_url: content_url.into(),
            encoding_format: encoding_format.into(),
        }
    }

    /// Builder method to place the video in an album.
    pub fn with_album(mut self, album_id: impl Into<String>) -> Self {
        self.album_id = Some(album_id.into());
        self
    }
}

/// Video albums and videos.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideosContainer {
    pub albums: Vec<VideoAlbum>,
    pub videos: Vec<VideoObject>,
}

/// A calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarModel {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
}

/// A calendar event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEventModel {
    pub id: String,
    pub calendar_id: Option<String>,
    pub title: Option<String>,
    pub notes: Option<String>,
    pub location: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Calendars and events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarContainer {
    pub calendars: Vec<CalendarModel>,
    pub events: Vec<CalendarEventModel>,
}

/// A task list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskListModel {
    pub id: String,
    pub name: String,
}

/// A task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskModel {
    pub id: String,
    pub task_list_id: Option<String>,
    pub text: Option<String>,
    pub notes: Option<String>,
    pub completed_time: Option<DateTime<Utc>>,
    pub due_time: Option<DateTime<Utc>>,
}

/// Task lists and tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskContainer {
    pub lists: Vec<TaskListModel>,
    pub tasks: Vec<TaskModel>,
}

/// A purchase order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderModel {
    /// Unique order serial; doubles as the import key.
    pub serial: String,
    pub seller_name: Option<String>,
    pub buyer_name: Option<String>,
    pub deal_time: Option<DateTime<Utc>>,
    pub item: String,
    pub description: Option<String>,
    pub turnover: Option<f64>,
}

/// Purchase orders. Orders have no parent entities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderContainer {
    pub orders: Vec<OrderModel>,
}

/// One batch of entities for a single import pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ResourceContainer {
    Photos(PhotosContainer),
    Videos(VideosContainer),
    Calendar(CalendarContainer),
    Tasks(TaskContainer),
    Orders(OrderContainer),
}

impl ResourceContainer {
    /// Returns the data type this container carries.
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Photos(_) => DataType::Photos,
            Self::Videos(_) => DataType::Videos,
            Self::Calendar(_) => DataType::Calendar,
            Self::Tasks(_) => DataType::Tasks,
            Self::Orders(_) => DataType::Order,
        }
    }

    /// Returns `(parents, children)` counts, for logging.
    pub fn counts(&self) -> (usize, usize) {
        match self {
            Self::Photos(c) => (c.albums.len(), c.photos.len()),
            Self::Videos(c) => (c.albums.len(), c.videos.len()),
            Self::Calendar(c) => (c.calendars.len(), c.events.len()),
            Self::Tasks(c) => (c.lists.len(), c.tasks.len()),
            Self::Orders(c) => (0, c.orders.len()),
        }
    }
}
