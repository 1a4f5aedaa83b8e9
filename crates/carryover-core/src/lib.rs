//! Core types shared by the carryover transfer crates.

pub mod resource;
pub mod tracing;

pub use resource::{
    CalendarContainer, CalendarEventModel, CalendarModel, DataType, OrderContainer, OrderModel,
    PhotoAlbum, PhotoModel, PhotosContainer, ResourceContainer, TaskContainer, TaskListModel,
    TaskModel, UnknownDataType, VideoAlbum, VideoObject, VideosContainer,
};
pub use tracing::{init_tracing, TracingConfig, TracingError, TracingOutputFormat};
