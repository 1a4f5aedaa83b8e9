//! OAuth2-authenticated, idempotent import into destination services.
//!
//! This crate writes batches of user data (photos, videos, calendars,
//! tasks, orders) into a destination account:
//!
//! - [`CredentialStore`] - Owns a session's OAuth2 credential and refreshes
//!   it at most once per expiry, however many requests hit a 401 together
//! - [`AuthenticatedHttpClient`] - Sends requests with the session token,
//!   retrying once after a refresh
//! - [`IdempotentImportExecutor`] - Runs each item at most once per job and
//!   records item-level failures
//! - [`ResourceImportPipeline`] - Imports parents before children
//! - [`TransferExtension`] - Hands out the importers for one service
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────┐
//! │ TransferExtension  │  settings, job store
//! └─────────┬──────────┘
//!           │ importer(DataType)
//!           ▼
//! ┌────────────────────┐     ┌──────────────────────────┐
//! │     Importer       │────▶│ IdempotentImportExecutor │
//! └─────────┬──────────┘     └──────────────────────────┘
//!           │ ResourceImportPipeline
//!           ▼
//! ┌────────────────────┐     ┌──────────────────────────┐
//! │ DestinationClient  │────▶│ AuthenticatedHttpClient  │
//! └────────────────────┘     └────────────┬─────────────┘
//!                                         │ 401
//!                                         ▼
//!                            ┌──────────────────────────┐
//!                            │     CredentialStore      │
//!                            └──────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use carryover_transfer::{ExtensionContext, InMemoryImportExecutor, TransferExtension};
//!
//! let mut extension = TransferExtension::pod();
//! extension.initialize(&ExtensionContext::new(settings, job_store));
//! let importer = extension.importer(DataType::Photos)?;
//! let executor = InMemoryImportExecutor::new();
//! let report = importer.import_item(job_id, &executor, &auth_data, &container).await?;
//! ```

pub mod auth;
pub mod config;
pub mod destination;
pub mod error;
pub mod executor;
pub mod extension;
pub mod http;
pub mod importer;
pub mod importers;
pub mod pipeline;
pub mod store;

#[cfg(test)]
mod testing;

// Re-export main types at crate root
pub use auth::{
    AppCredentials, AuthData, AuthExtras, AuthFlavor, AuthFlowConfiguration, AuthMode, Credential,
    CredentialStore, OAuth2Config, OAuth2DataGenerator, OAuthTokenRefresher, PkceCodeGenerator,
    PkcePair, TokenRefresher, TokenResponse,
};
pub use config::{ProviderSettings, TransferSettings, resolve_secret};
pub use destination::{DestinationClient, DestinationClientFactory};
pub use error::{ImportError, TransferError, TransferErrorCode, TransferResult};
pub use executor::{IdempotentImportExecutor, ImportFailure, InMemoryImportExecutor};
pub use extension::{ExtensionContext, ExtensionState, TransferExtension};
pub use http::{AuthenticatedHttpClient, RequestBody, RequestTemplate, UploadSource, UploadStream};
pub use importer::{BoxFuture, Importer};
pub use importers::{CalendarImporter, OrdersImporter, PhotosImporter, TasksImporter, VideosImporter};
pub use pipeline::{
    ImportReport, ItemOutcome, PipelineState, ResourceHandler, ResourceImportPipeline,
};
pub use store::{FileJobStore, InMemoryJobStore, JobStore};
