//! The importer abstraction.
//!
//! An [`Importer`] writes one [`ResourceContainer`] to a destination
//! service. Each supported data type of a service has its own importer;
//! the extension hands them out by [`DataType`].

use std::future::Future;
use std::pin::Pin;

use carryover_core::{DataType, ResourceContainer};

use crate::auth::AuthData;
use crate::error::{TransferError, TransferResult};
use crate::executor::IdempotentImportExecutor;
use crate::pipeline::ImportReport;

/// A boxed future that is Send.
///
/// Used for trait methods that need to return futures, making the
/// traits object-safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Imports containers of one data type into a destination service.
///
/// Implementations must be thread-safe; a job may run several import
/// passes concurrently against one importer.
pub trait Importer: Send + Sync {
    /// The data type this importer accepts.
    fn data_type(&self) -> DataType;

    /// Imports `container` for job `job_id`.
    ///
    /// Item-level failures are recorded in `executor` and in the returned
    /// report. Fatal failures (auth, quota, configuration) are returned as
    /// errors and end the pass.
    fn import_item<'a>(
        &'a self,
        job_id: &'a str,
        executor: &'a dyn IdempotentImportExecutor,
        auth_data: &'a AuthData,
        container: &'a ResourceContainer,
    ) -> BoxFuture<'a, TransferResult<ImportReport>>;
}

/// Error for a container of the wrong kind.
pub(crate) fn unexpected_container(expected: DataType, container: &ResourceContainer) -> TransferError {
    TransferError::internal(format!(
        "expected a {} container, got {}",
        expected,
        container.data_type()
    ))
}
