//! One import pass for one resource kind.
//!
//! The pipeline creates every parent (album, calendar, task list) before
//! any child, so children can read their parent's destination path from
//! the executor cache. Each step runs through the
//! [`IdempotentImportExecutor`], keyed by a stable import key, so running
//! the same container twice creates nothing new.
//!
//! ```text
//! ParentsPending ──▶ ParentsDone ──▶ ItemsPending ──▶ Complete
//!                         │                │
//!                         └──▶ PartialFailure ◀┘
//! ```

use std::fmt;

use carryover_core::DataType;
use tracing::{debug, info};

use crate::BoxFuture;
use crate::error::{ImportError, TransferError, TransferErrorCode, TransferResult};
use crate::executor::IdempotentImportExecutor;

/// Where an import pass is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    ParentsPending,
    ParentsDone,
    ItemsPending,
    Complete,
    /// At least one parent or item failed and was recorded.
    PartialFailure,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ParentsPending => "parents_pending",
            Self::ParentsDone => "parents_done",
            Self::ItemsPending => "items_pending",
            Self::Complete => "complete",
            Self::PartialFailure => "partial_failure",
        };
        f.write_str(s)
    }
}

/// The result of importing one parent or item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    pub key: String,
    pub display_name: String,
    /// The destination identifier, or why the import failed.
    pub result: Result<String, ImportError>,
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-pass record of what was imported and what failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub data_type: DataType,
    pub state: PipelineState,
    pub parents: Vec<ItemOutcome>,
    pub items: Vec<ItemOutcome>,
}

impl ImportReport {
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            state: PipelineState::ParentsPending,
            parents: Vec::new(),
            items: Vec::new(),
        }
    }

    /// Returns true if every parent and item was imported.
    pub fn is_complete(&self) -> bool {
        self.state == PipelineState::Complete
    }

    /// Returns all failed parents and items.
    pub fn failures(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.parents
            .iter()
            .chain(self.items.iter())
            .filter(|o| !o.is_success())
    }

    /// Returns the destination identifier recorded for `key`.
    pub fn destination(&self, key: &str) -> Option<&str> {
        self.parents
            .iter()
            .chain(self.items.iter())
            .find(|o| o.key == key)
            .and_then(|o| o.result.as_deref().ok())
    }

    fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }
}

/// How one resource kind maps onto destination operations.
pub trait ResourceHandler: Send + Sync {
    type Parent: Send + Sync;
    type Child: Send + Sync;

    fn parent_key(&self, parent: &Self::Parent) -> String;

    fn parent_name(&self, parent: &Self::Parent) -> String;

    /// Creates the parent on the destination and returns its path.
    ///
    /// Must tolerate the parent already existing.
    fn create_parent<'a>(&'a self, parent: &'a Self::Parent)
    -> BoxFuture<'a, TransferResult<String>>;

    /// The child's import key. Must be the same on every run of the job.
    fn child_key(&self, child: &Self::Child) -> String;

    fn child_name(&self, child: &Self::Child) -> String;

    /// The import key of the parent this child nests under, if any.
    fn child_parent_key(&self, child: &Self::Child) -> Option<String>;

    /// Looks the child up on the destination, returning its identifier if
    /// it is already there.
    fn find_existing<'a>(
        &'a self,
        _child: &'a Self::Child,
        _parent_path: Option<&'a str>,
    ) -> BoxFuture<'a, TransferResult<Option<String>>> {
        Box::pin(async { Ok(None) })
    }

    /// Creates the child under `parent_path` and returns its identifier.
    fn create_child<'a>(
        &'a self,
        child: &'a Self::Child,
        parent_path: Option<&'a str>,
    ) -> BoxFuture<'a, TransferResult<String>>;
}

/// Drives one import pass of a [`ResourceHandler`].
pub struct ResourceImportPipeline<'a, H: ResourceHandler> {
    data_type: DataType,
    handler: &'a H,
    executor: &'a dyn IdempotentImportExecutor,
}

impl<'a, H: ResourceHandler> ResourceImportPipeline<'a, H> {
    pub fn new(
        data_type: DataType,
        handler: &'a H,
        executor: &'a dyn IdempotentImportExecutor,
    ) -> Self {
        Self {
            data_type,
            handler,
            executor,
        }
    }

    /// Imports all `parents`, then all `children`, in source order.
    ///
    /// Returns an error only for fatal failures; the remaining items are
    /// not attempted.
    pub async fn run(
        &self,
        parents: &[H::Parent],
        children: &[H::Child],
    ) -> TransferResult<ImportReport> {
        let mut report = ImportReport::new(self.data_type);
        debug!(
            data_type = %self.data_type,
            parents = parents.len(),
            children = children.len(),
            "starting import pass"
        );

        for parent in parents {
            let key = self.handler.parent_key(parent);
            let name = self.handler.parent_name(parent);
            let result = self
                .executor
                .execute_and_swallow(&key, &name, self.handler.create_parent(parent))
                .await?;
            report.parents.push(self.outcome(key, name, result));
        }
        self.advance(&mut report, PipelineState::ParentsDone);

        self.advance(&mut report, PipelineState::ItemsPending);
        for child in children {
            let key = self.handler.child_key(child);
            let name = self.handler.child_name(child);
            let result = self
                .executor
                .execute_and_swallow(&key, &name, self.import_child(child))
                .await?;
            report.items.push(self.outcome(key, name, result));
        }
        self.advance(&mut report, PipelineState::Complete);

        info!(
            data_type = %self.data_type,
            state = %report.state,
            failures = report.failures().count(),
            "import pass finished"
        );
        Ok(report)
    }

    fn import_child<'b>(&'b self, child: &'b H::Child) -> BoxFuture<'b, TransferResult<String>> {
        let handler = self.handler;
        let executor = self.executor;
        Box::pin(async move {
            let parent_path = match handler.child_parent_key(child) {
                Some(parent_key) => Some(executor.get_cached_value(&parent_key).ok_or_else(|| {
                    TransferError::missing_parent(format!(
                        "parent '{}' was not imported",
                        parent_key
                    ))
                })?),
                None => None,
            };

            if let Some(existing) = handler.find_existing(child, parent_path.as_deref()).await? {
                debug!(destination = %existing, "item already present at destination");
                return Ok(existing);
            }

            handler.create_child(child, parent_path.as_deref()).await
        })
    }

    fn outcome(&self, key: String, display_name: String, result: Option<String>) -> ItemOutcome {
        let result = match result {
            Some(destination) => Ok(destination),
            None => Err(self
                .executor
                .error_for(&key)
                .map(|f| f.error)
                .unwrap_or_else(|| ImportError {
                    code: TransferErrorCode::Internal,
                    message: "import failed without a recorded error".to_string(),
                })),
        };
        ItemOutcome {
            key,
            display_name,
            result,
        }
    }

    /// Moves to `next`, or to `PartialFailure` once anything failed.
    fn advance(&self, report: &mut ImportReport, next: PipelineState) {
        let next = if report.state == PipelineState::PartialFailure || report.has_failures() {
            PipelineState::PartialFailure
        } else {
            next
        };
        if next != report.state {
            debug!(data_type = %self.data_type, from = %report.state, to = %next, "pipeline state");
            report.state = next;
        }
    }
}
