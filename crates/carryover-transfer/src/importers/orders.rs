use carryover_core::{DataType, OrderModel, ResourceContainer};
use tracing::{debug, info};

use crate::BoxFuture;
use crate::auth::AuthData;
use crate::destination::{DestinationClient, DestinationClientFactory};
use crate::error::{TransferError, TransferResult};
use crate::executor::IdempotentImportExecutor;
use crate::importer::{Importer, unexpected_container};
use crate::pipeline::{ImportReport, ResourceHandler, ResourceImportPipeline};

/// Submits purchase orders to the destination's order endpoint, keyed by
/// order serial.
pub struct OrdersImporter {
    clients: DestinationClientFactory,
}

impl OrdersImporter {
    pub fn new(clients: DestinationClientFactory) -> Self {
        Self { clients }
    }
}

impl Importer for OrdersImporter {
    fn data_type(&self) -> DataType {
        DataType::Order
    }

    fn import_item<'a>(
        &'a self,
        job_id: &'a str,
        executor: &'a dyn IdempotentImportExecutor,
        auth_data: &'a AuthData,
        container: &'a ResourceContainer,
    ) -> BoxFuture<'a, TransferResult<ImportReport>> {
        Box::pin(async move {
            let ResourceContainer::Orders(orders) = container else {
                return Err(unexpected_container(DataType::Order, container));
            };
            let client = self.clients.create(auth_data)?;
            info!(job_id = %job_id, orders = orders.orders.len(), "importing orders");
            let handler = OrderHandler { client: &client };
            ResourceImportPipeline::new(DataType::Order, &handler, executor)
                .run(&[], &orders.orders)
                .await
        })
    }
}

/// Orders have no parent entity.
enum NoParent {}

struct OrderHandler<'a> {
    client: &'a DestinationClient,
}

impl ResourceHandler for OrderHandler<'_> {
    type Parent = NoParent;
    type Child = OrderModel;

    fn parent_key(&self, parent: &NoParent) -> String {
        match *parent {}
    }

    fn parent_name(&self, parent: &NoParent) -> String {
        match *parent {}
    }

    fn create_parent<'a>(&'a self, parent: &'a NoParent) -> BoxFuture<'a, TransferResult<String>> {
        match *parent {}
    }

    fn child_key(&self, order: &OrderModel) -> String {
        order.serial.clone()
    }

    fn child_name(&self, order: &OrderModel) -> String {
        order.item.clone()
    }

    fn child_parent_key(&self, _order: &OrderModel) -> Option<String> {
        None
    }

    fn create_child<'a>(
        &'a self,
        order: &'a OrderModel,
        _parent_path: Option<&'a str>,
    ) -> BoxFuture<'a, TransferResult<String>> {
        Box::pin(async move {
            let json = serde_json::to_string(order).map_err(|e| {
                TransferError::internal(format!("failed to serialize order {}: {}", order.serial, e))
            })?;
            self.client.import_order(&json).await?;
            debug!(serial = %order.serial, "imported order");
            Ok(order.serial.clone())
        })
    }
}
