use carryover_core::{CalendarEventModel, CalendarModel, DataType, ResourceContainer};
use tracing::info;

use super::{first_line, path_segment, to_document};
use crate::BoxFuture;
use crate::auth::AuthData;
use crate::destination::{DestinationClient, DestinationClientFactory};
use crate::error::TransferResult;
use crate::executor::IdempotentImportExecutor;
use crate::importer::{Importer, unexpected_container};
use crate::pipeline::{ImportReport, ResourceHandler, ResourceImportPipeline};

const CALENDAR_FOLDER: &str = "calendar";
/// Folder for events whose calendar is unknown.
const ORPHAN_EVENTS_FOLDER: &str = "calendar_event";
const CALENDAR_DOCUMENT: &str = "calendar.json";

/// Imports calendars and events as JSON documents, one folder per
/// calendar.
pub struct CalendarImporter {
    clients: DestinationClientFactory,
}

impl CalendarImporter {
    pub fn new(clients: DestinationClientFactory) -> Self {
        Self { clients }
    }
}

impl Importer for CalendarImporter {
    fn data_type(&self) -> DataType {
        DataType::Calendar
    }

    fn import_item<'a>(
        &'a self,
        job_id: &'a str,
        executor: &'a dyn IdempotentImportExecutor,
        auth_data: &'a AuthData,
        container: &'a ResourceContainer,
    ) -> BoxFuture<'a, TransferResult<ImportReport>> {
        Box::pin(async move {
            let ResourceContainer::Calendar(calendars) = container else {
                return Err(unexpected_container(DataType::Calendar, container));
            };
            let client = self.clients.create(auth_data)?;
            info!(
                job_id = %job_id,
                calendars = calendars.calendars.len(),
                events = calendars.events.len(),
                "importing calendars"
            );
            let handler = CalendarHandler { client: &client };
            ResourceImportPipeline::new(DataType::Calendar, &handler, executor)
                .run(&calendars.calendars, &calendars.events)
                .await
        })
    }
}

struct CalendarHandler<'a> {
    client: &'a DestinationClient,
}

/// Document name for an event: its title's first line plus its id.
pub(crate) fn event_document_name(event: &CalendarEventModel) -> String {
    let title = event
        .title
        .as_deref()
        .map(first_line)
        .filter(|t| !t.trim().is_empty())
        .unwrap_or("untitled event");
    format!("{}--{}.json", path_segment(title, "untitled event"), event.id)
}

impl ResourceHandler for CalendarHandler<'_> {
    type Parent = CalendarModel;
    type Child = CalendarEventModel;

    fn parent_key(&self, calendar: &CalendarModel) -> String {
        calendar.id.clone()
    }

    fn parent_name(&self, calendar: &CalendarModel) -> String {
        calendar.name.clone()
    }

    fn create_parent<'a>(
        &'a self,
        calendar: &'a CalendarModel,
    ) -> BoxFuture<'a, TransferResult<String>> {
        Box::pin(async move {
            let folder = format!(
                "{}/{}",
                CALENDAR_FOLDER,
                path_segment(&calendar.name, &calendar.id)
            );
            let document = to_document(calendar, "calendar")?;
            self.client
                .upload_json(&folder, CALENDAR_DOCUMENT, &document)
                .await?;
            Ok(folder)
        })
    }

    fn child_key(&self, event: &CalendarEventModel) -> String {
        match event.calendar_id {
            Some(ref calendar_id) => format!("{}-{}", calendar_id, event.id),
            None => event.id.clone(),
        }
    }

    fn child_name(&self, event: &CalendarEventModel) -> String {
        event
            .title
            .clone()
            .unwrap_or_else(|| event.id.clone())
    }

    fn child_parent_key(&self, event: &CalendarEventModel) -> Option<String> {
        event.calendar_id.clone()
    }

    fn create_child<'a>(
        &'a self,
        event: &'a CalendarEventModel,
        parent_path: Option<&'a str>,
    ) -> BoxFuture<'a, TransferResult<String>> {
        Box::pin(async move {
            let folder = parent_path.unwrap_or(ORPHAN_EVENTS_FOLDER);
            let document = to_document(event, "calendar event")?;
            self.client
                .upload_json(folder, &event_document_name(event), &document)
                .await
        })
    }
}
