use carryover_core::{DataType, ResourceContainer, TaskListModel, TaskModel};
use tracing::info;

use super::{first_line, path_segment, to_document};
use crate::BoxFuture;
use crate::auth::AuthData;
use crate::destination::{DestinationClient, DestinationClientFactory};
use crate::error::TransferResult;
use crate::executor::IdempotentImportExecutor;
use crate::importer::{Importer, unexpected_container};
use crate::pipeline::{ImportReport, ResourceHandler, ResourceImportPipeline};

const TASKS_FOLDER: &str = "tasks";
const LIST_DOCUMENT: &str = "list.json";

/// Imports task lists and tasks as JSON documents.
pub struct TasksImporter {
    clients: DestinationClientFactory,
}

impl TasksImporter {
    pub fn new(clients: DestinationClientFactory) -> Self {
        Self { clients }
    }
}

impl Importer for TasksImporter {
    fn data_type(&self) -> DataType {
        DataType::Tasks
    }

    fn import_item<'a>(
        &'a self,
        job_id: &'a str,
        executor: &'a dyn IdempotentImportExecutor,
        auth_data: &'a AuthData,
        container: &'a ResourceContainer,
    ) -> BoxFuture<'a, TransferResult<ImportReport>> {
        Box::pin(async move {
            let ResourceContainer::Tasks(tasks) = container else {
                return Err(unexpected_container(DataType::Tasks, container));
            };
            let client = self.clients.create(auth_data)?;
            info!(
                job_id = %job_id,
                lists = tasks.lists.len(),
                tasks = tasks.tasks.len(),
                "importing tasks"
            );
            let handler = TaskHandler { client: &client };
            ResourceImportPipeline::new(DataType::Tasks, &handler, executor)
                .run(&tasks.lists, &tasks.tasks)
                .await
        })
    }
}

struct TaskHandler<'a> {
    client: &'a DestinationClient,
}

pub(crate) fn task_document_name(task: &TaskModel) -> String {
    let text = task
        .text
        .as_deref()
        .map(first_line)
        .filter(|t| !t.trim().is_empty())
        .unwrap_or("untitled task");
    format!("{}--{}.json", path_segment(text, "untitled task"), task.id)
}

impl ResourceHandler for TaskHandler<'_> {
    type Parent = TaskListModel;
    type Child = TaskModel;

    fn parent_key(&self, list: &TaskListModel) -> String {
        list.id.clone()
    }

    fn parent_name(&self, list: &TaskListModel) -> String {
        list.name.clone()
    }

    fn create_parent<'a>(&'a self, list: &'a TaskListModel) -> BoxFuture<'a, TransferResult<String>> {
        Box::pin(async move {
            let folder = format!("{}/{}", TASKS_FOLDER, path_segment(&list.name, &list.id));
            let document = to_document(list, "task list")?;
            self.client
                .upload_json(&folder, LIST_DOCUMENT, &document)
                .await?;
            Ok(folder)
        })
    }

    fn child_key(&self, task: &TaskModel) -> String {
        match task.task_list_id {
            Some(ref list_id) => format!("{}-{}", list_id, task.id),
            None => task.id.clone(),
        }
    }

    fn child_name(&self, task: &TaskModel) -> String {
        task.text.clone().unwrap_or_else(|| task.id.clone())
    }

    fn child_parent_key(&self, task: &TaskModel) -> Option<String> {
        task.task_list_id.clone()
    }

    fn create_child<'a>(
        &'a self,
        task: &'a TaskModel,
        parent_path: Option<&'a str>,
    ) -> BoxFuture<'a, TransferResult<String>> {
        Box::pin(async move {
            let folder = parent_path.unwrap_or(TASKS_FOLDER);
            let document = to_document(task, "task")?;
            self.client
                .upload_json(folder, &task_document_name(task), &document)
                .await
        })
    }
}
