//! SeaORM execution record repository
//!
//! Records are created and closed by the permit transactions in the task
//! repository; this side only reads them.

use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};
use std::sync::Arc;

use crate::entities::{execute_task, prelude::*};
use crate::errors::{RepositoryError, RepositoryResult};
use crate::models::{ExecutionRecord, ExecutionStatus};

#[derive(Clone)]
pub struct ExecuteTaskSeaOrmRepository {
    connection: Arc<DatabaseConnection>,
}

impl ExecuteTaskSeaOrmRepository {
    pub fn new(connection: Arc<DatabaseConnection>) -> Self {
        Self { connection }
    }

    pub async fn find_by_id(&self, id: i32) -> RepositoryResult<Option<ExecutionRecord>> {
        ExecuteTasks::find_by_id(id)
            .one(&*self.connection)
            .await?
            .map(Self::model_to_domain)
            .transpose()
    }

    /// Most recent execution record of a task
    pub async fn latest_for_task(&self, task_id: i32) -> RepositoryResult<Option<ExecutionRecord>> {
        ExecuteTasks::find()
            .filter(execute_task::Column::TaskId.eq(task_id))
            .order_by_desc(execute_task::Column::Id)
            .one(&*self.connection)
            .await?
            .map(Self::model_to_domain)
            .transpose()
    }

    /// One page (1-based) of a task's execution records, newest first
    pub async fn list_page_for_task(
        &self,
        task_id: i32,
        page: u64,
        size: u64,
    ) -> RepositoryResult<(Vec<ExecutionRecord>, u64)> {
        let paginator = ExecuteTasks::find()
            .filter(execute_task::Column::TaskId.eq(task_id))
            .order_by_desc(execute_task::Column::Id)
            .paginate(&*self.connection, size.max(1));

        let total = paginator.num_items().await?;
        let models = paginator.fetch_page(page.saturating_sub(1)).await?;
        let items = models
            .into_iter()
            .map(Self::model_to_domain)
            .collect::<RepositoryResult<Vec<_>>>()?;
        Ok((items, total))
    }

    fn model_to_domain(model: execute_task::Model) -> RepositoryResult<ExecutionRecord> {
        let status = model
            .status
            .parse::<ExecutionStatus>()
            .map_err(|_| RepositoryError::invalid_value("execute_task.status", &model.status))?;

        Ok(ExecutionRecord {
            id: model.id,
            task_id: model.task_id,
            status,
            extra: model.extra,
            trace_id: model.trace_id,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}
