//! SeaORM Task repository implementation
//!
//! Besides plain CRUD this owns the two permit transactions: the task row is
//! the lock, `doing` is the held state and `ready` the available permit.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, SqlErr, TransactionTrait,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::entities::{execute_task, prelude::*, task};
use crate::errors::{RepositoryError, RepositoryResult};
use crate::models::{
    CreateTaskRequest, ExecutionStatus, TaskDefinition, TaskStatus, UpdateTaskRequest, merge_extra,
};

/// A permit taken by a successful acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permit {
    pub task_id: i32,
    /// Id of the execution record created with the permit
    pub token: i32,
}

/// SeaORM-based Task repository
#[derive(Clone)]
pub struct TaskSeaOrmRepository {
    connection: Arc<DatabaseConnection>,
}

impl TaskSeaOrmRepository {
    /// Create a new TaskSeaOrmRepository
    pub fn new(connection: Arc<DatabaseConnection>) -> Self {
        Self { connection }
    }

    /// Take the permit of `task_key` and open an execution record.
    ///
    /// Returns `None` when the row is missing, invalid, or already `doing`.
    pub async fn acquire_permit(
        &self,
        task_key: &str,
        trace_id: &str,
    ) -> RepositoryResult<Option<Permit>> {
        let txn = self.connection.begin().await?;

        let candidate = Tasks::find()
            .filter(task::Column::TaskKey.eq(task_key))
            .filter(task::Column::Status.eq(TaskStatus::Ready.as_str()))
            .filter(task::Column::IsValid.eq(true))
            .lock_exclusive()
            .one(&txn)
            .await?;

        let Some(candidate) = candidate else {
            txn.rollback().await?;
            return Ok(None);
        };

        let now = Utc::now();
        // Conditional on `ready` so that backends without row locks still
        // let exactly one racing transaction through.
        let flipped = Tasks::update_many()
            .col_expr(task::Column::Status, Expr::value(TaskStatus::Doing.as_str()))
            .col_expr(task::Column::UpdatedAt, Expr::value(now))
            .filter(task::Column::Id.eq(candidate.id))
            .filter(task::Column::Status.eq(TaskStatus::Ready.as_str()))
            .exec(&txn)
            .await?;

        if flipped.rows_affected != 1 {
            txn.rollback().await?;
            return Ok(None);
        }

        let record = execute_task::ActiveModel {
            task_id: Set(candidate.id),
            status: Set(ExecutionStatus::Todo.to_string()),
            extra: Set(Value::Object(Default::default())),
            trace_id: Set(trace_id.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        debug!(task_key, token = record.id, "permit acquired");
        Ok(Some(Permit {
            task_id: candidate.id,
            token: record.id,
        }))
    }

    /// Return the permit of `task_key` and close the execution record `token`
    /// with `status`, merging `patch` into its `extra`.
    pub async fn release_permit(
        &self,
        task_key: &str,
        token: i32,
        status: ExecutionStatus,
        patch: &Value,
    ) -> RepositoryResult<()> {
        let txn = self.connection.begin().await?;
        let now = Utc::now();

        Tasks::update_many()
            .col_expr(task::Column::Status, Expr::value(TaskStatus::Ready.as_str()))
            .col_expr(task::Column::UpdatedAt, Expr::value(now))
            .filter(task::Column::TaskKey.eq(task_key))
            .exec(&txn)
            .await?;

        let record = ExecuteTasks::find_by_id(token)
            .one(&txn)
            .await?
            .ok_or_else(|| RepositoryError::record_not_found("execute_task", "id", token))?;

        let mut extra = record.extra.clone();
        merge_extra(&mut extra, patch);

        let mut active_model: execute_task::ActiveModel = record.into();
        active_model.status = Set(status.to_string());
        active_model.extra = Set(extra);
        active_model.updated_at = Set(now);
        active_model.update(&txn).await?;

        txn.commit().await?;
        Ok(())
    }

    /// Reset permits orphaned by hard-terminated processes
    pub async fn reset_orphaned_permits(&self) -> RepositoryResult<u64> {
        let result = Tasks::update_many()
            .col_expr(task::Column::Status, Expr::value(TaskStatus::Ready.as_str()))
            .col_expr(task::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(task::Column::Status.eq(TaskStatus::Doing.as_str()))
            .filter(task::Column::IsValid.eq(true))
            .exec(&*self.connection)
            .await?;
        Ok(result.rows_affected)
    }

    /// Create a new task definition; a taken `task_key` is
    /// [`RepositoryError::Duplicate`]
    pub async fn create(&self, request: CreateTaskRequest) -> RepositoryResult<TaskDefinition> {
        let now = Utc::now();
        let task_key = request.task_key.clone();

        let active_model = task::ActiveModel {
            task_key: Set(request.task_key),
            description: Set(request.description),
            execute_func: Set(request.execute_func),
            trigger_kind: Set(request.trigger_kind),
            spec: Set(request.spec),
            args: Set(request.args),
            is_valid: Set(request.is_valid),
            status: Set(request.status.to_string()),
            extra: Set(request.extra),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        let model = match active_model.insert(&*self.connection).await {
            Ok(model) => model,
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                return Err(RepositoryError::duplicate("task", "task_key", task_key));
            }
            Err(e) => return Err(e.into()),
        };
        Self::model_to_domain(model)
    }

    /// Update an existing task definition
    pub async fn update(&self, request: UpdateTaskRequest) -> RepositoryResult<TaskDefinition> {
        let model = Tasks::find_by_id(request.task_id)
            .one(&*self.connection)
            .await?
            .ok_or_else(|| RepositoryError::record_not_found("task", "id", request.task_id))?;

        let mut active_model: task::ActiveModel = model.into();
        active_model.description = Set(request.description);
        active_model.trigger_kind = Set(request.trigger_kind);
        active_model.spec = Set(request.spec);
        active_model.args = Set(request.args);
        active_model.is_valid = Set(request.is_valid);
        active_model.status = Set(request.status.to_string());
        active_model.extra = Set(request.extra);
        active_model.updated_at = Set(Utc::now());

        let updated_model = active_model.update(&*self.connection).await?;
        Self::model_to_domain(updated_model)
    }

    /// Find task by ID
    pub async fn find_by_id(&self, id: i32) -> RepositoryResult<Option<TaskDefinition>> {
        Tasks::find_by_id(id)
            .one(&*self.connection)
            .await?
            .map(Self::model_to_domain)
            .transpose()
    }

    /// Find task by its unique key
    pub async fn find_by_task_key(&self, task_key: &str) -> RepositoryResult<Option<TaskDefinition>> {
        Tasks::find()
            .filter(task::Column::TaskKey.eq(task_key))
            .one(&*self.connection)
            .await?
            .map(Self::model_to_domain)
            .transpose()
    }

    /// All task definitions in id order
    pub async fn list_all(&self) -> RepositoryResult<Vec<TaskDefinition>> {
        let models = Tasks::find()
            .order_by_asc(task::Column::Id)
            .all(&*self.connection)
            .await?;
        models.into_iter().map(Self::model_to_domain).collect()
    }

    /// Task definitions that should be scheduled
    pub async fn list_valid(&self) -> RepositoryResult<Vec<TaskDefinition>> {
        let models = Tasks::find()
            .filter(task::Column::IsValid.eq(true))
            .order_by_asc(task::Column::Id)
            .all(&*self.connection)
            .await?;
        models.into_iter().map(Self::model_to_domain).collect()
    }

    /// One page (1-based) of task definitions, newest first, with the total count
    pub async fn list_page(&self, page: u64, size: u64) -> RepositoryResult<(Vec<TaskDefinition>, u64)> {
        let paginator = Tasks::find()
            .order_by_desc(task::Column::Id)
            .paginate(&*self.connection, size.max(1));

        let total = paginator.num_items().await?;
        let models = paginator.fetch_page(page.saturating_sub(1)).await?;
        let items = models
            .into_iter()
            .map(Self::model_to_domain)
            .collect::<RepositoryResult<Vec<_>>>()?;
        Ok((items, total))
    }

    /// Shallow-merge `patch` into the task's `extra`.
    ///
    /// The row is locked from read to write so a concurrent writer of `extra`
    /// is never overwritten with a stale copy.
    pub async fn merge_extra(&self, id: i32, patch: &Value) -> RepositoryResult<()> {
        let txn = self.connection.begin().await?;

        // Writing first makes SQLite take its write lock before the read
        Tasks::update_many()
            .col_expr(task::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(task::Column::Id.eq(id))
            .exec(&txn)
            .await?;

        let model = Tasks::find_by_id(id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| RepositoryError::record_not_found("task", "id", id))?;

        let mut extra = model.extra.clone();
        merge_extra(&mut extra, patch);

        let mut active_model: task::ActiveModel = model.into();
        active_model.extra = Set(extra);
        active_model.update(&txn).await?;

        txn.commit().await?;
        Ok(())
    }

    /// Convert SeaORM model to domain model
    fn model_to_domain(model: task::Model) -> RepositoryResult<TaskDefinition> {
        let status = model
            .status
            .parse::<TaskStatus>()
            .map_err(|_| RepositoryError::invalid_value("task.status", &model.status))?;

        Ok(TaskDefinition {
            id: model.id,
            task_key: model.task_key,
            description: model.description,
            execute_func: model.execute_func,
            trigger_kind: model.trigger_kind,
            spec: model.spec,
            args: model.args,
            is_valid: model.is_valid,
            status,
            extra: model.extra,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}
