//! Task definition administration
//!
//! Trigger kind and spec are compiled before anything is written, so a row
//! that reaches the database always reconciles.

use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use tracing::info;

use crate::errors::{AppError, AppResult, RepositoryError};
use crate::models::{CreateTaskRequest, ExecutionRecord, TaskDefinition, UpdateTaskRequest};
use crate::web::{
    AppState,
    responses::{ApiResponse, Page, ok},
};

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
    pub size: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TaskIdQuery {
    pub task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubTaskQuery {
    pub task_id: Option<String>,
    pub page: Option<String>,
    pub size: Option<String>,
}

/// `GET /assassin/tasks`
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> AppResult<ApiResponse<Page<TaskDefinition>>> {
    let (page, size) = parse_paging(
        query.page.as_deref(),
        query.size.as_deref(),
        state.default_page_size,
    )?;
    let (data, total) = state.tasks.list_page(page, size).await?;

    Ok(ok(Page {
        page,
        size,
        total,
        data,
    }))
}

/// `GET /assassin/task`
pub async fn get_task(
    State(state): State<AppState>,
    Query(query): Query<TaskIdQuery>,
) -> AppResult<ApiResponse<TaskDefinition>> {
    let task_id = parse_task_id(query.task_id.as_deref())?;
    let task = state
        .tasks
        .find_by_id(task_id)
        .await?
        .ok_or_else(|| AppError::not_found("task_id", task_id))?;
    Ok(ok(task))
}

/// `POST /assassin/task`; answers with the id of the new row
pub async fn create_task(
    State(state): State<AppState>,
    Json(request): Json<CreateTaskRequest>,
) -> AppResult<ApiResponse<i32>> {
    validate_trigger(&state, &request.trigger_kind, &request.spec)?;

    // The unique index on task_key settles concurrent creates
    let task = match state.tasks.create(request).await {
        Ok(task) => task,
        Err(RepositoryError::Duplicate { value, .. }) => {
            return Err(AppError::validation(format!(
                "task_key: `{value}` has existed, pls retry"
            )));
        }
        Err(e) => return Err(e.into()),
    };
    info!(task_id = task.id, task_key = %task.task_key, "task definition created");
    Ok(ok(task.id))
}

/// `PUT /assassin/task`
pub async fn update_task(
    State(state): State<AppState>,
    Json(request): Json<UpdateTaskRequest>,
) -> AppResult<ApiResponse<()>> {
    validate_trigger(&state, &request.trigger_kind, &request.spec)?;

    if state.tasks.find_by_id(request.task_id).await?.is_none() {
        return Err(AppError::not_found("task_id", request.task_id));
    }

    let task = state.tasks.update(request).await?;
    info!(task_id = task.id, task_key = %task.task_key, "task definition updated");
    Ok(ok(()))
}

/// `GET /assassin/sub_tasks`: execution records of one task, newest first
pub async fn list_sub_tasks(
    State(state): State<AppState>,
    Query(query): Query<SubTaskQuery>,
) -> AppResult<ApiResponse<Page<ExecutionRecord>>> {
    let task_id = parse_task_id(query.task_id.as_deref())?;
    let (page, size) = parse_paging(
        query.page.as_deref(),
        query.size.as_deref(),
        state.default_page_size,
    )?;
    let (data, total) = state
        .executions
        .list_page_for_task(task_id, page, size)
        .await?;

    Ok(ok(Page {
        page,
        size,
        total,
        data,
    }))
}

fn validate_trigger(state: &AppState, trigger_kind: &str, spec: &str) -> AppResult<()> {
    state
        .compiler
        .validate(trigger_kind, spec)
        .map(|_| ())
        .map_err(|_| {
            AppError::validation(format!(
                "Trigger:`{trigger_kind}` and Spec:`{spec}` does not match"
            ))
        })
}

fn parse_paging(page: Option<&str>, size: Option<&str>, default_size: u64) -> AppResult<(u64, u64)> {
    let invalid = || AppError::validation("page and size should be int");
    let page = match page {
        Some(raw) => raw.trim().parse::<u64>().map_err(|_| invalid())?,
        None => 1,
    };
    let size = match size {
        Some(raw) => raw.trim().parse::<u64>().map_err(|_| invalid())?,
        None => default_size,
    };
    Ok((page.max(1), size.max(1)))
}

fn parse_task_id(raw: Option<&str>) -> AppResult<i32> {
    let raw = raw.unwrap_or_default();
    raw.trim()
        .parse::<i32>()
        .map_err(|_| AppError::not_found("task_id", raw))
}
