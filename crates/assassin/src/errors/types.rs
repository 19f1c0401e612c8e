//! Error type definitions for the scheduler
//!
//! Expected outcomes of the coordination protocol (a lock held elsewhere, a
//! monitor window owned by a peer) are not errors and never appear here.

use thiserror::Error;

use crate::job_scheduling::types::JobSchedulingError;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Database-related errors (SeaORM)
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// Repository layer errors
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Input rejected before anything was persisted
    #[error("{message}")]
    Validation { message: String },

    /// Resource not found errors
    #[error("Not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    /// In-process scheduler errors
    #[error("Scheduling error: {0}")]
    Scheduling(#[from] JobSchedulingError),

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Repository layer specific errors
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// Database errors from SeaORM
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// A stored column holds a value the domain model does not know
    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    /// Insert rejected by a unique index
    #[error("Duplicate record: {table} with {field} = {value}")]
    Duplicate {
        table: String,
        field: String,
        value: String,
    },

    /// Record not found
    #[error("Record not found: {table} with {field} = {value}")]
    RecordNotFound {
        table: String,
        field: String,
        value: String,
    },
}

/// A trigger kind and spec that cannot be compiled into a schedule
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TriggerError {
    #[error("unknown trigger kind `{0}`")]
    UnknownKind(String),

    #[error("invalid date spec `{spec}`: {reason}")]
    InvalidDate { spec: String, reason: String },

    #[error("invalid interval spec `{spec}`: expected a non-negative number of seconds")]
    InvalidInterval { spec: String },

    #[error("invalid cron spec `{spec}`: {reason}")]
    InvalidCron { spec: String, reason: String },
}

impl AppError {
    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>, I: ToString>(resource: S, id: I) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.to_string(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl RepositoryError {
    pub fn record_not_found<T: ToString>(table: &str, field: &str, value: T) -> Self {
        Self::RecordNotFound {
            table: table.to_string(),
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    pub fn duplicate<T: ToString>(table: &str, field: &str, value: T) -> Self {
        Self::Duplicate {
            table: table.to_string(),
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    pub fn invalid_value<T: ToString>(field: &str, value: T) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        }
    }
}
