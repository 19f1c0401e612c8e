//! Centralized error handling
//!
//! # Error Categories
//!
//! - **Database Errors**: SeaORM operations, migrations, connection issues
//! - **Repository Errors**: Data access layer failures
//! - **Trigger Errors**: trigger kind / spec pairs that do not compile
//! - **Validation Errors**: admin input rejected before persistence
//! - **Scheduling Errors**: in-process job table mutations

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for Repository Results
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Convenience type alias for Trigger Compiler Results
pub type TriggerResult<T> = Result<T, TriggerError>;
