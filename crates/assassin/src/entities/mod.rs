//! SeaORM entity definitions
//!
//! Generated-style entities for the coordination tables. Status and trigger
//! columns are plain strings here; `crate::models` owns their typed form.

pub mod prelude;

pub mod dedup_key;
pub mod execute_task;
pub mod task;
