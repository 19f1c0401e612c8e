//! SeaORM repositories for the coordination tables

pub mod execute_task;
pub mod task;

pub use execute_task::ExecuteTaskSeaOrmRepository;
pub use task::{Permit, TaskSeaOrmRepository};
