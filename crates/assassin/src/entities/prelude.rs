pub use super::dedup_key::Entity as DedupKeys;
pub use super::execute_task::Entity as ExecuteTasks;
pub use super::task::Entity as Tasks;
