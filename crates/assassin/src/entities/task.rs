use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "task")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub task_key: String,
    pub description: String,
    pub execute_func: String,
    pub trigger_kind: String,
    pub spec: String,
    pub args: String,
    pub is_valid: bool,
    pub status: String,
    pub extra: Json,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::execute_task::Entity")]
    ExecuteTask,
}

impl Related<super::execute_task::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ExecuteTask.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
