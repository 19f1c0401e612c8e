use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        self.create_task_table(manager).await?;
        self.create_execute_task_table(manager).await?;
        self.create_dedup_key_table(manager).await?;
        self.create_indexes(manager).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DedupKey::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ExecuteTask::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Task::Table).to_owned())
            .await?;
        Ok(())
    }
}

impl Migration {
    fn create_id_column(&self, column: impl IntoIden) -> ColumnDef {
        let mut col = ColumnDef::new(column);
        col.integer().not_null().auto_increment().primary_key();
        col
    }

    fn create_timestamp_column(&self, column: impl IntoIden) -> ColumnDef {
        let mut col = ColumnDef::new(column);
        col.timestamp_with_time_zone().not_null();
        col
    }

    async fn create_task_table(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Task::Table)
                    .if_not_exists()
                    .col(self.create_id_column(Task::Id))
                    .col(
                        ColumnDef::new(Task::TaskKey)
                            .string_len(128)
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(Task::Description)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(Task::ExecuteFunc).string().not_null())
                    .col(ColumnDef::new(Task::TriggerKind).string_len(16).not_null())
                    .col(ColumnDef::new(Task::Spec).string().not_null())
                    .col(ColumnDef::new(Task::Args).text().not_null())
                    .col(
                        ColumnDef::new(Task::IsValid)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Task::Status)
                            .string_len(16)
                            .not_null()
                            .default("ready"),
                    )
                    .col(ColumnDef::new(Task::Extra).json().not_null())
                    .col(self.create_timestamp_column(Task::CreatedAt))
                    .col(self.create_timestamp_column(Task::UpdatedAt))
                    .to_owned(),
            )
            .await
    }

    async fn create_execute_task_table(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ExecuteTask::Table)
                    .if_not_exists()
                    .col(self.create_id_column(ExecuteTask::Id))
                    .col(ColumnDef::new(ExecuteTask::TaskId).integer().not_null())
                    .col(ColumnDef::new(ExecuteTask::Status).string_len(16).not_null())
                    .col(ColumnDef::new(ExecuteTask::Extra).json().not_null())
                    .col(ColumnDef::new(ExecuteTask::TraceId).string_len(64).not_null())
                    .col(self.create_timestamp_column(ExecuteTask::CreatedAt))
                    .col(self.create_timestamp_column(ExecuteTask::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_execute_task_task_id")
                            .from(ExecuteTask::Table, ExecuteTask::TaskId)
                            .to(Task::Table, Task::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn create_dedup_key_table(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DedupKey::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DedupKey::Key)
                            .string_len(191)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DedupKey::Value).string().not_null())
                    .col(self.create_timestamp_column(DedupKey::ExpiresAt))
                    .to_owned(),
            )
            .await
    }

    async fn create_indexes(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_index(
                Index::create()
                    .name("idx_task_status_is_valid")
                    .table(Task::Table)
                    .col(Task::Status)
                    .col(Task::IsValid)
                    .to_owned(),
            )
            .await?;
        // latest-execution lookups per task
        manager
            .create_index(
                Index::create()
                    .name("idx_execute_task_task_id_id")
                    .table(ExecuteTask::Table)
                    .col(ExecuteTask::TaskId)
                    .col(ExecuteTask::Id)
                    .to_owned(),
            )
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Task {
    Table,
    Id,
    TaskKey,
    Description,
    ExecuteFunc,
    TriggerKind,
    Spec,
    Args,
    IsValid,
    Status,
    Extra,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum ExecuteTask {
    Table,
    Id,
    TaskId,
    Status,
    Extra,
    TraceId,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum DedupKey {
    Table,
    Key,
    Value,
    ExpiresAt,
}
