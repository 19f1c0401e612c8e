use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set, SqlErr, TransactionTrait,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use super::DedupCache;
use crate::entities::{dedup_key, prelude::*};

/// Dedup cache kept in the coordination store, shared by every instance
/// that points at the same database.
#[derive(Clone)]
pub struct DatabaseDedupCache {
    connection: Arc<DatabaseConnection>,
}

impl DatabaseDedupCache {
    pub fn new(connection: Arc<DatabaseConnection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl DedupCache for DatabaseDedupCache {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now();
        let expires_at = now + TimeDelta::from_std(ttl)?;

        let txn = self.connection.begin().await?;

        DedupKeys::delete_many()
            .filter(dedup_key::Column::Key.eq(key))
            .filter(dedup_key::Column::ExpiresAt.lte(now))
            .exec(&txn)
            .await?;

        let inserted = DedupKeys::insert(dedup_key::ActiveModel {
            key: Set(key.to_string()),
            value: Set(value.to_string()),
            expires_at: Set(expires_at),
        })
        .exec_without_returning(&txn)
        .await;

        match inserted {
            Ok(_) => {
                txn.commit().await?;
                Ok(true)
            }
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                txn.rollback().await?;
                trace!(key, "dedup key already held");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}
