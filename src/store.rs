//! Storage for greylist records.
//!
//! The decision engine only ever sees the [`GreylistStore`] trait: a lookup
//! by triple, an insert, and a counter update. [`SeaOrmStore`] implements it
//! over a sea-orm connection; [`RetryingStore`] wraps any implementation
//! with a bounded blind-retry policy for mutations, which absorbs transient
//! lock contention on embedded backends such as SQLite. Backends with
//! native transactional retry can run the plain adapter instead.

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use entity::{greylist, prelude::Greylist};
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] DbErr),
    #[error("store unavailable after {attempts} attempts: {last}")]
    Unavailable { attempts: u32, last: DbErr },
}

/// Field values for a record that does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub client_address: String,
    pub client_name: String,
    pub sender: String,
    pub recipient: String,
    pub first_seen: DateTime<Utc>,
    pub seen_count: i64,
    pub accepted_count: i64,
}

#[async_trait]
pub trait GreylistStore: Send + Sync {
    /// Exact, case-sensitive match on the triple. Zero rows is `Ok(None)`.
    async fn find_by_triple(
        &self,
        client_address: &str,
        sender: &str,
        recipient: &str,
    ) -> Result<Option<greylist::Model>, StoreError>;

    async fn insert(&self, record: NewRecord) -> Result<i32, StoreError>;

    async fn update_counts(
        &self,
        id: i32,
        seen_count: i64,
        accepted_count: i64,
    ) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct SeaOrmStore {
    // Arc because `DatabaseConnection` is not `Clone` when sea-orm's
    // `mock` feature is enabled (as it is for the test builds).
    db: Arc<DatabaseConnection>,
}

impl SeaOrmStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db: Arc::new(db) }
    }
}

#[async_trait]
impl GreylistStore for SeaOrmStore {
    async fn find_by_triple(
        &self,
        client_address: &str,
        sender: &str,
        recipient: &str,
    ) -> Result<Option<greylist::Model>, StoreError> {
        let found = Greylist::find()
            .filter(greylist::Column::ClientAddress.eq(client_address))
            .filter(greylist::Column::Sender.eq(sender))
            .filter(greylist::Column::Recipient.eq(recipient))
            .one(&*self.db)
            .await?;

        Ok(found)
    }

    async fn insert(&self, record: NewRecord) -> Result<i32, StoreError> {
        let model = greylist::ActiveModel {
            client_address: Set(record.client_address),
            client_name: Set(record.client_name),
            sender: Set(record.sender),
            recipient: Set(record.recipient),
            first_seen: Set(record.first_seen),
            seen_count: Set(record.seen_count),
            accepted_count: Set(record.accepted_count),
            ..Default::default()
        };

        let inserted = Greylist::insert(model).exec(&*self.db).await?;

        Ok(inserted.last_insert_id)
    }

    async fn update_counts(
        &self,
        id: i32,
        seen_count: i64,
        accepted_count: i64,
    ) -> Result<(), StoreError> {
        let result = Greylist::update_many()
            .col_expr(greylist::Column::SeenCount, Expr::value(seen_count))
            .col_expr(greylist::Column::AcceptedCount, Expr::value(accepted_count))
            .filter(greylist::Column::Id.eq(id))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            debug!(id, "no greylist record matched the counter update");
        }

        Ok(())
    }
}

/// Bounded blind retry with a fixed inter-attempt delay, matching the
/// historical 10-attempts/1-second behavior.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_secs(1),
        }
    }
}

/// Retries mutations against the wrapped store. Lookups pass through
/// un-retried; a failed lookup is an immediate error.
#[derive(Clone)]
pub struct RetryingStore<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S> RetryingStore<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    async fn retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, StoreError>> + Send,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(StoreError::Db(e)) if attempt < self.policy.max_attempts => {
                    debug!(what, attempt, error = %e, "store mutation failed, retrying");
                    tokio::time::sleep(self.policy.delay).await;
                    attempt += 1;
                }
                Err(StoreError::Db(e)) => {
                    return Err(StoreError::Unavailable {
                        attempts: attempt,
                        last: e,
                    })
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<S: GreylistStore> GreylistStore for RetryingStore<S> {
    async fn find_by_triple(
        &self,
        client_address: &str,
        sender: &str,
        recipient: &str,
    ) -> Result<Option<greylist::Model>, StoreError> {
        self.inner
            .find_by_triple(client_address, sender, recipient)
            .await
    }

    async fn insert(&self, record: NewRecord) -> Result<i32, StoreError> {
        self.retry("insert", || self.inner.insert(record.clone()))
            .await
    }

    async fn update_counts(
        &self,
        id: i32,
        seen_count: i64,
        accepted_count: i64,
    ) -> Result<(), StoreError> {
        self.retry("update_counts", || {
            self.inner.update_counts(id, seen_count, accepted_count)
        })
        .await
    }
}
