//! The greylist decision engine.
//!
//! Classifies one request as `New`, `Cooling`, `Okay`, or `Error` and issues
//! the matching store mutation. All store failures are absorbed here and
//! surface only as the `Error` outcome; callers never see raw store errors.

use tracing::{debug, error};

use crate::request::PolicyRequest;
use crate::store::{GreylistStore, NewRecord};

/// Exactly one outcome is produced per evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// First observation of the triple; a record was created. Defer.
    New,
    /// Seen before, but the cooldown has not elapsed yet. Defer.
    Cooling,
    /// Cooldown elapsed. Permit.
    Okay,
    /// The store failed; fail open and permit.
    Error,
}

pub async fn evaluate<S>(store: &S, request: &PolicyRequest, cooldown_seconds: i64) -> Outcome
where
    S: GreylistStore + ?Sized,
{
    let existing = match store
        .find_by_triple(&request.client_address, &request.sender, &request.recipient)
        .await
    {
        Ok(existing) => existing,
        Err(e) => {
            error!(error = %e, "greylist lookup failed");
            return Outcome::Error;
        }
    };

    let Some(record) = existing else {
        // Creation counts as the first observation.
        let record = NewRecord {
            client_address: request.client_address.clone(),
            client_name: request.client_name.clone(),
            sender: request.sender.clone(),
            recipient: request.recipient.clone(),
            first_seen: request.timestamp,
            seen_count: 1,
            accepted_count: 0,
        };
        return match store.insert(record).await {
            Ok(_) => Outcome::New,
            Err(e) => {
                error!(error = %e, "unable to insert new greylist record");
                Outcome::Error
            }
        };
    };

    // The cooldown is measured from first contact; first_seen is never
    // updated, so a triple that has cooled once stays accepted. Negative
    // elapsed (clock skew) lands in the cooling branch.
    let elapsed = (request.timestamp - record.first_seen).num_seconds();
    debug!(
        elapsed,
        cooldown_seconds, "request has been on ice, checking cooldown"
    );

    let seen_count = record.seen_count + 1;
    let (accepted_count, outcome) = if elapsed < cooldown_seconds {
        (record.accepted_count, Outcome::Cooling)
    } else {
        (record.accepted_count + 1, Outcome::Okay)
    };

    if let Err(e) = store
        .update_counts(record.id, seen_count, accepted_count)
        .await
    {
        error!(error = %e, id = record.id, "unable to update greylist counts");
        return Outcome::Error;
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use entity::greylist;
    use sea_orm::DbErr;
    use std::sync::Mutex;

    /// Store backed by a Vec, with switchable failure injection.
    #[derive(Default)]
    struct MemoryStore {
        records: Mutex<Vec<greylist::Model>>,
        fail_lookup: bool,
        fail_insert: bool,
        fail_update: bool,
    }

    impl MemoryStore {
        fn with_record(record: greylist::Model) -> Self {
            let store = Self::default();
            store.records.lock().unwrap().push(record);
            store
        }

        fn record(&self) -> greylist::Model {
            self.records.lock().unwrap()[0].clone()
        }

        fn len(&self) -> usize {
            self.records.lock().unwrap().len()
        }
    }

    fn broken() -> StoreError {
        StoreError::Db(DbErr::Custom("database is locked".into()))
    }

    #[async_trait]
    impl GreylistStore for MemoryStore {
        async fn find_by_triple(
            &self,
            client_address: &str,
            sender: &str,
            recipient: &str,
        ) -> Result<Option<greylist::Model>, StoreError> {
            if self.fail_lookup {
                return Err(broken());
            }
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .find(|r| {
                    r.client_address == client_address
                        && r.sender == sender
                        && r.recipient == recipient
                })
                .cloned())
        }

        async fn insert(&self, record: NewRecord) -> Result<i32, StoreError> {
            if self.fail_insert {
                return Err(broken());
            }
            let mut records = self.records.lock().unwrap();
            let id = records.len() as i32 + 1;
            records.push(greylist::Model {
                id,
                client_address: record.client_address,
                client_name: record.client_name,
                sender: record.sender,
                recipient: record.recipient,
                first_seen: record.first_seen,
                seen_count: record.seen_count,
                accepted_count: record.accepted_count,
            });
            Ok(id)
        }

        async fn update_counts(
            &self,
            id: i32,
            seen_count: i64,
            accepted_count: i64,
        ) -> Result<(), StoreError> {
            if self.fail_update {
                return Err(broken());
            }
            let mut records = self.records.lock().unwrap();
            if let Some(record) = records.iter_mut().find(|r| r.id == id) {
                record.seen_count = seen_count;
                record.accepted_count = accepted_count;
            }
            Ok(())
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, 12, 0, 0).unwrap()
    }

    fn request_at(timestamp: DateTime<Utc>) -> PolicyRequest {
        PolicyRequest {
            client_address: "10.0.0.5".to_owned(),
            client_name: "relay.example.org".to_owned(),
            sender: "a@x.com".to_owned(),
            recipient: "b@y.com".to_owned(),
            timestamp,
        }
    }

    #[tokio::test]
    async fn unseen_triple_is_new() {
        let store = MemoryStore::default();

        let outcome = evaluate(&store, &request_at(t0()), 120).await;

        assert_eq!(outcome, Outcome::New);
        assert_eq!(store.len(), 1);
        let record = store.record();
        assert_eq!(record.first_seen, t0());
        assert_eq!(record.seen_count, 1);
        assert_eq!(record.accepted_count, 0);
    }

    #[tokio::test]
    async fn second_observation_within_cooldown_cools() {
        let store = MemoryStore::default();
        evaluate(&store, &request_at(t0()), 120).await;

        let outcome = evaluate(&store, &request_at(t0() + Duration::seconds(60)), 120).await;

        assert_eq!(outcome, Outcome::Cooling);
        let record = store.record();
        assert_eq!(record.seen_count, 2);
        assert_eq!(record.accepted_count, 0);
        assert_eq!(record.first_seen, t0());
    }

    #[tokio::test]
    async fn observation_after_cooldown_is_accepted() {
        let store = MemoryStore::default();
        evaluate(&store, &request_at(t0()), 120).await;
        evaluate(&store, &request_at(t0() + Duration::seconds(60)), 120).await;

        let outcome = evaluate(&store, &request_at(t0() + Duration::seconds(125)), 120).await;

        assert_eq!(outcome, Outcome::Okay);
        let record = store.record();
        assert_eq!(record.seen_count, 3);
        assert_eq!(record.accepted_count, 1);
    }

    #[tokio::test]
    async fn cooldown_boundary_favors_acceptance() {
        let store = MemoryStore::default();
        evaluate(&store, &request_at(t0()), 120).await;

        let outcome = evaluate(&store, &request_at(t0() + Duration::seconds(120)), 120).await;

        assert_eq!(outcome, Outcome::Okay);
        assert_eq!(store.record().accepted_count, 1);
    }

    #[tokio::test]
    async fn negative_elapsed_still_cools() {
        let store = MemoryStore::default();
        evaluate(&store, &request_at(t0()), 120).await;

        let outcome = evaluate(&store, &request_at(t0() - Duration::seconds(5)), 120).await;

        assert_eq!(outcome, Outcome::Cooling);
        assert_eq!(store.record().accepted_count, 0);
    }

    #[tokio::test]
    async fn seen_count_matches_observation_count() {
        let store = MemoryStore::default();
        for offset in [0, 30, 60, 200] {
            evaluate(&store, &request_at(t0() + Duration::seconds(offset)), 120).await;
        }

        let record = store.record();
        assert_eq!(record.seen_count, 4);
        assert_eq!(record.accepted_count, 1);
    }

    #[tokio::test]
    async fn acceptance_is_sticky() {
        let store = MemoryStore::default();
        evaluate(&store, &request_at(t0()), 120).await;
        evaluate(&store, &request_at(t0() + Duration::seconds(120)), 120).await;

        // Measured from first contact, never reset: still Okay.
        let outcome = evaluate(&store, &request_at(t0() + Duration::seconds(121)), 120).await;

        assert_eq!(outcome, Outcome::Okay);
        assert_eq!(store.record().accepted_count, 2);
    }

    #[tokio::test]
    async fn lookup_failure_is_error_with_no_mutation() {
        let store = MemoryStore {
            fail_lookup: true,
            ..Default::default()
        };

        let outcome = evaluate(&store, &request_at(t0()), 120).await;

        assert_eq!(outcome, Outcome::Error);
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn insert_failure_is_error() {
        let store = MemoryStore {
            fail_insert: true,
            ..Default::default()
        };

        assert_eq!(evaluate(&store, &request_at(t0()), 120).await, Outcome::Error);
    }

    #[tokio::test]
    async fn update_failure_is_error() {
        let store = MemoryStore {
            fail_update: true,
            ..MemoryStore::with_record(greylist::Model {
                id: 1,
                client_address: "10.0.0.5".to_owned(),
                client_name: "relay.example.org".to_owned(),
                sender: "a@x.com".to_owned(),
                recipient: "b@y.com".to_owned(),
                first_seen: t0(),
                seen_count: 1,
                accepted_count: 0,
            })
        };

        let outcome = evaluate(&store, &request_at(t0() + Duration::seconds(60)), 120).await;

        assert_eq!(outcome, Outcome::Error);
    }
}
