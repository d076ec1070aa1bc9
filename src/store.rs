//! SQLite persistence for orders, payments and idempotency keys.

use std::time::Duration;

use chrono::{DateTime, Utc};
use deadpool_diesel::sqlite::{Manager, Pool};
use deadpool_diesel::PoolError;
use deadpool_diesel::Runtime;
use diesel::prelude::*;
use diesel::connection::SimpleConnection;
use diesel::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::models::{
    IdempotencyRecord, NewIdempotencyRecord, NewOrder, NewPayment, Order, Payment, PaymentStatus,
};
use crate::schema::{idempotency_keys, orders, payments};

// this embeds the migrations into the application binary
// the migration path is relative to the `CARGO_MANIFEST_DIR`
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/");

// Writers queue behind each other instead of failing with SQLITE_BUSY.
const CONNECTION_PRAGMAS: &str = "PRAGMA busy_timeout = 5000;";

/// How long an unfinished claim blocks its key before another request may
/// take it over.
pub const DEFAULT_CLAIM_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to build connection pool: {0}")]
    Build(String),
    #[error("connection pool error: {0}")]
    Pool(#[from] PoolError),
    #[error("database task failed: {0}")]
    Interact(String),
    #[error("migration failed: {0}")]
    Migration(String),
    #[error(transparent)]
    Query(#[from] diesel::result::Error),
}

impl StoreError {
    /// True when a unique index on `payments.order_id` rejected the write.
    pub fn is_open_payment_conflict(&self) -> bool {
        match self {
            StoreError::Query(diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                info,
            )) => info.message().contains("payments.order_id"),
            _ => false,
        }
    }
}

/// Result of trying to take ownership of an idempotency key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyClaim {
    /// This request owns the key and may run the side effect.
    Claimed,
    /// An earlier request finished; its response must be replayed.
    Completed { status: u16, body: String },
    /// An earlier request holds the key but has not finished yet.
    InFlight,
}

/// Outcome of applying a terminal status reported by the provider.
#[derive(Debug, Clone)]
pub enum Transition {
    Applied(Payment),
    AlreadyApplied(Payment),
    Conflict(Payment),
    NotFound,
}

pub(crate) fn timestamp() -> String {
    Utc::now().to_rfc3339()
}

/// True when `created_at` lies at least `ttl` in the past. Unreadable
/// timestamps count as stale so a corrupt row cannot pin a key.
fn claim_expired(created_at: &str, ttl: Duration) -> bool {
    let Ok(created) = DateTime::parse_from_rfc3339(created_at) else {
        return true;
    };
    let age = Utc::now().signed_duration_since(created.with_timezone(&Utc));
    match chrono::Duration::from_std(ttl) {
        Ok(ttl) => age >= ttl,
        Err(_) => false,
    }
}

#[derive(Clone)]
pub struct Store {
    pool: Pool,
    claim_ttl: Duration,
}

impl Store {
    /// Opens a pool against `database_url` and runs pending migrations.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let manager = Manager::new(database_url, Runtime::Tokio1);
        let pool = Pool::builder(manager)
            .build()
            .map_err(|e| StoreError::Build(e.to_string()))?;

        let conn = pool.get().await?;
        conn.interact(|conn| conn.run_pending_migrations(MIGRATIONS).map(|_| ()))
            .await
            .map_err(|e| StoreError::Interact(e.to_string()))?
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        Ok(Self {
            pool,
            claim_ttl: DEFAULT_CLAIM_TTL,
        })
    }

    /// Sets how long an unfinished claim is honoured before it is treated as
    /// abandoned.
    pub fn with_claim_ttl(mut self, ttl: Duration) -> Self {
        self.claim_ttl = ttl;
        self
    }

    async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut SqliteConnection) -> QueryResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.pool.get().await?;
        let res = conn
            .interact(|conn| {
                conn.batch_execute(CONNECTION_PRAGMAS)?;
                f(conn)
            })
            .await
            .map_err(|e| StoreError::Interact(e.to_string()))??;
        Ok(res)
    }

    /// Claims `key` with a single conditional insert. The primary key on
    /// `idempotency_keys.key` makes concurrent claims mutually exclusive.
    ///
    /// An unfinished claim older than the claim TTL is taken over with a
    /// compare-and-set on its `created_at`, so only one request wins it.
    pub async fn claim_idempotency_key(
        &self,
        key: &str,
        method: &str,
        path: &str,
    ) -> Result<KeyClaim, StoreError> {
        let record = NewIdempotencyRecord {
            key: key.to_string(),
            method: method.to_string(),
            path: path.to_string(),
            created_at: timestamp(),
        };
        let ttl = self.claim_ttl;
        self.run(move |conn| {
            let inserted = diesel::insert_into(idempotency_keys::table)
                .values(&record)
                .on_conflict_do_nothing()
                .execute(conn)?;
            if inserted == 1 {
                return Ok(KeyClaim::Claimed);
            }
            let existing = idempotency_keys::table
                .find(&record.key)
                .select(IdempotencyRecord::as_select())
                .first(conn)
                .optional()?;
            let Some(existing) = existing else {
                // Released between our insert and read.
                return Ok(KeyClaim::InFlight);
            };
            if let Some(status) = existing.response_status {
                return Ok(KeyClaim::Completed {
                    status: u16::try_from(status).unwrap_or(200),
                    body: existing.response_body.unwrap_or_default(),
                });
            }
            if !claim_expired(&existing.created_at, ttl) {
                return Ok(KeyClaim::InFlight);
            }
            let taken = diesel::update(
                idempotency_keys::table
                    .find(&record.key)
                    .filter(idempotency_keys::response_status.is_null())
                    .filter(idempotency_keys::created_at.eq(&existing.created_at)),
            )
            .set((
                idempotency_keys::method.eq(&record.method),
                idempotency_keys::path.eq(&record.path),
                idempotency_keys::created_at.eq(&record.created_at),
            ))
            .execute(conn)?;
            Ok(if taken == 1 {
                KeyClaim::Claimed
            } else {
                KeyClaim::InFlight
            })
        })
        .await
    }

    pub async fn complete_idempotency_key(
        &self,
        key: &str,
        status: u16,
        body: String,
    ) -> Result<(), StoreError> {
        let key = key.to_string();
        self.run(move |conn| {
            diesel::update(idempotency_keys::table.find(key))
                .set((
                    idempotency_keys::response_status.eq(Some(i32::from(status))),
                    idempotency_keys::response_body.eq(Some(body)),
                ))
                .execute(conn)
                .map(|_| ())
        })
        .await
    }

    /// Drops an unfinished claim so the client can retry with the same key.
    pub async fn release_idempotency_key(&self, key: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        self.run(move |conn| {
            diesel::delete(
                idempotency_keys::table
                    .find(key)
                    .filter(idempotency_keys::response_status.is_null()),
            )
            .execute(conn)
            .map(|_| ())
        })
        .await
    }

    pub async fn insert_order(&self, new_order: NewOrder) -> Result<Order, StoreError> {
        self.run(move |conn| {
            diesel::insert_into(orders::table)
                .values(new_order)
                .returning(Order::as_returning())
                .get_result(conn)
        })
        .await
    }

    pub async fn find_order(&self, id: i32) -> Result<Option<Order>, StoreError> {
        self.run(move |conn| {
            orders::table
                .find(id)
                .select(Order::as_select())
                .first(conn)
                .optional()
        })
        .await
    }

    pub async fn insert_payment(&self, new_payment: NewPayment) -> Result<Payment, StoreError> {
        self.run(move |conn| {
            diesel::insert_into(payments::table)
                .values(new_payment)
                .returning(Payment::as_returning())
                .get_result(conn)
        })
        .await
    }

    pub async fn find_payment(&self, id: i32) -> Result<Option<Payment>, StoreError> {
        self.run(move |conn| {
            payments::table
                .find(id)
                .select(Payment::as_select())
                .first(conn)
                .optional()
        })
        .await
    }

    pub async fn find_payment_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let key = key.to_string();
        self.run(move |conn| {
            payments::table
                .filter(payments::idempotency_key.eq(key))
                .select(Payment::as_select())
                .first(conn)
                .optional()
        })
        .await
    }

    /// The order's payment that is still waiting for a terminal status, if any.
    pub async fn find_open_payment_for_order(
        &self,
        order_id: i32,
    ) -> Result<Option<Payment>, StoreError> {
        self.run(move |conn| {
            payments::table
                .filter(payments::order_id.eq(order_id))
                .filter(payments::status.eq(PaymentStatus::Created.as_str()))
                .select(Payment::as_select())
                .first(conn)
                .optional()
        })
        .await
    }

    pub async fn find_payment_by_provider_id(
        &self,
        provider_payment_id: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let provider_payment_id = provider_payment_id.to_string();
        self.run(move |conn| {
            payments::table
                .filter(payments::provider_payment_id.eq(provider_payment_id))
                .select(Payment::as_select())
                .first(conn)
                .optional()
        })
        .await
    }

    /// Moves a `created` payment to `target` and updates its order in the
    /// same transaction. Only the first terminal status ever lands.
    pub async fn apply_terminal_status(
        &self,
        provider_payment_id: &str,
        target: PaymentStatus,
    ) -> Result<Transition, StoreError> {
        let provider_payment_id = provider_payment_id.to_string();
        self.run(move |conn| {
            conn.transaction::<_, diesel::result::Error, _>(|conn| {
                let now = timestamp();
                let updated = diesel::update(
                    payments::table
                        .filter(payments::provider_payment_id.eq(&provider_payment_id))
                        .filter(payments::status.eq(PaymentStatus::Created.as_str())),
                )
                .set((
                    payments::status.eq(target.as_str()),
                    payments::updated_at.eq(&now),
                ))
                .returning(Payment::as_returning())
                .get_result(conn)
                .optional()?;

                if let Some(payment) = updated {
                    diesel::update(orders::table.find(payment.order_id))
                        .set(orders::status.eq(target.order_status()))
                        .execute(conn)?;
                    return Ok(Transition::Applied(payment));
                }

                let existing = payments::table
                    .filter(payments::provider_payment_id.eq(&provider_payment_id))
                    .select(Payment::as_select())
                    .first(conn)
                    .optional()?;
                Ok(match existing {
                    None => Transition::NotFound,
                    Some(p) if p.status == target.as_str() => Transition::AlreadyApplied(p),
                    Some(p) => Transition::Conflict(p),
                })
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_claims_are_not_expired() {
        assert!(!claim_expired(&timestamp(), Duration::from_secs(60)));
    }

    #[test]
    fn old_claims_expire() {
        let old = (Utc::now() - chrono::Duration::minutes(10)).to_rfc3339();
        assert!(claim_expired(&old, Duration::from_secs(60)));
        assert!(!claim_expired(&old, Duration::from_secs(3600)));
    }

    #[test]
    fn unreadable_timestamps_expire() {
        assert!(claim_expired("yesterday", Duration::from_secs(60)));
    }
}
