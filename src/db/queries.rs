//! Database queries
//!
//! `JobQueries` handles job rows; `PaymentQueries` is the payment ledger.
//! Both map raw rows to typed models at this boundary and translate SQLite
//! constraint violations into the typed conflicts callers are expected to
//! handle (never a crash).

use super::{Database, JobRecord, JobStatus, PaymentRecord, VerificationLevel};
use crate::{ConflictCode, PayError, PayResult};
use chrono::Utc;
use rusqlite::OptionalExtension;
use tracing::info;

fn db_err(e: rusqlite::Error) -> PayError {
    PayError::Database(e.to_string())
}

/// True if the error is a uniqueness/check constraint violation mentioning
/// the given column
fn is_constraint_on(e: &rusqlite::Error, column: &str) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(inner, Some(msg)) => {
            inner.code == rusqlite::ErrorCode::ConstraintViolation && msg.contains(column)
        }
        _ => false,
    }
}

fn parse_status(s: String) -> rusqlite::Result<JobStatus> {
    JobStatus::parse(&s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown job status: {s}").into(),
        )
    })
}

fn parse_level(s: Option<String>) -> rusqlite::Result<Option<VerificationLevel>> {
    match s {
        None => Ok(None),
        Some(s) => VerificationLevel::parse(&s)
            .map(Some)
            .ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    format!("unknown verification level: {s}").into(),
                )
            }),
    }
}

const JOB_COLUMNS: &str = "id, client_id, runner_id, description, amount_sats, status, \
     requested_at, accepted_at, started_at, completed_at, payment_confirmed_at, \
     cancelled_at, created_at, updated_at";

fn map_job_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRecord> {
    Ok(JobRecord {
        id: row.get(0)?,
        client_id: row.get(1)?,
        runner_id: row.get(2)?,
        description: row.get(3)?,
        amount_sats: row.get(4)?,
        status: parse_status(row.get(5)?)?,
        requested_at: row.get(6)?,
        accepted_at: row.get(7)?,
        started_at: row.get(8)?,
        completed_at: row.get(9)?,
        payment_confirmed_at: row.get(10)?,
        cancelled_at: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

const PAYMENT_COLUMNS: &str =
    "id, job_id, payment_hash, preimage, amount_sats, verification_level, proof, paid_at, created_at";

fn map_payment_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PaymentRecord> {
    Ok(PaymentRecord {
        id: row.get(0)?,
        job_id: row.get(1)?,
        payment_hash: row.get(2)?,
        preimage: row.get(3)?,
        amount_sats: row.get(4)?,
        verification_level: parse_level(row.get(5)?)?,
        proof: row.get(6)?,
        paid_at: row.get(7)?,
        created_at: row.get(8)?,
    })
}

/// Job queries
pub struct JobQueries<'a> {
    db: &'a Database,
}

impl<'a> JobQueries<'a> {
    /// Create a new query instance
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Insert a new job in `requested` status
    pub async fn insert(
        &self,
        client_id: &str,
        description: &str,
        amount_sats: i64,
    ) -> PayResult<JobRecord> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        let now = Utc::now();
        conn.execute(
            r#"
            INSERT INTO jobs (client_id, description, amount_sats, status, requested_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, 'requested', ?4, ?4, ?4)
            "#,
            rusqlite::params![client_id, description, amount_sats, now],
        )
        .map_err(db_err)?;

        let id = conn.last_insert_rowid();
        info!(
            "DB: Created job: id={}, client_id={}, amount={} sats",
            id, client_id, amount_sats
        );

        conn.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
            rusqlite::params![id],
            map_job_row,
        )
        .map_err(db_err)
    }

    /// Get a job by ID
    pub async fn get_by_id(&self, id: i64) -> PayResult<Option<JobRecord>> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        conn.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
            rusqlite::params![id],
            map_job_row,
        )
        .optional()
        .map_err(db_err)
    }

    /// Apply a lifecycle transition with an optimistic status predicate.
    ///
    /// The UPDATE only matches while the job is still in `from`, so two
    /// racing requests cannot both pass a guard check and write: the loser's
    /// update affects zero rows and this returns `false`.
    pub async fn apply_transition(
        &self,
        job_id: i64,
        from: JobStatus,
        to: JobStatus,
        runner_id: Option<&str>,
    ) -> PayResult<bool> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        let now = Utc::now();

        let stamp_col = match to {
            JobStatus::Accepted => Some("accepted_at"),
            JobStatus::InProgress => Some("started_at"),
            JobStatus::Completed => Some("completed_at"),
            JobStatus::PaymentConfirmed => Some("payment_confirmed_at"),
            JobStatus::Cancelled => Some("cancelled_at"),
            JobStatus::Requested | JobStatus::Disputed => None,
        };

        let mut sql = String::from("UPDATE jobs SET status = ?1, updated_at = ?2");
        if let Some(col) = stamp_col {
            sql.push_str(&format!(", {col} = ?2"));
        }
        if runner_id.is_some() {
            sql.push_str(", runner_id = ?5");
        }
        sql.push_str(" WHERE id = ?3 AND status = ?4");
        if to == JobStatus::Accepted {
            // Accepting also requires that no runner got there first
            sql.push_str(" AND runner_id IS NULL");
        }

        let affected = if let Some(runner) = runner_id {
            conn.execute(
                &sql,
                rusqlite::params![to.as_str(), now, job_id, from.as_str(), runner],
            )
        } else {
            conn.execute(
                &sql,
                rusqlite::params![to.as_str(), now, job_id, from.as_str()],
            )
        }
        .map_err(db_err)?;

        if affected > 0 {
            info!(
                "DB: Job transition applied: id={}, {} -> {}",
                job_id, from, to
            );
        }

        Ok(affected > 0)
    }
}

/// Payment ledger queries
///
/// At most one payment row per job; `payment_hash` values are globally
/// unique across all rows. Rows are never deleted.
pub struct PaymentQueries<'a> {
    db: &'a Database,
}

impl<'a> PaymentQueries<'a> {
    /// Create a new query instance
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Create a payment record for a job
    ///
    /// Fails with `PAYMENT_EXISTS` if the job already has a payment and with
    /// `INVOICE_ALREADY_USED` if the payment hash is already recorded.
    pub async fn create(
        &self,
        job_id: i64,
        amount_sats: i64,
        payment_hash: Option<&str>,
    ) -> PayResult<PaymentRecord> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        let now = Utc::now();

        conn.execute(
            r#"
            INSERT INTO payments (job_id, payment_hash, amount_sats, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            rusqlite::params![job_id, payment_hash, amount_sats, now],
        )
        .map_err(|e| {
            if is_constraint_on(&e, "payments.job_id") {
                PayError::conflict(
                    ConflictCode::PaymentExists,
                    format!("job {job_id} already has a payment record"),
                )
            } else if is_constraint_on(&e, "payments.payment_hash") {
                PayError::conflict(
                    ConflictCode::InvoiceAlreadyUsed,
                    "payment hash already recorded in the ledger",
                )
            } else {
                db_err(e)
            }
        })?;

        let id = conn.last_insert_rowid();
        info!(
            "DB: Created payment record: id={}, job_id={}, amount={} sats",
            id, job_id, amount_sats
        );

        conn.query_row(
            &format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = ?1"),
            rusqlite::params![id],
            map_payment_row,
        )
        .map_err(db_err)
    }

    /// Get a payment by ID
    pub async fn get_by_id(&self, id: i64) -> PayResult<Option<PaymentRecord>> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        conn.query_row(
            &format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = ?1"),
            rusqlite::params![id],
            map_payment_row,
        )
        .optional()
        .map_err(db_err)
    }

    /// Get the payment for a job, if any
    pub async fn find_by_job_id(&self, job_id: i64) -> PayResult<Option<PaymentRecord>> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        conn.query_row(
            &format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE job_id = ?1"),
            rusqlite::params![job_id],
            map_payment_row,
        )
        .optional()
        .map_err(db_err)
    }

    /// Get a payment by payment hash, if any
    pub async fn find_by_payment_hash(&self, hash: &str) -> PayResult<Option<PaymentRecord>> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        conn.query_row(
            &format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE payment_hash = ?1"),
            rusqlite::params![hash],
            map_payment_row,
        )
        .optional()
        .map_err(db_err)
    }

    /// Attach a payment hash to a record that does not have one yet
    ///
    /// The unique index on `payment_hash` rejects a hash already used by
    /// another record (`INVOICE_ALREADY_USED`).
    pub async fn set_payment_hash(&self, payment_id: i64, hash: &str) -> PayResult<PaymentRecord> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        let affected = conn
            .execute(
                "UPDATE payments SET payment_hash = ?1 WHERE id = ?2 AND payment_hash IS NULL",
                rusqlite::params![hash, payment_id],
            )
            .map_err(|e| {
                if is_constraint_on(&e, "payments.payment_hash") {
                    PayError::conflict(
                        ConflictCode::InvoiceAlreadyUsed,
                        "payment hash already recorded in the ledger",
                    )
                } else {
                    db_err(e)
                }
            })?;

        if affected == 0 {
            return Err(PayError::conflict(
                ConflictCode::PaymentNotConfirmable,
                format!("payment {payment_id} not found or already carries a payment hash"),
            ));
        }

        self.require_by_id(&conn, payment_id)
    }

    /// Record a verified preimage, settling the payment
    ///
    /// The `preimage IS NULL` predicate makes double confirmation lose
    /// atomically: the second writer affects zero rows and gets
    /// `PAYMENT_ALREADY_CONFIRMED`. Callers verify the preimage against the
    /// stored hash before calling this.
    pub async fn confirm(
        &self,
        payment_id: i64,
        preimage: &str,
        level: VerificationLevel,
    ) -> PayResult<PaymentRecord> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        let now = Utc::now();

        let affected = conn
            .execute(
                r#"
                UPDATE payments
                SET preimage = ?1, verification_level = ?2, paid_at = ?3
                WHERE id = ?4 AND preimage IS NULL
                "#,
                rusqlite::params![preimage, level.as_str(), now, payment_id],
            )
            .map_err(db_err)?;

        if affected == 0 {
            let existing = conn
                .query_row(
                    "SELECT COUNT(*) FROM payments WHERE id = ?1",
                    rusqlite::params![payment_id],
                    |row| row.get::<_, i64>(0),
                )
                .map_err(db_err)?;
            if existing > 0 {
                return Err(PayError::conflict(
                    ConflictCode::PaymentAlreadyConfirmed,
                    format!("payment {payment_id} is already confirmed"),
                ));
            }
            return Err(PayError::NotFound(format!("payment {payment_id} not found")));
        }

        info!(
            "DB: Payment confirmed: id={}, level={}",
            payment_id, level
        );

        self.require_by_id(&conn, payment_id)
    }

    /// Set the verification level (and optionally the submitted proof)
    ///
    /// A confirmed level (verified_manual) also stamps `paid_at` if the
    /// payment was not settled before.
    pub async fn set_verification(
        &self,
        payment_id: i64,
        level: VerificationLevel,
        proof: Option<&str>,
    ) -> PayResult<PaymentRecord> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        let paid_at = if level.is_confirmed() {
            Some(Utc::now())
        } else {
            None
        };

        let affected = if let Some(proof) = proof {
            conn.execute(
                "UPDATE payments SET verification_level = ?1, proof = ?2, \
                 paid_at = COALESCE(paid_at, ?3) WHERE id = ?4",
                rusqlite::params![level.as_str(), proof, paid_at, payment_id],
            )
        } else {
            conn.execute(
                "UPDATE payments SET verification_level = ?1, \
                 paid_at = COALESCE(paid_at, ?2) WHERE id = ?3",
                rusqlite::params![level.as_str(), paid_at, payment_id],
            )
        }
        .map_err(db_err)?;

        if affected == 0 {
            return Err(PayError::NotFound(format!("payment {payment_id} not found")));
        }

        info!(
            "DB: Payment verification level set: id={}, level={}",
            payment_id, level
        );

        self.require_by_id(&conn, payment_id)
    }

    fn require_by_id(
        &self,
        conn: &rusqlite::Connection,
        payment_id: i64,
    ) -> PayResult<PaymentRecord> {
        conn.query_row(
            &format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = ?1"),
            rusqlite::params![payment_id],
            map_payment_row,
        )
        .map_err(db_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    async fn completed_job(db: &Database) -> JobRecord {
        let jobs = JobQueries::new(db);
        let job = jobs.insert("client-1", "walk the dog", 1500).await.unwrap();
        jobs.apply_transition(job.id, JobStatus::Requested, JobStatus::Accepted, Some("runner-1"))
            .await
            .unwrap();
        jobs.apply_transition(job.id, JobStatus::Accepted, JobStatus::InProgress, None)
            .await
            .unwrap();
        jobs.apply_transition(job.id, JobStatus::InProgress, JobStatus::Completed, None)
            .await
            .unwrap();
        jobs.get_by_id(job.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_get_job() {
        let db = setup().await;
        let jobs = JobQueries::new(&db);
        let job = jobs.insert("client-1", "groceries", 2000).await.unwrap();
        assert_eq!(job.status, JobStatus::Requested);
        assert!(job.runner_id.is_none());

        let loaded = jobs.get_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.client_id, "client-1");
        assert_eq!(loaded.amount_sats, 2000);
    }

    #[tokio::test]
    async fn test_transition_predicate_rejects_stale_writer() {
        let db = setup().await;
        let jobs = JobQueries::new(&db);
        let job = jobs.insert("client-1", "groceries", 2000).await.unwrap();

        let first = jobs
            .apply_transition(job.id, JobStatus::Requested, JobStatus::Accepted, Some("runner-1"))
            .await
            .unwrap();
        assert!(first);

        // Second accept races against the first and must lose
        let second = jobs
            .apply_transition(job.id, JobStatus::Requested, JobStatus::Accepted, Some("runner-2"))
            .await
            .unwrap();
        assert!(!second);

        let loaded = jobs.get_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.runner_id.as_deref(), Some("runner-1"));
    }

    #[tokio::test]
    async fn test_one_payment_per_job() {
        let db = setup().await;
        let job = completed_job(&db).await;
        let payments = PaymentQueries::new(&db);

        payments.create(job.id, 1500, None).await.unwrap();
        let err = payments.create(job.id, 1500, None).await.unwrap_err();
        match err {
            PayError::Conflict { code, .. } => assert_eq!(code, ConflictCode::PaymentExists),
            other => panic!("expected PAYMENT_EXISTS, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_payment_hash_replay_rejected() {
        let db = setup().await;
        let job1 = completed_job(&db).await;
        let job2 = {
            let jobs = JobQueries::new(&db);
            jobs.insert("client-2", "mow lawn", 900).await.unwrap()
        };
        let payments = PaymentQueries::new(&db);

        let hash = "aa".repeat(32);
        payments.create(job1.id, 1500, Some(hash.as_str())).await.unwrap();
        let err = payments
            .create(job2.id, 900, Some(hash.as_str()))
            .await
            .unwrap_err();
        match err {
            PayError::Conflict { code, .. } => assert_eq!(code, ConflictCode::InvoiceAlreadyUsed),
            other => panic!("expected INVOICE_ALREADY_USED, got {other:?}"),
        }

        let found = payments.find_by_payment_hash(&hash).await.unwrap().unwrap();
        assert_eq!(found.job_id, job1.id);
    }

    #[tokio::test]
    async fn test_confirm_once_only() {
        let db = setup().await;
        let job = completed_job(&db).await;
        let payments = PaymentQueries::new(&db);
        let payment = payments
            .create(job.id, 1500, Some("bb".repeat(32).as_str()))
            .await
            .unwrap();

        let confirmed = payments
            .confirm(payment.id, &"cc".repeat(32), VerificationLevel::Cryptographic)
            .await
            .unwrap();
        assert!(confirmed.is_confirmed());
        assert!(confirmed.paid_at.is_some());
        assert_eq!(
            confirmed.verification_level,
            Some(VerificationLevel::Cryptographic)
        );

        let err = payments
            .confirm(payment.id, &"cc".repeat(32), VerificationLevel::Cryptographic)
            .await
            .unwrap_err();
        match err {
            PayError::Conflict { code, .. } => {
                assert_eq!(code, ConflictCode::PaymentAlreadyConfirmed)
            }
            other => panic!("expected PAYMENT_ALREADY_CONFIRMED, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_set_payment_hash_uniqueness() {
        let db = setup().await;
        let job1 = completed_job(&db).await;
        let jobs = JobQueries::new(&db);
        let job2 = jobs.insert("client-2", "courier run", 700).await.unwrap();
        let payments = PaymentQueries::new(&db);

        let hash = "dd".repeat(32);
        payments.create(job1.id, 1500, Some(hash.as_str())).await.unwrap();
        let p2 = payments.create(job2.id, 700, None).await.unwrap();

        let err = payments.set_payment_hash(p2.id, &hash).await.unwrap_err();
        match err {
            PayError::Conflict { code, .. } => assert_eq!(code, ConflictCode::InvoiceAlreadyUsed),
            other => panic!("expected INVOICE_ALREADY_USED, got {other:?}"),
        }
    }
}
