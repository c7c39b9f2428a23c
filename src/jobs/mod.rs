//! Job lifecycle state machine
//!
//! States: `requested -> accepted -> in_progress -> completed ->
//! payment_confirmed`, with side branches `cancelled` (from any non-terminal
//! state before completion) and `disputed` (from completed or
//! payment_confirmed when a payment proof fails review).
//!
//! Guard failures are typed conflicts, never silent no-ops. The persisted
//! transition uses an optimistic status predicate so the guard check and the
//! status write cannot be split by a concurrent request.

use crate::db::{Database, JobQueries, JobRecord, JobStatus};
use crate::{ConflictCode, PayError, PayResult};
use tracing::warn;

/// A lifecycle event with its acting party
#[derive(Debug, Clone)]
pub enum JobEvent<'a> {
    /// A runner accepts an open job
    Accept {
        /// The accepting runner
        runner_id: &'a str,
    },
    /// The assigned runner starts work
    Start {
        /// Calling user; must be the assigned runner
        caller_id: &'a str,
    },
    /// The assigned runner marks the work done
    Complete {
        /// Calling user; must be the assigned runner
        caller_id: &'a str,
    },
    /// A verified payment settles the job
    ConfirmPayment,
    /// A payment proof failed verification or review
    Dispute {
        /// Acting user; must be a participant unless admin
        actor_id: &'a str,
        /// Whether the actor has admin privileges
        is_admin: bool,
    },
    /// Either party cancels before completion
    Cancel {
        /// Acting user; must be a participant
        actor_id: &'a str,
    },
}

impl JobEvent<'_> {
    fn name(&self) -> &'static str {
        match self {
            Self::Accept { .. } => "accept",
            Self::Start { .. } => "start",
            Self::Complete { .. } => "complete",
            Self::ConfirmPayment => "confirm_payment",
            Self::Dispute { .. } => "dispute",
            Self::Cancel { .. } => "cancel",
        }
    }
}

/// Compute the target status for an event against the job's current state.
///
/// Pure: no I/O, no clock. Every (state, event) pair outside the transition
/// table yields a typed conflict and implies no stored change.
pub fn next_status(job: &JobRecord, event: &JobEvent<'_>) -> PayResult<JobStatus> {
    match event {
        JobEvent::Accept { .. } => {
            if job.status == JobStatus::Requested && job.runner_id.is_none() {
                Ok(JobStatus::Accepted)
            } else {
                Err(PayError::conflict(
                    ConflictCode::JobNotAvailable,
                    format!("job {} is {} and cannot be accepted", job.id, job.status),
                ))
            }
        }
        JobEvent::Start { caller_id } => {
            if job.status != JobStatus::Accepted {
                return Err(invalid_transition(job, event));
            }
            require_runner(job, caller_id)?;
            Ok(JobStatus::InProgress)
        }
        JobEvent::Complete { caller_id } => {
            if job.status != JobStatus::InProgress {
                return Err(invalid_transition(job, event));
            }
            require_runner(job, caller_id)?;
            Ok(JobStatus::Completed)
        }
        JobEvent::ConfirmPayment => {
            if job.status == JobStatus::Completed {
                Ok(JobStatus::PaymentConfirmed)
            } else {
                Err(PayError::conflict(
                    ConflictCode::JobNotCompleted,
                    format!(
                        "job {} is {} — payment can only be confirmed once completed",
                        job.id, job.status
                    ),
                ))
            }
        }
        JobEvent::Dispute { actor_id, is_admin } => {
            if !matches!(
                job.status,
                JobStatus::Completed | JobStatus::PaymentConfirmed
            ) {
                return Err(invalid_transition(job, event));
            }
            if !is_admin && !job.is_participant(actor_id) {
                return Err(PayError::conflict(
                    ConflictCode::NotJobParticipant,
                    format!("user {actor_id} is not a participant of job {}", job.id),
                ));
            }
            Ok(JobStatus::Disputed)
        }
        JobEvent::Cancel { actor_id } => {
            if !matches!(
                job.status,
                JobStatus::Requested | JobStatus::Accepted | JobStatus::InProgress
            ) {
                return Err(PayError::conflict(
                    ConflictCode::JobNotCancellable,
                    format!("job {} is {} and can no longer be cancelled", job.id, job.status),
                ));
            }
            if !job.is_participant(actor_id) {
                return Err(PayError::conflict(
                    ConflictCode::NotJobParticipant,
                    format!("user {actor_id} is not a participant of job {}", job.id),
                ));
            }
            Ok(JobStatus::Cancelled)
        }
    }
}

fn require_runner(job: &JobRecord, caller_id: &str) -> PayResult<()> {
    if job.runner_id.as_deref() == Some(caller_id) {
        Ok(())
    } else {
        Err(PayError::conflict(
            ConflictCode::NotJobRunner,
            format!("user {caller_id} is not the assigned runner of job {}", job.id),
        ))
    }
}

fn invalid_transition(job: &JobRecord, event: &JobEvent<'_>) -> PayError {
    PayError::conflict(
        ConflictCode::InvalidTransition,
        format!(
            "event {} is not valid for job {} in status {}",
            event.name(),
            job.id,
            job.status
        ),
    )
}

/// Applies lifecycle events against the store
pub struct JobLifecycle<'a> {
    db: &'a Database,
}

impl<'a> JobLifecycle<'a> {
    /// Create a new lifecycle instance
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Apply an event to a job, returning the updated record
    ///
    /// The guard is evaluated against the loaded record and re-enforced by
    /// the status predicate of the UPDATE. A request that loses a race (for
    /// example a confirmation racing a cancellation) re-reads the job and
    /// surfaces the guard error for the state it actually found.
    pub async fn apply(&self, job_id: i64, event: JobEvent<'_>) -> PayResult<JobRecord> {
        let jobs = JobQueries::new(self.db);
        let job = jobs
            .get_by_id(job_id)
            .await?
            .ok_or_else(|| PayError::NotFound(format!("job {job_id} not found")))?;

        let to = next_status(&job, &event)?;
        let runner_id = match &event {
            JobEvent::Accept { runner_id } => Some(*runner_id),
            _ => None,
        };

        let applied = jobs
            .apply_transition(job_id, job.status, to, runner_id)
            .await?;

        if !applied {
            // Lost a race: the job moved between the read and the write.
            // Re-evaluate the guard against the fresh state so the caller
            // gets the accurate conflict.
            let fresh = jobs
                .get_by_id(job_id)
                .await?
                .ok_or_else(|| PayError::NotFound(format!("job {job_id} not found")))?;
            warn!(
                "Job {} moved concurrently: {} -> {} while applying {}",
                job_id,
                job.status,
                fresh.status,
                event.name()
            );
            next_status(&fresh, &event)?;
            return Err(PayError::conflict(
                ConflictCode::InvalidTransition,
                format!("job {job_id} was updated concurrently, retry"),
            ));
        }

        jobs.get_by_id(job_id)
            .await?
            .ok_or_else(|| PayError::NotFound(format!("job {job_id} not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn job_in(status: JobStatus, runner: Option<&str>) -> JobRecord {
        let now = chrono::Utc::now();
        JobRecord {
            id: 1,
            client_id: "client-1".to_string(),
            runner_id: runner.map(String::from),
            description: "walk the dog".to_string(),
            amount_sats: 1500,
            status,
            requested_at: now,
            accepted_at: None,
            started_at: None,
            completed_at: None,
            payment_confirmed_at: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn conflict_code(err: PayError) -> ConflictCode {
        match err {
            PayError::Conflict { code, .. } => code,
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let job = job_in(JobStatus::Requested, None);
        assert_eq!(
            next_status(&job, &JobEvent::Accept { runner_id: "runner-1" }).unwrap(),
            JobStatus::Accepted
        );

        let job = job_in(JobStatus::Accepted, Some("runner-1"));
        assert_eq!(
            next_status(&job, &JobEvent::Start { caller_id: "runner-1" }).unwrap(),
            JobStatus::InProgress
        );

        let job = job_in(JobStatus::InProgress, Some("runner-1"));
        assert_eq!(
            next_status(&job, &JobEvent::Complete { caller_id: "runner-1" }).unwrap(),
            JobStatus::Completed
        );

        let job = job_in(JobStatus::Completed, Some("runner-1"));
        assert_eq!(
            next_status(&job, &JobEvent::ConfirmPayment).unwrap(),
            JobStatus::PaymentConfirmed
        );
    }

    #[test]
    fn test_accept_taken_job_rejected() {
        let job = job_in(JobStatus::Accepted, Some("runner-1"));
        let err = next_status(&job, &JobEvent::Accept { runner_id: "runner-2" }).unwrap_err();
        assert_eq!(conflict_code(err), ConflictCode::JobNotAvailable);
    }

    #[test]
    fn test_start_requires_assigned_runner() {
        let job = job_in(JobStatus::Accepted, Some("runner-1"));
        let err = next_status(&job, &JobEvent::Start { caller_id: "runner-2" }).unwrap_err();
        assert_eq!(conflict_code(err), ConflictCode::NotJobRunner);
    }

    #[test]
    fn test_confirm_requires_completed() {
        for status in [
            JobStatus::Requested,
            JobStatus::Accepted,
            JobStatus::InProgress,
            JobStatus::PaymentConfirmed,
            JobStatus::Cancelled,
            JobStatus::Disputed,
        ] {
            let job = job_in(status, Some("runner-1"));
            let err = next_status(&job, &JobEvent::ConfirmPayment).unwrap_err();
            assert_eq!(conflict_code(err), ConflictCode::JobNotCompleted, "{status}");
        }
    }

    #[test]
    fn test_cancel_only_before_completion() {
        for status in [JobStatus::Requested, JobStatus::Accepted, JobStatus::InProgress] {
            let job = job_in(status, Some("runner-1"));
            assert_eq!(
                next_status(&job, &JobEvent::Cancel { actor_id: "client-1" }).unwrap(),
                JobStatus::Cancelled,
                "{status}"
            );
        }
        for status in [
            JobStatus::Completed,
            JobStatus::PaymentConfirmed,
            JobStatus::Cancelled,
            JobStatus::Disputed,
        ] {
            let job = job_in(status, Some("runner-1"));
            let err = next_status(&job, &JobEvent::Cancel { actor_id: "client-1" }).unwrap_err();
            assert_eq!(conflict_code(err), ConflictCode::JobNotCancellable, "{status}");
        }
    }

    #[test]
    fn test_cancel_requires_participant() {
        let job = job_in(JobStatus::Accepted, Some("runner-1"));
        let err = next_status(&job, &JobEvent::Cancel { actor_id: "stranger" }).unwrap_err();
        assert_eq!(conflict_code(err), ConflictCode::NotJobParticipant);
    }

    #[test]
    fn test_dispute_guards() {
        let job = job_in(JobStatus::PaymentConfirmed, Some("runner-1"));
        assert_eq!(
            next_status(&job, &JobEvent::Dispute { actor_id: "runner-1", is_admin: false })
                .unwrap(),
            JobStatus::Disputed
        );
        assert_eq!(
            next_status(&job, &JobEvent::Dispute { actor_id: "ops", is_admin: true }).unwrap(),
            JobStatus::Disputed
        );

        let err = next_status(
            &job,
            &JobEvent::Dispute { actor_id: "stranger", is_admin: false },
        )
        .unwrap_err();
        assert_eq!(conflict_code(err), ConflictCode::NotJobParticipant);

        let job = job_in(JobStatus::InProgress, Some("runner-1"));
        let err = next_status(
            &job,
            &JobEvent::Dispute { actor_id: "runner-1", is_admin: false },
        )
        .unwrap_err();
        assert_eq!(conflict_code(err), ConflictCode::InvalidTransition);
    }

    #[test]
    fn test_every_off_table_pair_conflicts() {
        // Exhaustive sweep: any (state, event) pair outside the transition
        // table must produce a conflict, never a new status.
        let all_statuses = [
            JobStatus::Requested,
            JobStatus::Accepted,
            JobStatus::InProgress,
            JobStatus::Completed,
            JobStatus::PaymentConfirmed,
            JobStatus::Cancelled,
            JobStatus::Disputed,
        ];
        for status in all_statuses {
            let runner = if status == JobStatus::Requested {
                None
            } else {
                Some("runner-1")
            };
            let job = job_in(status, runner);

            let events = [
                JobEvent::Accept { runner_id: "runner-1" },
                JobEvent::Start { caller_id: "runner-1" },
                JobEvent::Complete { caller_id: "runner-1" },
                JobEvent::ConfirmPayment,
                JobEvent::Dispute { actor_id: "client-1", is_admin: false },
                JobEvent::Cancel { actor_id: "client-1" },
            ];
            let allowed: &[&str] = match status {
                JobStatus::Requested => &["accept", "cancel"],
                JobStatus::Accepted => &["start", "cancel"],
                JobStatus::InProgress => &["complete", "cancel"],
                JobStatus::Completed => &["confirm_payment", "dispute"],
                JobStatus::PaymentConfirmed => &["dispute"],
                JobStatus::Cancelled | JobStatus::Disputed => &[],
            };
            for event in events {
                let result = next_status(&job, &event);
                if allowed.contains(&event.name()) {
                    assert!(result.is_ok(), "{status}/{} should be legal", event.name());
                } else {
                    assert!(
                        matches!(result, Err(PayError::Conflict { .. })),
                        "{status}/{} should conflict",
                        event.name()
                    );
                }
            }
        }
    }

    #[tokio::test]
    async fn test_apply_persists_and_guards() {
        let db = Database::open_in_memory().await.unwrap();
        let jobs = JobQueries::new(&db);
        let job = jobs.insert("client-1", "groceries", 2000).await.unwrap();
        let lifecycle = JobLifecycle::new(&db);

        let job = lifecycle
            .apply(job.id, JobEvent::Accept { runner_id: "runner-1" })
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Accepted);
        assert!(job.accepted_at.is_some());

        // Illegal event leaves the stored status unchanged
        let err = lifecycle.apply(job.id, JobEvent::ConfirmPayment).await.unwrap_err();
        assert_eq!(conflict_code(err), ConflictCode::JobNotCompleted);
        let stored = jobs.get_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Accepted);
    }

    #[tokio::test]
    async fn test_apply_unknown_job() {
        let db = Database::open_in_memory().await.unwrap();
        let lifecycle = JobLifecycle::new(&db);
        let err = lifecycle
            .apply(99, JobEvent::Accept { runner_id: "runner-1" })
            .await
            .unwrap_err();
        assert!(matches!(err, PayError::NotFound(_)));
    }
}
