//! # Durable Job Queue
//!
//! The persisted collection of transcription jobs. The whole collection is
//! one JSON document rewritten atomically on every mutation, and every
//! mutation runs inside the cross-process critical section provided by the
//! queue lock.
//!
//! ## Invariants:
//! - At most one job per round with status queued/processing, enforced by
//!   idempotent `enqueue`
//! - A job is claimed at most `max_attempts` times across process restarts
//! - The queue document is never observable in a torn state (temp + rename)

use crate::error::{AppError, AppResult};
use crate::queue::lock::QueueLock;
use crate::rounds::{RoundStatus, RoundStore};
use crate::storage::JsonKv;
use crate::transcription::transcript::transcript_key;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const QUEUE_KEY: &str = "queue/jobs.json";

/// Where a job's audio artifact came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobSource {
    /// Assembled from a live chunk stream
    Recording,
    /// Produced by an out-of-band file upload
    Upload,
}

/// Lifecycle status of a transcription job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }

    /// Queued or processing; such jobs block re-admission for their round.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Processing)
    }
}

/// One unit of transcription work tied to a round's audio artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionJob {
    pub id: Uuid,
    pub round_id: String,
    pub audio_path: String,
    pub source: JobSource,
    pub status: JobStatus,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_error: Option<String>,
}

/// The full job collection, persisted as one unit.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct QueueDocument {
    pub jobs: Vec<TranscriptionJob>,
}

/// Counters for health reporting.
#[derive(Debug, Default, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub error: usize,
}

/// Durable, lock-guarded transcription job queue.
pub struct JobQueue {
    kv: Arc<JsonKv>,
    lock: QueueLock,
    max_attempts: u32,
}

impl JobQueue {
    pub fn new(kv: Arc<JsonKv>, lock: QueueLock, max_attempts: u32) -> Self {
        Self {
            kv,
            lock,
            max_attempts,
        }
    }

    fn load(&self) -> AppResult<QueueDocument> {
        Ok(self.kv.get(QUEUE_KEY)?.unwrap_or_default())
    }

    fn persist(&self, doc: &QueueDocument) -> AppResult<()> {
        self.kv.put(QUEUE_KEY, doc)
    }

    /// Admit a job for a round, or return the round's already-active job.
    ///
    /// Idempotence here is what keeps the at-most-one-active-per-round
    /// invariant intact under duplicate triggers (a retried `complete`, a
    /// double-posted HTTP request).
    pub async fn enqueue(
        &self,
        round_id: &str,
        audio_path: &str,
        source: JobSource,
    ) -> AppResult<TranscriptionJob> {
        let _guard = self.lock.acquire().await?;
        let mut doc = self.load()?;

        if let Some(existing) = doc
            .jobs
            .iter()
            .find(|job| job.round_id == round_id && job.status.is_active())
        {
            info!(
                round_id,
                job_id = %existing.id,
                status = existing.status.as_str(),
                "round already has an active job, returning it unchanged"
            );
            return Ok(existing.clone());
        }

        let now = Utc::now();
        let job = TranscriptionJob {
            id: Uuid::new_v4(),
            round_id: round_id.to_string(),
            audio_path: audio_path.to_string(),
            source,
            status: JobStatus::Queued,
            attempts: 0,
            created_at: now,
            updated_at: now,
            last_error: None,
        };
        doc.jobs.push(job.clone());
        self.persist(&doc)?;

        info!(round_id, job_id = %job.id, ?source, "transcription job queued");
        Ok(job)
    }

    /// Claim the first eligible queued job, moving it to processing and
    /// charging an attempt. None when nothing is claimable.
    pub async fn claim_next(&self) -> AppResult<Option<TranscriptionJob>> {
        let _guard = self.lock.acquire().await?;
        let mut doc = self.load()?;

        let claimed = match doc
            .jobs
            .iter_mut()
            .find(|job| job.status == JobStatus::Queued && job.attempts < self.max_attempts)
        {
            Some(job) => {
                job.status = JobStatus::Processing;
                job.attempts += 1;
                job.updated_at = Utc::now();
                job.clone()
            }
            None => return Ok(None),
        };

        self.persist(&doc)?;
        Ok(Some(claimed))
    }

    /// Apply a mutation to one job, refresh `updated_at`, persist.
    pub async fn update<F>(&self, id: Uuid, mutate: F) -> AppResult<TranscriptionJob>
    where
        F: FnOnce(&mut TranscriptionJob),
    {
        let _guard = self.lock.acquire().await?;
        let mut doc = self.load()?;

        let job = doc
            .jobs
            .iter_mut()
            .find(|job| job.id == id)
            .ok_or_else(|| AppError::NotFound(format!("job '{}' does not exist", id)))?;
        mutate(job);
        job.updated_at = Utc::now();
        let updated = job.clone();

        self.persist(&doc)?;
        Ok(updated)
    }

    /// Read-only lookup. The document is replaced atomically, so reading
    /// without the lock yields a consistent (if momentarily stale) snapshot.
    pub async fn get(&self, id: Uuid) -> AppResult<Option<TranscriptionJob>> {
        Ok(self.load()?.jobs.into_iter().find(|job| job.id == id))
    }

    /// Status counters for health reporting (lock-free snapshot).
    pub async fn stats(&self) -> AppResult<QueueStats> {
        let doc = self.load()?;
        let mut stats = QueueStats::default();
        for job in &doc.jobs {
            match job.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Error => stats.error += 1,
            }
        }
        Ok(stats)
    }

    /// Reconcile jobs left `processing` by a crashed run.
    ///
    /// Runs once before the worker starts polling. Resolution per job:
    /// - the round's transcript already exists on disk → the prior run died
    ///   after the work finished; job and round become completed
    /// - attempts remain → requeue for another try
    /// - attempts exhausted → job and round become error
    pub async fn recover(&self, rounds: &RoundStore) -> AppResult<usize> {
        let _guard = self.lock.acquire().await?;
        let mut doc = self.load()?;
        let mut reconciled = 0usize;

        for job in doc
            .jobs
            .iter_mut()
            .filter(|job| job.status == JobStatus::Processing)
        {
            reconciled += 1;
            if self.kv.exists(&transcript_key(&job.round_id)) {
                info!(round_id = %job.round_id, job_id = %job.id, "recovery: transcript exists, completing job");
                job.status = JobStatus::Completed;
                job.updated_at = Utc::now();
                if let Err(e) = rounds.set_status(&job.round_id, RoundStatus::Completed) {
                    warn!(round_id = %job.round_id, error = %e, "recovery: round update failed");
                }
            } else if job.attempts < self.max_attempts {
                info!(
                    round_id = %job.round_id,
                    job_id = %job.id,
                    attempts = job.attempts,
                    "recovery: requeueing interrupted job"
                );
                job.status = JobStatus::Queued;
                job.updated_at = Utc::now();
            } else {
                warn!(round_id = %job.round_id, job_id = %job.id, "recovery: attempts exhausted, parking job as error");
                job.status = JobStatus::Error;
                job.last_error
                    .get_or_insert_with(|| "interrupted with no attempts remaining".to_string());
                job.updated_at = Utc::now();
                if let Err(e) = rounds.set_error(&job.round_id, "transcription attempts exhausted") {
                    warn!(round_id = %job.round_id, error = %e, "recovery: round update failed");
                }
            }
        }

        if reconciled > 0 {
            self.persist(&doc)?;
        }
        Ok(reconciled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::transcript::{TranscriptDocument, TranscriptStore};
    use std::time::Duration;

    fn queue_at(dir: &std::path::Path) -> (Arc<JsonKv>, JobQueue) {
        let kv = Arc::new(JsonKv::new(dir).unwrap());
        let lock = QueueLock::new(
            dir.join("queue/jobs.lock"),
            Duration::from_secs(600),
            Duration::from_millis(10),
            5,
        );
        (kv.clone(), JobQueue::new(kv, lock, 3))
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent_per_round() {
        let dir = tempfile::tempdir().unwrap();
        let (_kv, queue) = queue_at(dir.path());

        let first = queue.enqueue("r1", "audio/r1.webm", JobSource::Recording).await.unwrap();
        let second = queue.enqueue("r1", "audio/r1.webm", JobSource::Recording).await.unwrap();
        assert_eq!(first.id, second.id);

        // Still idempotent while the job is processing.
        let claimed = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        let third = queue.enqueue("r1", "audio/r1.webm", JobSource::Upload).await.unwrap();
        assert_eq!(third.id, first.id);

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.queued + stats.processing, 1);
    }

    #[tokio::test]
    async fn test_concurrent_enqueue_admits_one_job() {
        let dir = tempfile::tempdir().unwrap();
        let (_kv, queue) = queue_at(dir.path());
        let queue = Arc::new(queue);

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    queue.enqueue("r1", "audio/r1.webm", JobSource::Recording).await
                })
            })
            .collect();

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap().unwrap().id);
        }

        // Every racer observed the same single admission.
        assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.processing + stats.completed + stats.error, 0);
    }

    #[tokio::test]
    async fn test_terminal_job_allows_readmission() {
        let dir = tempfile::tempdir().unwrap();
        let (_kv, queue) = queue_at(dir.path());

        let first = queue.enqueue("r1", "a", JobSource::Recording).await.unwrap();
        let claimed = queue.claim_next().await.unwrap().unwrap();
        queue
            .update(claimed.id, |job| job.status = JobStatus::Completed)
            .await
            .unwrap();

        let second = queue.enqueue("r1", "a", JobSource::Recording).await.unwrap();
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_claim_charges_attempts_and_respects_cap() {
        let dir = tempfile::tempdir().unwrap();
        let (_kv, queue) = queue_at(dir.path());

        queue.enqueue("r1", "a", JobSource::Recording).await.unwrap();

        for attempt in 1..=3u32 {
            let job = queue.claim_next().await.unwrap().unwrap();
            assert_eq!(job.status, JobStatus::Processing);
            assert_eq!(job.attempts, attempt);
            // Simulate a crash-recovery requeue without touching attempts.
            queue
                .update(job.id, |job| job.status = JobStatus::Queued)
                .await
                .unwrap();
        }

        // Three attempts spent: the job is never claimed again.
        assert!(queue.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_order_is_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let (_kv, queue) = queue_at(dir.path());

        let a = queue.enqueue("r1", "a", JobSource::Recording).await.unwrap();
        let b = queue.enqueue("r2", "b", JobSource::Upload).await.unwrap();

        assert_eq!(queue.claim_next().await.unwrap().unwrap().id, a.id);
        assert_eq!(queue.claim_next().await.unwrap().unwrap().id, b.id);
        assert!(queue.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_unknown_job_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (_kv, queue) = queue_at(dir.path());
        let err = queue.update(Uuid::new_v4(), |_| {}).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_recover_completes_job_with_existing_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let (kv, queue) = queue_at(dir.path());
        let rounds = RoundStore::new(kv.clone());
        rounds.create("r1", None).unwrap();

        queue.enqueue("r1", "a", JobSource::Recording).await.unwrap();
        let job = queue.claim_next().await.unwrap().unwrap();

        // The prior run finished the work (transcript on disk) but died
        // before marking the job.
        let transcripts = TranscriptStore::new(kv.clone());
        transcripts
            .save("r1", &TranscriptDocument::new("hello", Vec::new(), 1.5))
            .unwrap();

        assert_eq!(queue.recover(&rounds).await.unwrap(), 1);
        let job = queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(rounds.require("r1").unwrap().status, RoundStatus::Completed);
    }

    #[tokio::test]
    async fn test_recover_requeues_when_attempts_remain() {
        let dir = tempfile::tempdir().unwrap();
        let (kv, queue) = queue_at(dir.path());
        let rounds = RoundStore::new(kv);
        rounds.create("r1", None).unwrap();

        queue.enqueue("r1", "a", JobSource::Recording).await.unwrap();
        let job = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(job.attempts, 1);

        queue.recover(&rounds).await.unwrap();
        let job = queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        // The requeued job is claimable again.
        assert!(queue.claim_next().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_recover_errors_out_exhausted_job() {
        let dir = tempfile::tempdir().unwrap();
        let (kv, queue) = queue_at(dir.path());
        let rounds = RoundStore::new(kv);
        rounds.create("r1", None).unwrap();

        let job = queue.enqueue("r1", "a", JobSource::Recording).await.unwrap();
        // Burn every attempt but leave the last claim in `processing`, the
        // state a crash mid-job would leave behind.
        for _ in 0..2 {
            let claimed = queue.claim_next().await.unwrap().unwrap();
            queue
                .update(claimed.id, |job| job.status = JobStatus::Queued)
                .await
                .unwrap();
        }
        let claimed = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.attempts, 3);

        queue.recover(&rounds).await.unwrap();
        let job = queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert!(job.last_error.is_some());
        assert_eq!(rounds.require("r1").unwrap().status, RoundStatus::Error);
        // And it is never claimed again.
        assert!(queue.claim_next().await.unwrap().is_none());
    }
}
