//! # Transcription Worker
//!
//! A single cooperative loop that drains the job queue: claim, run the
//! external engine, reconcile round and job state, repeat. Jobs execute
//! strictly one at a time; an empty queue is polled at a fixed interval.
//!
//! Errors inside `process_job` are terminal for that job. The only path back
//! to `queued` is crash recovery, and that is bounded by the queue's attempts
//! cap, so a poisonous artifact cannot loop forever.

use crate::error::{AppError, AppResult};
use crate::queue::queue::{JobQueue, JobStatus, TranscriptionJob};
use crate::rounds::{RoundStatus, RoundStore};
use crate::transcription::engine::TranscriptionEngine;
use crate::transcription::transcript::{TranscriptDocument, TranscriptStore};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub struct TranscriptionWorker {
    queue: Arc<JobQueue>,
    rounds: Arc<RoundStore>,
    transcripts: Arc<TranscriptStore>,
    engine: Arc<TranscriptionEngine>,
    poll_interval: Duration,
    default_language: String,
    started: AtomicBool,
}

impl TranscriptionWorker {
    pub fn new(
        queue: Arc<JobQueue>,
        rounds: Arc<RoundStore>,
        transcripts: Arc<TranscriptStore>,
        engine: Arc<TranscriptionEngine>,
        poll_interval: Duration,
        default_language: String,
    ) -> Self {
        Self {
            queue,
            rounds,
            transcripts,
            engine,
            poll_interval,
            default_language,
            started: AtomicBool::new(false),
        }
    }

    /// Start the worker loop. Idempotent: calling this again while a loop is
    /// already running does nothing, so there is never a second claimant.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("transcription worker already running, ignoring start");
            return;
        }
        let worker = Arc::clone(self);
        tokio::spawn(async move {
            worker.run().await;
        });
    }

    /// Recovery once, then the claim/process/sleep loop.
    async fn run(&self) {
        info!(poll_secs = self.poll_interval.as_secs(), "transcription worker starting");

        match self.queue.recover(&self.rounds).await {
            Ok(0) => {}
            Ok(count) => info!(count, "reconciled interrupted jobs"),
            Err(e) => error!(error = %e, "startup recovery failed"),
        }

        loop {
            match self.queue.claim_next().await {
                Ok(Some(job)) => {
                    let job_id = job.id;
                    if let Err(e) = self.process_job(job).await {
                        // process_job already moved the job and round to
                        // their terminal states; this is just visibility.
                        error!(job_id = %job_id, error = %e, "job failed");
                    }
                }
                Ok(None) => {
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(e) => {
                    error!(error = %e, "claim failed");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Drive one claimed job to a terminal state.
    pub async fn process_job(&self, job: TranscriptionJob) -> AppResult<()> {
        info!(
            job_id = %job.id,
            round_id = %job.round_id,
            attempt = job.attempts,
            audio = %job.audio_path,
            "processing transcription job"
        );

        let round = match self.rounds.get(&job.round_id)? {
            Some(round) => round,
            None => {
                let message = format!("round '{}' no longer exists", job.round_id);
                self.fail_job(&job, &message, false).await;
                return Err(AppError::NotFound(message));
            }
        };

        let language = round
            .language
            .clone()
            .unwrap_or_else(|| self.default_language.clone());

        let result = self
            .engine
            .transcribe(Path::new(&job.audio_path), &language)
            .await;

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                let message = e.to_string();
                self.fail_job(&job, &message, true).await;
                return Err(e);
            }
        };

        // Transcript first: once it is on disk, a crash before the status
        // writes below reconciles to completed, never to a duplicate run.
        let transcript =
            TranscriptDocument::new(&output.text, output.words.clone(), output.duration);
        if let Err(e) = self.transcripts.save(&job.round_id, &transcript) {
            let message = format!("failed to persist transcript: {}", e);
            self.fail_job(&job, &message, true).await;
            return Err(e);
        }

        let speaker_count = if output.words.is_empty() { 0 } else { 1 };
        self.rounds.update(&job.round_id, |round| {
            round.status = RoundStatus::Completed;
            round.duration_seconds = Some(output.duration);
            round.speaker_count = Some(speaker_count);
            round.error = None;
        })?;
        self.queue
            .update(job.id, |job| {
                job.status = JobStatus::Completed;
                job.last_error = None;
            })
            .await?;

        info!(
            job_id = %job.id,
            round_id = %job.round_id,
            chars = output.text.len(),
            duration = output.duration,
            "transcription job completed"
        );
        Ok(())
    }

    /// Park the job (and, when it still exists, its round) in `error`.
    /// No retry happens here; only crash recovery requeues.
    async fn fail_job(&self, job: &TranscriptionJob, message: &str, round_exists: bool) {
        warn!(job_id = %job.id, round_id = %job.round_id, error = message, "job terminal failure");

        if round_exists {
            if let Err(e) = self.rounds.set_error(&job.round_id, message) {
                error!(round_id = %job.round_id, error = %e, "failed to mark round error");
            }
        }

        let retained = message.to_string();
        if let Err(e) = self
            .queue
            .update(job.id, move |job| {
                job.status = JobStatus::Error;
                job.last_error = Some(retained);
            })
            .await
        {
            error!(job_id = %job.id, error = %e, "failed to mark job error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::queue::lock::QueueLock;
    use crate::queue::queue::JobSource;
    use crate::storage::JsonKv;
    use std::fs;

    struct Fixture {
        dir: tempfile::TempDir,
        kv: Arc<JsonKv>,
        queue: Arc<JobQueue>,
        rounds: Arc<RoundStore>,
        transcripts: Arc<TranscriptStore>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let kv = Arc::new(JsonKv::new(dir.path()).unwrap());
        let lock = QueueLock::new(
            dir.path().join("queue/jobs.lock"),
            Duration::from_secs(600),
            Duration::from_millis(10),
            5,
        );
        Fixture {
            kv: kv.clone(),
            queue: Arc::new(JobQueue::new(kv.clone(), lock, 3)),
            rounds: Arc::new(RoundStore::new(kv.clone())),
            transcripts: Arc::new(TranscriptStore::new(kv)),
            dir,
        }
    }

    fn worker_with_engine(f: &Fixture, command: &str, script: &str) -> Arc<TranscriptionWorker> {
        let engine = Arc::new(TranscriptionEngine::new(&EngineConfig {
            command: command.to_string(),
            script: script.to_string(),
            models_dir: "models".to_string(),
            default_language: "en".to_string(),
        }));
        Arc::new(TranscriptionWorker::new(
            f.queue.clone(),
            f.rounds.clone(),
            f.transcripts.clone(),
            engine,
            Duration::from_millis(50),
            "en".to_string(),
        ))
    }

    fn fake_engine(f: &Fixture, payload: &str) -> String {
        let script = f.dir.path().join("engine.sh");
        let body = format!(
            "out=\"\"\n\
             while [ \"$#\" -gt 0 ]; do\n\
             \tcase \"$1\" in\n\
             \t\t--output) out=\"$2\"; shift ;;\n\
             \tesac\n\
             \tshift\n\
             done\n\
             printf '%s' '{}' > \"$out\"\n",
            payload
        );
        fs::write(&script, body).unwrap();
        script.to_string_lossy().to_string()
    }

    #[tokio::test]
    async fn test_process_job_success_path() {
        let f = fixture();
        f.rounds.create("r1", Some("en")).unwrap();
        let audio = f.dir.path().join("audio/r1.webm");
        fs::create_dir_all(audio.parent().unwrap()).unwrap();
        fs::write(&audio, b"bytes").unwrap();

        let script = fake_engine(
            &f,
            r#"{"text":"good morning","result":[{"word":"good","start":0.0,"end":0.4,"conf":0.9},{"word":"morning","start":0.5,"end":1.1,"conf":0.95}],"duration":1.1}"#,
        );
        let worker = worker_with_engine(&f, "sh", &script);

        f.queue
            .enqueue("r1", &audio.to_string_lossy(), JobSource::Recording)
            .await
            .unwrap();
        let job = f.queue.claim_next().await.unwrap().unwrap();
        worker.process_job(job.clone()).await.unwrap();

        let round = f.rounds.require("r1").unwrap();
        assert_eq!(round.status, RoundStatus::Completed);
        assert_eq!(round.duration_seconds, Some(1.1));
        assert_eq!(round.speaker_count, Some(1));

        let job = f.queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.last_error.is_none());

        let transcript = f.transcripts.get("r1").unwrap().unwrap();
        assert_eq!(transcript.text, "good morning");
        assert_eq!(transcript.words.len(), 2);
    }

    #[tokio::test]
    async fn test_engine_failure_is_terminal() {
        let f = fixture();
        f.rounds.create("r1", None).unwrap();
        let audio = f.dir.path().join("r1.webm");
        fs::write(&audio, b"bytes").unwrap();

        let worker = worker_with_engine(&f, "/no/such/engine", "script.py");
        f.queue
            .enqueue("r1", &audio.to_string_lossy(), JobSource::Upload)
            .await
            .unwrap();
        let job = f.queue.claim_next().await.unwrap().unwrap();

        assert!(worker.process_job(job.clone()).await.is_err());

        let round = f.rounds.require("r1").unwrap();
        assert_eq!(round.status, RoundStatus::Error);
        assert!(round.error.is_some());

        let job = f.queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert!(job.last_error.as_deref().unwrap().contains("spawn"));

        // Terminal means terminal: nothing claimable without crash recovery.
        assert!(f.queue.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_audio_is_terminal() {
        let f = fixture();
        f.rounds.create("r1", None).unwrap();

        let script = fake_engine(&f, "{}");
        let worker = worker_with_engine(&f, "sh", &script);
        f.queue
            .enqueue("r1", "/gone/r1.webm", JobSource::Recording)
            .await
            .unwrap();
        let job = f.queue.claim_next().await.unwrap().unwrap();

        assert!(worker.process_job(job.clone()).await.is_err());
        let job = f.queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert!(job.last_error.as_deref().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_vanished_round_fails_job_immediately() {
        let f = fixture();
        f.rounds.create("r1", None).unwrap();
        f.queue.enqueue("r1", "a.webm", JobSource::Recording).await.unwrap();
        let job = f.queue.claim_next().await.unwrap().unwrap();

        // Round record deleted between admission and claim.
        f.kv.delete("rounds/r1.json").unwrap();

        let err = worker_with_engine(&f, "sh", "unused.sh")
            .process_job(job.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let job = f.queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Error);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let f = fixture();
        let worker = worker_with_engine(&f, "sh", "unused.sh");

        worker.start();
        // A second start must not spawn a competing loop; observable as the
        // flag staying set rather than panicking or double-claiming.
        worker.start();
        assert!(worker.started.load(Ordering::SeqCst));
    }

    /// Empty words → speaker_count 0: nothing was said, nobody spoke.
    #[tokio::test]
    async fn test_empty_transcript_has_zero_speakers() {
        let f = fixture();
        f.rounds.create("r1", None).unwrap();
        let audio = f.dir.path().join("r1.webm");
        fs::write(&audio, b"silence").unwrap();

        let script = fake_engine(&f, r#"{"text":"","result":[],"duration":4.0}"#);
        let worker = worker_with_engine(&f, "sh", &script);
        f.queue
            .enqueue("r1", &audio.to_string_lossy(), JobSource::Recording)
            .await
            .unwrap();
        let job = f.queue.claim_next().await.unwrap().unwrap();
        worker.process_job(job).await.unwrap();

        let round = f.rounds.require("r1").unwrap();
        assert_eq!(round.speaker_count, Some(0));
        assert_eq!(round.duration_seconds, Some(4.0));
    }
}
