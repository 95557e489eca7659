//! Work queue and bounded worker pool in front of the pipeline.
//!
//! Jobs are de-duplicated while they wait: a file that changes five times
//! before a worker is free is processed once. A job leaves the pending set
//! when a worker picks it up, so a change during processing queues one more
//! run (which the content-hash check turns into a cheap skip when nothing
//! changed).

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{IngestOutcome, Pipeline};
use crate::db::SharedDb;
use crate::watcher::{FileEvent, FileEventKind};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Job {
    Ingest(PathBuf),
    Reprocess(String),
}

#[derive(Clone)]
pub struct WorkQueue {
    tx: mpsc::UnboundedSender<Job>,
    pending: Arc<Mutex<HashSet<Job>>>,
}

impl WorkQueue {
    fn new() -> (Self, mpsc::UnboundedReceiver<Job>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                pending: Arc::new(Mutex::new(HashSet::new())),
            },
            rx,
        )
    }

    /// Queue a job. Returns false when an identical job is already waiting
    /// or the workers have shut down.
    pub fn enqueue(&self, job: Job) -> bool {
        if !self.pending.lock().insert(job.clone()) {
            log::debug!("WorkQueue: {:?} already pending", job);
            return false;
        }
        if self.tx.send(job.clone()).is_err() {
            self.pending.lock().remove(&job);
            return false;
        }
        true
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    fn started(&self, job: &Job) {
        self.pending.lock().remove(job);
    }
}

/// Start the dispatcher. At most `workers` jobs run at once. On shutdown the
/// dispatcher stops taking jobs and waits for the running ones to finish.
pub fn start_workers(
    pipeline: Arc<Pipeline>,
    workers: usize,
    shutdown: CancellationToken,
) -> (WorkQueue, JoinHandle<()>) {
    let (queue, mut rx) = WorkQueue::new();
    let workers = workers.max(1);
    let semaphore = Arc::new(Semaphore::new(workers));
    let dispatcher_queue = queue.clone();

    let handle = tokio::spawn(async move {
        log::info!("WorkQueue: started with {} worker(s)", workers);
        loop {
            let job = tokio::select! {
                _ = shutdown.cancelled() => break,
                job = rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            dispatcher_queue.started(&job);
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                run_job(&pipeline, job).await;
                drop(permit);
            });
        }

        // Drain: every permit back means every worker finished.
        if semaphore.acquire_many(workers as u32).await.is_ok() {
            log::info!("WorkQueue: stopped");
        }
    });

    (queue, handle)
}

async fn run_job(pipeline: &Pipeline, job: Job) {
    match job {
        Job::Ingest(path) => match pipeline.ingest_path(&path).await {
            IngestOutcome::Processed { transcript_id, degraded, .. } => log::debug!(
                "WorkQueue: {} -> {} (degraded={})",
                path.display(),
                transcript_id,
                degraded
            ),
            IngestOutcome::SkippedDuplicate { .. } => {}
            IngestOutcome::Failed { kind, message } => {
                log::debug!("WorkQueue: {} failed: {} {}", path.display(), kind, message)
            }
        },
        Job::Reprocess(id) => {
            if let Err(e) = pipeline.reprocess(&id).await {
                if !e.is_cancelled() {
                    log::warn!("WorkQueue: reprocess of {} failed: {}", id, e);
                }
            }
        }
    }
}

/// Forward watcher events into the queue. Deletes are ignored: ingested
/// knowledge outlives the file it came from.
pub fn forward_file_events(
    mut events: mpsc::Receiver<FileEvent>,
    queue: WorkQueue,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            match event.kind {
                FileEventKind::Create | FileEventKind::Modify => {
                    queue.enqueue(Job::Ingest(event.path));
                }
                FileEventKind::Delete => {
                    log::debug!("WorkQueue: ignoring delete of {}", event.path.display());
                }
            }
        }
    })
}

/// Queue transcripts whose raw content was stored but whose segments never
/// landed. They run through the same worker limit and dedup as new files.
pub fn queue_interrupted(db: &SharedDb, queue: &WorkQueue) -> usize {
    let ids = match db.lock().transcripts_pending_segmentation() {
        Ok(ids) => ids,
        Err(e) => {
            log::warn!("Pipeline: could not list interrupted transcripts: {}", e);
            return 0;
        }
    };
    let queued = ids
        .into_iter()
        .filter(|id| queue.enqueue(Job::Reprocess(id.clone())))
        .count();
    if queued > 0 {
        log::info!("Pipeline: queued {} interrupted transcript(s) for resume", queued);
    }
    queued
}

/// Periodically queue transcripts that were classified by the heuristic,
/// but only while the model is reachable.
pub fn spawn_reprocess_sweep(
    pipeline: Arc<Pipeline>,
    db: SharedDb,
    queue: WorkQueue,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if !pipeline.llm_ready().await {
                continue;
            }
            let ids = match db.lock().transcripts_needing_reprocess() {
                Ok(ids) => ids,
                Err(e) => {
                    log::warn!("WorkQueue: reprocess sweep failed: {}", e);
                    continue;
                }
            };
            let queued = ids
                .into_iter()
                .filter(|id| queue.enqueue(Job::Reprocess(id.clone())))
                .count();
            if queued > 0 {
                log::info!("WorkQueue: queued {} transcript(s) for reprocessing", queued);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;
    use crate::db::NewTranscript;
    use crate::llm::scripted::ScriptedProvider;
    use crate::llm::LlmGateway;
    use crate::processor::PipelineSettings;
    use crate::types::{Config, LlmConfig, TranscriptFormat};

    const CALL: &str = "Me: Hello there.\nTom: Hi, good to meet you.\n";

    /// Raw transcript row with no segments, as left by a crash mid-run.
    fn store_interrupted(db: &SharedDb, name: &str) -> String {
        db.lock()
            .upsert_transcript(&NewTranscript {
                filename: name.into(),
                original_path: format!("/tmp/{}", name),
                raw_content: CALL.into(),
                content_hash: format!("hash-{}", name),
                format: TranscriptFormat::Plain,
                duration_minutes: None,
                call_date: None,
                call_type: None,
                context: None,
                speakers: vec![],
            })
            .unwrap()
            .id
    }

    fn pipeline() -> (Arc<Pipeline>, SharedDb, CancellationToken) {
        let db: SharedDb = Arc::new(Mutex::new(test_db()));
        let gateway = Arc::new(LlmGateway::new(
            Arc::new(ScriptedProvider::offline()),
            &LlmConfig::default(),
        ));
        let shutdown = CancellationToken::new();
        let pipeline = Pipeline::new(
            db.clone(),
            gateway,
            PipelineSettings::from_config(&Config::default()),
            shutdown.clone(),
        );
        (Arc::new(pipeline), db, shutdown)
    }

    #[test]
    fn test_pending_jobs_are_deduplicated() {
        let (queue, _rx) = WorkQueue::new();
        assert!(queue.enqueue(Job::Ingest(PathBuf::from("/a.txt"))));
        assert!(!queue.enqueue(Job::Ingest(PathBuf::from("/a.txt"))));
        assert!(queue.enqueue(Job::Reprocess("t1".into())));
        assert_eq!(queue.pending(), 2);

        queue.started(&Job::Ingest(PathBuf::from("/a.txt")));
        assert!(queue.enqueue(Job::Ingest(PathBuf::from("/a.txt"))));
    }

    #[test]
    fn test_interrupted_transcripts_share_the_dedup() {
        let db: SharedDb = Arc::new(Mutex::new(test_db()));
        let first = store_interrupted(&db, "first.txt");
        let second = store_interrupted(&db, "second.txt");
        let (queue, mut rx) = WorkQueue::new();

        // The sweep got to `first` before startup did.
        assert!(queue.enqueue(Job::Reprocess(first.clone())));
        assert_eq!(queue_interrupted(&db, &queue), 1);
        assert_eq!(queue.pending(), 2);

        let mut jobs = Vec::new();
        while let Ok(job) = rx.try_recv() {
            jobs.push(job);
        }
        assert_eq!(jobs.len(), 2);
        assert!(jobs.contains(&Job::Reprocess(first)));
        assert!(jobs.contains(&Job::Reprocess(second)));
    }

    #[tokio::test]
    async fn test_interrupted_transcript_resumes_through_workers() {
        let (pipeline, db, shutdown) = pipeline();
        let id = store_interrupted(&db, "interrupted.txt");
        let (queue, workers) = start_workers(pipeline, 1, shutdown.clone());

        assert_eq!(queue_interrupted(&db, &queue), 1);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let done = !db.lock().segments_for_transcript(&id).unwrap().is_empty();
            if done {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "transcript was not resumed");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(queue_interrupted(&db, &queue), 0);

        shutdown.cancel();
        workers.await.unwrap();
        assert_eq!(db.lock().list_transcripts(10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_workers_ingest_forwarded_files_and_ignore_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let kept = dir.path().join("kept.txt");
        std::fs::write(&kept, "Me: Hello there.\nTom: Hi, good to meet you.\n").unwrap();
        let gone = dir.path().join("gone.txt");

        let (pipeline, db, shutdown) = pipeline();
        let (queue, workers) = start_workers(pipeline, 2, shutdown.clone());
        let (tx, rx) = mpsc::channel(8);
        let forwarder = forward_file_events(rx, queue.clone(), shutdown.clone());

        tx.send(FileEvent {
            path: gone,
            kind: FileEventKind::Delete,
        })
        .await
        .unwrap();
        tx.send(FileEvent {
            path: kept,
            kind: FileEventKind::Create,
        })
        .await
        .unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let done = db
                .lock()
                .list_transcripts(10)
                .unwrap()
                .iter()
                .any(|t| t.segment_count > 0);
            if done {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "file was not ingested");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        shutdown.cancel();
        workers.await.unwrap();
        forwarder.await.unwrap();

        let db = db.lock();
        assert_eq!(db.list_transcripts(10).unwrap().len(), 1);
        assert!(db.list_ingest_errors(10).unwrap().is_empty());
    }
}
