use crate::batch::{Batch, BatchRecord, Batcher};
use crate::destination::Destination;
use crate::error::{SeedError, SeedResult};
use crate::progress::JobProgress;
use crate::rewrite::{extract_session_key, rewrite_line, RewriteContext};
use crate::session::{SessionProbabilities, SessionState};
use crate::source::SourceLog;
use crate::window::TimeWindow;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct JobSettings {
    pub window: TimeWindow,
    pub batch_size: usize,
    /// Pause between consecutive flushes.
    pub sleep: Duration,
    /// Fixed seed for reproducible identities; fresh entropy when `None`.
    pub rng_seed: Option<u64>,
    pub probabilities: SessionProbabilities,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSummary {
    pub lines_read: u64,
    pub lines_skipped: u64,
    pub batches_sent: u64,
    pub sessions: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded(JobSummary),
    Failed(String),
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded(_))
    }
}

/// One replay of the source log into one destination.
///
/// The caller claims `progress` (see [`crate::ProgressBoard::try_begin`]) before
/// running the job; `run` records totals, per-flush progress and the final state,
/// and always clears the running flag last.
pub struct ImportJob {
    destination: Arc<dyn Destination>,
    source_path: PathBuf,
    context: RewriteContext,
    settings: JobSettings,
    progress: Arc<JobProgress>,
    cancel: watch::Receiver<bool>,
}

impl ImportJob {
    pub fn new(
        destination: Arc<dyn Destination>,
        source_path: impl Into<PathBuf>,
        context: RewriteContext,
        settings: JobSettings,
        progress: Arc<JobProgress>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            destination,
            source_path: source_path.into(),
            context,
            settings,
            progress,
            cancel,
        }
    }

    pub async fn run(self) -> JobOutcome {
        let destination = self.destination.id().to_string();
        let progress = self.progress.clone();

        info!(
            "import into {} started: {} days, batch size {}, sleep {:?}",
            destination, self.settings.window.days, self.settings.batch_size, self.settings.sleep
        );

        let outcome = match self.execute().await {
            Ok(summary) => {
                progress.mark_succeeded();
                info!(
                    "import into {} finished: {} lines, {} batches, {} sessions, {} skipped",
                    destination,
                    summary.lines_read,
                    summary.batches_sent,
                    summary.sessions,
                    summary.lines_skipped
                );
                JobOutcome::Succeeded(summary)
            }
            Err(exc) => {
                let message = exc.to_string();
                error!("import into {} failed: {}", destination, message);
                progress.mark_failed(message.clone());
                JobOutcome::Failed(message)
            }
        };

        progress.finish();
        outcome
    }

    async fn execute(mut self) -> SeedResult<JobSummary> {
        let mut source = SourceLog::open(&self.source_path)?;
        let total = source.count_lines()?;
        self.progress.set_total(total);
        debug!("{} holds {} lines", source.path().display(), total);

        let rng = match self.settings.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        let mut sessions =
            SessionState::new(self.settings.window, self.settings.probabilities, rng)?;

        self.destination.prepare(&self.settings.window).await?;
        let mut batcher = Batcher::new(self.settings.batch_size);

        let mut lines_read = 0_u64;
        let mut lines_skipped = 0_u64;
        let mut batches_sent = 0_u64;

        while let Some(line) = source.next_line()? {
            lines_read += 1;

            let Some(key) = extract_session_key(&line) else {
                lines_skipped += 1;
                self.progress.record_skipped();
                debug!("skipping line {} without a session key", lines_read);
                continue;
            };

            let identity = sessions.resolve(key)?;
            let record = BatchRecord {
                line: rewrite_line(&line, identity, &self.context),
                timestamp_ms: identity.timestamp_ms,
            };

            if let Some(batch) = batcher.accept(record) {
                self.flush(batch, lines_read, batches_sent).await?;
                batches_sent += 1;
            }
        }

        if let Some(batch) = batcher.finish() {
            self.flush(batch, lines_read, batches_sent).await?;
            batches_sent += 1;
        }

        Ok(JobSummary {
            lines_read,
            lines_skipped,
            batches_sent,
            sessions: sessions.len(),
        })
    }

    async fn flush(&mut self, batch: Batch, lines_read: u64, batches_sent: u64) -> SeedResult<()> {
        if batches_sent > 0 {
            self.pause().await?;
        } else if *self.cancel.borrow() {
            return Err(SeedError::Cancelled);
        }

        self.destination.send(&batch).await?;
        self.progress.set_progress(lines_read);
        self.progress.record_batch();

        info!(
            "{} batch {} sent: {} records, {}/{} lines",
            self.destination.id(),
            batches_sent + 1,
            batch.len(),
            lines_read,
            self.progress.total()
        );
        Ok(())
    }

    /// Waits out the configured sleep, returning early with `Cancelled` if the
    /// cancel flag is raised.
    async fn pause(&mut self) -> SeedResult<()> {
        if *self.cancel.borrow() {
            return Err(SeedError::Cancelled);
        }
        if self.settings.sleep.is_zero() {
            return Ok(());
        }

        let deadline = tokio::time::sleep(self.settings.sleep);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => return Ok(()),
                changed = self.cancel.changed() => {
                    if changed.is_err() {
                        // Sender gone: nobody can cancel any more.
                        deadline.await;
                        return Ok(());
                    }
                    if *self.cancel.borrow() {
                        return Err(SeedError::Cancelled);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::elastic_sink::tests::{
        elastic_config, spawn_mock_cluster, spawn_mock_cluster_with, MockCluster,
    };
    use crate::elastic_sink::ElasticBulkSink;
    use crate::error::DeliveryError;
    use crate::progress::ProgressBoard;
    use crate::window::MS_PER_DAY;
    use async_trait::async_trait;
    use eventseed_elastic::ElasticClient;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::Mutex;

    pub(crate) const MIDNIGHT: i64 = 1_792_281_600_000;

    /// Keeps every batch it is sent.
    #[derive(Default)]
    pub(crate) struct RecordingDestination {
        pub(crate) prepared: Mutex<Vec<TimeWindow>>,
        pub(crate) batches: Mutex<Vec<Batch>>,
    }

    #[async_trait]
    impl Destination for RecordingDestination {
        fn id(&self) -> &str {
            "recording"
        }

        async fn prepare(&self, window: &TimeWindow) -> Result<(), DeliveryError> {
            self.prepared.lock().expect("prepared lock").push(*window);
            Ok(())
        }

        async fn send(&self, batch: &Batch) -> Result<(), DeliveryError> {
            self.batches.lock().expect("batches lock").push(batch.clone());
            Ok(())
        }
    }

    pub(crate) fn event_line(idx: usize, session: usize) -> String {
        format!(
            r#"{{"event_type":"pageView","event_timestamp":1590000000000,"attributes":{{"session":"sess-{session}","blogId":"1","networkId":"1","url":"https://altis-dev.altis.dev/post-{idx}/"}},"endpoint":{{"Id":"visitor-{session}","Attributes":{{"DeviceType":["Desktop"]}},"Location":{{"Country":"GB"}}}}}}"#
        )
    }

    /// `lines` events spread round-robin over `sessions` session keys.
    pub(crate) fn fixture_log(lines: usize, sessions: usize) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp log");
        for idx in 0..lines {
            writeln!(file, "{}", event_line(idx, idx % sessions)).expect("write line");
        }
        file
    }

    pub(crate) fn settings(batch_size: usize, sleep: Duration) -> JobSettings {
        JobSettings {
            window: TimeWindow::new(MIDNIGHT, 7),
            batch_size,
            sleep,
            rng_seed: Some(42),
            probabilities: SessionProbabilities::default(),
        }
    }

    fn context() -> RewriteContext {
        RewriteContext {
            placeholder_origin: "https://altis-dev.altis.dev".to_string(),
            base_url: "https://demo.example.com".to_string(),
            blog_id: "7".to_string(),
            network_id: "3".to_string(),
            ..RewriteContext::default()
        }
    }

    fn job(
        destination: Arc<dyn Destination>,
        path: &std::path::Path,
        settings: JobSettings,
        progress: Arc<JobProgress>,
    ) -> (ImportJob, watch::Sender<bool>) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        (
            ImportJob::new(destination, path, context(), settings, progress, cancel_rx),
            cancel_tx,
        )
    }

    #[tokio::test]
    async fn replays_log_into_batches_within_window() {
        let log = fixture_log(1000, 50);
        let board = ProgressBoard::new();
        let progress = board.try_begin("recording").expect("claim");
        let destination = Arc::new(RecordingDestination::default());

        let (job, _cancel) = job(
            destination.clone(),
            log.path(),
            settings(64, Duration::ZERO),
            progress,
        );
        let outcome = job.run().await;

        assert_eq!(
            outcome,
            JobOutcome::Succeeded(JobSummary {
                lines_read: 1000,
                lines_skipped: 0,
                batches_sent: 16,
                sessions: 50,
            })
        );

        let batches = destination.batches.lock().expect("batches lock").clone();
        assert_eq!(batches.len(), 16);
        assert_eq!(batches.iter().map(Batch::len).sum::<usize>(), 1000);
        assert_eq!(batches.last().map(Batch::len), Some(1000 % 64));

        let window = TimeWindow::new(MIDNIGHT, 7);
        let mut session_times = HashMap::<String, i64>::new();
        for record in batches.iter().flat_map(|batch| batch.records.iter()) {
            assert!(window.contains(record.timestamp_ms));
            assert!(record.timestamp_ms >= MIDNIGHT - 7 * MS_PER_DAY);

            let event: Value = serde_json::from_str(&record.line).expect("rewritten json");
            assert_eq!(event["event_timestamp"], record.timestamp_ms);
            assert_eq!(event["attributes"]["blogId"], "7");
            let session = event["attributes"]["session"]
                .as_str()
                .expect("session")
                .to_string();
            let first = *session_times.entry(session).or_insert(record.timestamp_ms);
            assert_eq!(first, record.timestamp_ms);
        }
        assert_eq!(session_times.len(), 50);

        let snapshot = board.snapshot("recording");
        assert_eq!(snapshot.total, 1000);
        assert_eq!(snapshot.progress, 1000);
        assert_eq!(snapshot.batches_sent, 16);
        assert!(snapshot.succeeded);
        assert!(!snapshot.running);
        assert_eq!(
            destination.prepared.lock().expect("prepared lock").clone(),
            vec![window]
        );
    }

    #[tokio::test]
    async fn lines_without_session_key_are_counted_but_not_sent() {
        let mut log = tempfile::NamedTempFile::new().expect("temp log");
        writeln!(log, "{}", event_line(0, 1)).expect("write");
        writeln!(log, "not an event").expect("write");
        writeln!(log, "{}", event_line(1, 1)).expect("write");
        writeln!(log).expect("write");
        writeln!(log, "{}", event_line(2, 2)).expect("write");

        let board = ProgressBoard::new();
        let progress = board.try_begin("recording").expect("claim");
        let destination = Arc::new(RecordingDestination::default());
        let (job, _cancel) = job(
            destination.clone(),
            log.path(),
            settings(2, Duration::ZERO),
            progress,
        );

        let outcome = job.run().await;
        assert!(outcome.is_success());

        let batches = destination.batches.lock().expect("batches lock").clone();
        assert_eq!(batches.iter().map(Batch::len).sum::<usize>(), 3);
        assert!(batches
            .iter()
            .flat_map(|batch| batch.records.iter())
            .all(|record| record.line.starts_with('{')));

        let snapshot = board.snapshot("recording");
        assert_eq!(snapshot.total, 5);
        assert_eq!(snapshot.progress, 5);
        assert_eq!(snapshot.lines_skipped, 2);
    }

    #[tokio::test]
    async fn missing_source_fails_before_any_write() {
        let dir = tempfile::tempdir().expect("temp dir");
        let board = ProgressBoard::new();
        let progress = board.try_begin("recording").expect("claim");
        let destination = Arc::new(RecordingDestination::default());

        let (job, _cancel) = job(
            destination.clone(),
            &dir.path().join("events.log"),
            settings(10, Duration::ZERO),
            progress,
        );
        let outcome = job.run().await;

        match outcome {
            JobOutcome::Failed(message) => assert!(message.contains("could not be read")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(destination.prepared.lock().expect("prepared lock").is_empty());
        let snapshot = board.snapshot("recording");
        assert!(!snapshot.running);
        assert!(!snapshot.succeeded);
        assert!(snapshot.failed.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_error_on_second_batch_stops_the_import() {
        let (url, cluster) = spawn_mock_cluster("7.10.2", Some(2)).await;
        let sink = ElasticBulkSink::new(ElasticClient::new(elastic_config(url)).expect("client"));
        let log = fixture_log(10, 3);

        let board = ProgressBoard::new();
        let progress = board.try_begin("elasticsearch").expect("claim");
        let (job, _cancel) = job(
            Arc::new(sink),
            log.path(),
            settings(4, Duration::ZERO),
            progress,
        );
        let outcome = job.run().await;

        assert!(!outcome.is_success());
        let snapshot = board.snapshot("elasticsearch");
        let failed = snapshot.failed.expect("failure recorded");
        assert!(failed.contains("disk watermark exceeded"), "{failed}");
        assert!(!snapshot.running);
        assert!(!snapshot.succeeded);
        assert_eq!(snapshot.progress, 4);
        assert_eq!(snapshot.batches_sent, 1);
        assert_eq!(cluster.bulk_bodies.lock().expect("bulk lock").len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bulk_timeout_fails_the_import() {
        let (url, _cluster) = spawn_mock_cluster_with(
            "7.10.2",
            MockCluster {
                bulk_delay: Some(Duration::from_secs(3)),
                ..MockCluster::default()
            },
        )
        .await;
        let mut config = elastic_config(url);
        config.timeout_seconds = 0.2;
        let sink = ElasticBulkSink::new(ElasticClient::new(config).expect("client"));
        let log = fixture_log(6, 2);

        let board = ProgressBoard::new();
        let progress = board.try_begin("elasticsearch").expect("claim");
        let (job, _cancel) = job(
            Arc::new(sink),
            log.path(),
            settings(3, Duration::ZERO),
            progress,
        );
        let outcome = tokio::time::timeout(Duration::from_secs(2), job.run())
            .await
            .expect("job gives up at the client timeout");

        match outcome {
            JobOutcome::Failed(message) => {
                assert!(message.starts_with("elasticsearch delivery failed"), "{message}")
            }
            other => panic!("expected failure, got {other:?}"),
        }
        let snapshot = board.snapshot("elasticsearch");
        assert!(!snapshot.running);
        assert!(!snapshot.succeeded);
        assert!(snapshot.failed.is_some());
        assert_eq!(snapshot.progress, 0);
        assert_eq!(snapshot.batches_sent, 0);
    }

    #[tokio::test]
    async fn cancel_during_sleep_fails_the_import() {
        let log = fixture_log(3, 3);
        let board = ProgressBoard::new();
        let progress = board.try_begin("recording").expect("claim");
        let destination = Arc::new(RecordingDestination::default());
        let (job, cancel) = job(
            destination.clone(),
            log.path(),
            settings(1, Duration::from_secs(30)),
            progress.clone(),
        );

        let handle = tokio::spawn(job.run());
        for _ in 0..200 {
            if progress.batches_sent() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.send(true).expect("job listening");

        let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("job stops promptly")
            .expect("job task");
        assert_eq!(outcome, JobOutcome::Failed("import cancelled".to_string()));
        assert_eq!(destination.batches.lock().expect("batches lock").len(), 1);
        assert!(!progress.is_running());
        assert_eq!(progress.progress(), 1);
    }

    #[tokio::test]
    async fn seeded_runs_produce_identical_output() {
        let log = fixture_log(40, 7);
        let mut outputs = Vec::new();
        for _ in 0..2 {
            let board = ProgressBoard::new();
            let progress = board.try_begin("recording").expect("claim");
            let destination = Arc::new(RecordingDestination::default());
            let (job, _cancel) = job(
                destination.clone(),
                log.path(),
                settings(16, Duration::ZERO),
                progress,
            );
            assert!(job.run().await.is_success());
            let batches = destination.batches.lock().expect("batches lock").clone();
            outputs.push(batches);
        }
        assert_eq!(outputs[0], outputs[1]);
    }
}
