//! Event normalization onto the caller transport.
//!
//! The normalizer is the single point where strategy events become
//! [`StreamRecord`]s. It deduplicates content, suppresses whitespace-only
//! chunks, surfaces a progress record when the strategy goes quiet, and
//! enforces the hard turn deadline. The pipeline owns the terminal `Done`
//! sentinel; the normalizer never emits it.

use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use switchboard_core::{EngineConfig, ExecutionEvent, LogRecord, StreamRecord};

/// Why the pump loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizerOutcome {
    /// The event channel closed; every event was forwarded.
    Drained,
    /// The request deadline elapsed with the strategy still running.
    DeadlineExceeded,
}

/// Folds execution events onto the stream-record transport.
///
/// One normalizer serves one response; the dedup set lives for exactly
/// that long.
pub struct EventNormalizer {
    progress_interval: Duration,
    request_deadline: Duration,
    seen: HashSet<String>,
}

impl EventNormalizer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            progress_interval: config.progress_interval,
            request_deadline: config.request_deadline,
            seen: HashSet::new(),
        }
    }

    /// Drain `events` into `records` until the channel closes or the
    /// deadline hits. Quiet periods longer than the progress interval
    /// produce a synthetic system log record so the caller sees liveness.
    pub async fn pump(
        &mut self,
        mut events: mpsc::Receiver<ExecutionEvent>,
        records: &mpsc::Sender<StreamRecord>,
    ) -> NormalizerOutcome {
        let started = Instant::now();
        let deadline = started + self.request_deadline;
        let mut last_forward = Instant::now();

        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => {
                            if !self.forward(&event, records).await {
                                return NormalizerOutcome::Drained;
                            }
                            last_forward = Instant::now();
                        }
                        None => return NormalizerOutcome::Drained,
                    }
                }
                _ = tokio::time::sleep_until(last_forward + self.progress_interval) => {
                    let elapsed = started.elapsed().as_secs();
                    let progress = ExecutionEvent::system(
                        format!("still working ({elapsed}s elapsed)"),
                        Some(serde_json::json!({ "elapsed_secs": elapsed })),
                    );
                    if !self.forward(&progress, records).await {
                        return NormalizerOutcome::Drained;
                    }
                    last_forward = Instant::now();
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return NormalizerOutcome::DeadlineExceeded;
                }
            }
        }
    }

    /// Forward one event. Returns false when the record channel is gone.
    async fn forward(
        &mut self,
        event: &ExecutionEvent,
        records: &mpsc::Sender<StreamRecord>,
    ) -> bool {
        let record = match event.content_text() {
            Some(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return true;
                }
                if !self.seen.insert(trimmed.to_string()) {
                    tracing::debug!(chars = text.len(), "suppressed duplicate content chunk");
                    return true;
                }
                StreamRecord::content(text)
            }
            None => match LogRecord::from_event(event) {
                Some(log) => StreamRecord::Log(log),
                None => return true,
            },
        };
        records.send(record).await.is_ok()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::ErrorClass;

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    async fn pump_events(events: Vec<ExecutionEvent>) -> Vec<StreamRecord> {
        let (event_tx, event_rx) = mpsc::channel(16);
        let (record_tx, mut record_rx) = mpsc::channel(16);
        for event in events {
            event_tx.send(event).await.unwrap();
        }
        drop(event_tx);

        let mut normalizer = EventNormalizer::new(&config());
        let outcome = normalizer.pump(event_rx, &record_tx).await;
        assert_eq!(outcome, NormalizerOutcome::Drained);
        drop(record_tx);

        let mut records = Vec::new();
        while let Some(record) = record_rx.recv().await {
            records.push(record);
        }
        records
    }

    #[tokio::test]
    async fn duplicate_content_is_forwarded_once() {
        let records = pump_events(vec![
            ExecutionEvent::content(Some("Final-Answer".into()), "The answer is 42"),
            ExecutionEvent::final_output(Some("Final-Answer".into()), "The answer is 42"),
        ])
        .await;
        assert_eq!(
            records,
            vec![StreamRecord::content("The answer is 42")],
            "identical trimmed content must reach the caller exactly once"
        );
    }

    #[tokio::test]
    async fn whitespace_only_content_is_dropped() {
        let records = pump_events(vec![
            ExecutionEvent::content(None, "   \n\t "),
            ExecutionEvent::content(None, "real text"),
        ])
        .await;
        assert_eq!(records, vec![StreamRecord::content("real text")]);
    }

    #[tokio::test]
    async fn content_keeps_its_original_surrounding_whitespace() {
        let records = pump_events(vec![ExecutionEvent::content(None, "  padded  ")]).await;
        assert_eq!(records, vec![StreamRecord::content("  padded  ")]);
    }

    #[tokio::test]
    async fn diagnostic_events_become_log_records() {
        let records = pump_events(vec![
            ExecutionEvent::tool_call(
                None,
                "dispatch_command",
                Some("/web search query=cats".into()),
                serde_json::json!({"query": "cats"}),
            ),
            ExecutionEvent::error(ErrorClass::CommandExecution, "gateway refused"),
        ])
        .await;
        assert_eq!(records.len(), 2);
        match &records[0] {
            StreamRecord::Log(log) => {
                assert_eq!(log.event_type, "tool_call");
                assert_eq!(log.command.as_deref(), Some("/web search query=cats"));
            }
            other => panic!("expected a log record, got {other:?}"),
        }
        match &records[1] {
            StreamRecord::Log(log) => {
                assert_eq!(log.event_type, "error");
                assert_eq!(log.error.as_deref(), Some("gateway refused"));
            }
            other => panic!("expected a log record, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn normalizer_never_emits_done() {
        let records = pump_events(vec![
            ExecutionEvent::content(None, "a"),
            ExecutionEvent::system("handoff", None),
        ])
        .await;
        assert!(records.iter().all(|r| !r.is_done()));
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_period_produces_a_progress_record() {
        let mut config = config();
        config.progress_interval = Duration::from_secs(10);
        config.request_deadline = Duration::from_secs(300);

        let (event_tx, event_rx) = mpsc::channel::<ExecutionEvent>(4);
        let (record_tx, mut record_rx) = mpsc::channel(4);

        let mut normalizer = EventNormalizer::new(&config);
        let pump = tokio::spawn(async move { normalizer.pump(event_rx, &record_tx).await });

        // Nothing arrives for 11 virtual seconds.
        tokio::time::sleep(Duration::from_secs(11)).await;

        let record = record_rx.recv().await.unwrap();
        match record {
            StreamRecord::Log(log) => {
                assert_eq!(log.event_type, "system");
                let metadata = log.metadata.unwrap();
                assert!(metadata["message"]
                    .as_str()
                    .unwrap()
                    .contains("still working"));
            }
            other => panic!("expected a progress log record, got {other:?}"),
        }

        drop(event_tx);
        assert_eq!(pump.await.unwrap(), NormalizerOutcome::Drained);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_stops_the_pump() {
        let mut config = config();
        config.progress_interval = Duration::from_secs(10);
        config.request_deadline = Duration::from_secs(25);

        // The sender stays open: the strategy is "stuck".
        let (_event_tx, event_rx) = mpsc::channel::<ExecutionEvent>(4);
        let (record_tx, mut record_rx) = mpsc::channel(8);

        let mut normalizer = EventNormalizer::new(&config);
        let outcome = normalizer.pump(event_rx, &record_tx).await;
        assert_eq!(outcome, NormalizerOutcome::DeadlineExceeded);

        // Progress records accrued while waiting, but no Done.
        drop(record_tx);
        while let Some(record) = record_rx.recv().await {
            assert!(!record.is_done());
        }
    }
}
