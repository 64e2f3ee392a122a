//! Trigger scheduler: decides when the coach speaks without being asked.
//!
//! Two policies sit on top of the orchestrator. A trailing-edge debounce
//! collapses bursts of habit/score mutations into one refresh fired after a
//! quiet window, and a daily gate runs one refresh at startup when the last
//! auto-message is missing or at least a day old. Task additions bypass the
//! debounce and refresh immediately.

use std::ops::Add;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::conversation::{Credentials, Orchestrator, DAILY_PROMPT};
use crate::error::ChatError;

/// Outcomes published to whatever presents the coach's messages.
#[derive(Debug, Clone, PartialEq)]
pub enum CoachEvent {
    DailyMessageLoading(bool),
    DailyMessage(String),
    DailyMessageFailed(String),
}

/// A refresh waiting for its quiet window to elapse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRefresh<T> {
    pub id: u64,
    pub fire_at: T,
}

/// Trailing-edge debounce over any clock type. At most one refresh is pending.
#[derive(Debug)]
pub struct Debouncer<T> {
    window: Duration,
    next_id: u64,
    pending: Option<PendingRefresh<T>>,
}

impl<T> Debouncer<T>
where
    T: Copy + Ord + Add<Duration, Output = T>,
{
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            next_id: 0,
            pending: None,
        }
    }

    /// Replace any pending refresh with one firing `window` after `now`.
    pub fn schedule(&mut self, now: T) -> PendingRefresh<T> {
        self.next_id += 1;
        let pending = PendingRefresh {
            id: self.next_id,
            fire_at: now + self.window,
        };
        self.pending = Some(pending);
        pending
    }

    pub fn pending(&self) -> Option<PendingRefresh<T>> {
        self.pending
    }

    /// Take the pending refresh if its fire time has been reached.
    pub fn due(&mut self, now: T) -> Option<PendingRefresh<T>> {
        match self.pending {
            Some(p) if now >= p.fire_at => self.pending.take(),
            _ => None,
        }
    }
}

/// Debounce state and the timer task waiting on it, guarded together so a
/// reschedule swaps both in one step.
struct DebounceSlot {
    debouncer: Debouncer<Instant>,
    timer: Option<JoinHandle<()>>,
}

/// True when no auto-message was ever recorded or the last one is at least
/// `window` old.
pub fn should_auto_message(
    last: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    window: chrono::Duration,
) -> bool {
    match last {
        None => true,
        Some(last) => now - last >= window,
    }
}

struct SchedulerInner {
    orchestrator: Arc<Orchestrator>,
    events: flume::Sender<CoachEvent>,
    title: String,
    daily_window: chrono::Duration,
    slot: Mutex<DebounceSlot>,
}

#[derive(Clone)]
pub struct TriggerScheduler {
    inner: Arc<SchedulerInner>,
}

impl TriggerScheduler {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        events: flume::Sender<CoachEvent>,
        title: impl Into<String>,
        debounce: Duration,
        daily_window: chrono::Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                orchestrator,
                events,
                title: title.into(),
                daily_window,
                slot: Mutex::new(DebounceSlot {
                    debouncer: Debouncer::new(debounce),
                    timer: None,
                }),
            }),
        }
    }

    /// Debounced refresh. Cancels the previously scheduled one, if any has
    /// not fired yet; an in-flight refresh is never cancelled.
    pub fn schedule_refresh(&self) {
        let mut slot = match self.inner.slot.lock() {
            Ok(slot) => slot,
            Err(e) => {
                tracing::error!("Debounce lock poisoned: {}", e);
                return;
            }
        };
        let pending = slot.debouncer.schedule(Instant::now());
        tracing::debug!("Refresh {} scheduled", pending.id);

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(pending.fire_at).await;
            let due = inner
                .slot
                .lock()
                .ok()
                .and_then(|mut slot| slot.debouncer.due(Instant::now()));
            if let Some(fired) = due {
                tracing::debug!("Refresh {} firing", fired.id);
                // Detached so a later reschedule can't abort it mid-flight.
                tokio::spawn(async move {
                    let _ = inner.refresh().await;
                });
            }
        });

        if let Some(previous) = slot.timer.replace(handle) {
            previous.abort();
        }
    }

    /// Immediate, non-debounced refresh in the background.
    pub fn refresh_now(&self) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let _ = inner.refresh().await;
        });
    }

    /// Awaitable refresh used by explicit user requests.
    pub async fn refresh(&self) -> Result<String, ChatError> {
        self.inner.refresh().await
    }

    pub fn has_pending_refresh(&self) -> bool {
        self.inner
            .slot
            .lock()
            .map(|slot| slot.debouncer.pending().is_some())
            .unwrap_or(false)
    }

    /// Run the daily gate against `now`. Returns `None` when the gate is
    /// closed, otherwise the refresh outcome.
    pub async fn run_daily_gate_at(
        &self,
        now: DateTime<Utc>,
    ) -> Option<Result<String, ChatError>> {
        let book = self.inner.orchestrator.book();
        let last = match book.last_daily_message_at() {
            Ok(last) => last,
            Err(e) => {
                tracing::warn!("Could not read last daily message time: {}", e);
                None
            }
        };

        if !should_auto_message(last, now, self.inner.daily_window) {
            tracing::info!("Daily message is fresh; skipping auto refresh");
            return None;
        }

        tracing::info!("Daily gate open; requesting auto message");
        Some(self.inner.refresh().await)
    }

    pub async fn run_daily_gate(&self) -> Option<Result<String, ChatError>> {
        self.run_daily_gate_at(Utc::now()).await
    }
}

impl SchedulerInner {
    fn emit(&self, event: CoachEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("No listener for coach events");
        }
    }

    async fn refresh(&self) -> Result<String, ChatError> {
        self.emit(CoachEvent::DailyMessageLoading(true));
        let result = self.request_daily_message().await;

        match &result {
            Ok(text) => self.emit(CoachEvent::DailyMessage(text.clone())),
            Err(e) => {
                tracing::warn!("Auto message failed: {}", e);
                self.emit(CoachEvent::DailyMessageFailed(e.user_message()));
            }
        }
        self.emit(CoachEvent::DailyMessageLoading(false));
        result
    }

    async fn request_daily_message(&self) -> Result<String, ChatError> {
        let book = self.orchestrator.book();
        let api_key = book
            .credential()
            .map_err(|e| ChatError::Configuration(e.to_string()))?;
        let credentials = Credentials::new(api_key, self.title.clone());

        let outcome = self
            .orchestrator
            .converse(&[], DAILY_PROMPT, &credentials)
            .await?;

        // Recorded even when empty so a blank reply doesn't reopen the gate.
        if let Err(e) = book.record_daily_message(&outcome.final_text, Utc::now()) {
            tracing::warn!("Failed to persist daily message: {:#}", e);
        }
        Ok(outcome.final_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::habits::HabitBook;
    use crate::llm_client::{AssistantReply, ChatCompletionRequest, ChatTransport};
    use crate::store::MemoryStateStore;
    use crate::tools::ToolRegistry;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn burst_collapses_to_one_fire_after_quiet_window() {
        let mut debouncer = Debouncer::new(Duration::from_secs(5));
        let mut fires = Vec::new();

        for second in 0..=10u64 {
            let now = Duration::from_secs(second);
            if second <= 2 {
                debouncer.schedule(now);
            }
            if debouncer.due(now).is_some() {
                fires.push(second);
            }
        }

        assert_eq!(fires, vec![7]);
        assert!(debouncer.pending().is_none());
    }

    #[test]
    fn replaced_refresh_is_not_due_at_its_old_time() {
        let mut debouncer = Debouncer::new(Duration::from_secs(5));
        let first = debouncer.schedule(Duration::ZERO);
        let second = debouncer.schedule(Duration::from_secs(1));

        assert!(debouncer.due(first.fire_at).is_none());
        assert_eq!(debouncer.due(second.fire_at), Some(second));
        assert!(debouncer.due(second.fire_at).is_none());
    }

    #[test]
    fn daily_gate_window() {
        let now = Utc::now();
        let day = chrono::Duration::hours(24);
        assert!(should_auto_message(None, now, day));
        assert!(!should_auto_message(Some(now - chrono::Duration::hours(23)), now, day));
        assert!(should_auto_message(Some(now - chrono::Duration::hours(25)), now, day));
        assert!(should_auto_message(Some(now - day), now, day));
    }

    struct CountingTransport {
        calls: AtomicUsize,
        reply: String,
    }

    #[async_trait]
    impl ChatTransport for CountingTransport {
        async fn complete(
            &self,
            _request: &ChatCompletionRequest,
            _credential: &str,
            _title: &str,
        ) -> Result<AssistantReply, ChatError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(AssistantReply::text(self.reply.clone()))
        }
    }

    fn scheduler(
        reply: &str,
        debounce: Duration,
    ) -> (
        TriggerScheduler,
        Arc<CountingTransport>,
        Arc<HabitBook>,
        flume::Receiver<CoachEvent>,
    ) {
        let transport = Arc::new(CountingTransport {
            calls: AtomicUsize::new(0),
            reply: reply.to_string(),
        });
        let book = Arc::new(HabitBook::new(Arc::new(MemoryStateStore::new()), 5));
        book.set_credential("sk-test").unwrap();
        let orchestrator = Arc::new(Orchestrator::new(
            transport.clone(),
            Arc::new(ToolRegistry::new()),
            book.clone(),
            "test-model",
            0.3,
        ));
        let (tx, rx) = flume::unbounded();
        let scheduler = TriggerScheduler::new(
            orchestrator,
            tx,
            "DEF Habits - Jocko Daily",
            debounce,
            chrono::Duration::hours(24),
        );
        (scheduler, transport, book, rx)
    }

    #[tokio::test]
    async fn gate_skips_recent_message() {
        let (scheduler, transport, book, _rx) = scheduler("Stay on it.", Duration::from_secs(5));
        let now = Utc::now();
        book.record_daily_message("old", now - chrono::Duration::hours(23))
            .unwrap();

        assert!(scheduler.run_daily_gate_at(now).await.is_none());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn gate_runs_once_when_stale_and_records_message() {
        let (scheduler, transport, book, rx) = scheduler("Get after it.", Duration::from_secs(5));
        let now = Utc::now();
        book.record_daily_message("old", now - chrono::Duration::hours(25))
            .unwrap();

        let result = scheduler.run_daily_gate_at(now).await.unwrap();
        assert_eq!(result.unwrap(), "Get after it.");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);

        let stored = book.daily_message().unwrap();
        assert_eq!(stored.text, "Get after it.");
        assert!(stored.generated_at.unwrap() >= now);

        // A second load right after is gated.
        assert!(scheduler.run_daily_gate().await.is_none());

        let events: Vec<_> = rx.drain().collect();
        assert_eq!(
            events,
            vec![
                CoachEvent::DailyMessageLoading(true),
                CoachEvent::DailyMessage("Get after it.".to_string()),
                CoachEvent::DailyMessageLoading(false),
            ]
        );
    }

    #[tokio::test]
    async fn empty_reply_still_closes_the_gate() {
        let (scheduler, transport, book, _rx) = scheduler("", Duration::from_secs(5));

        assert!(scheduler.run_daily_gate().await.is_some());
        assert!(book.last_daily_message_at().unwrap().is_some());
        assert!(scheduler.run_daily_gate().await.is_none());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_credential_reports_failure_without_request() {
        let (scheduler, transport, book, rx) = scheduler("unused", Duration::from_secs(5));
        book.store().remove(crate::catalog::CREDENTIAL_KEY).unwrap();

        let result = scheduler.run_daily_gate().await.unwrap();
        assert!(matches!(result, Err(ChatError::Configuration(_))));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        assert!(book.last_daily_message_at().unwrap().is_none());
        assert!(rx
            .drain()
            .any(|e| matches!(e, CoachEvent::DailyMessageFailed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn debounced_burst_fires_once_after_quiet_window() {
        let (scheduler, transport, _book, _rx) = scheduler("ok", Duration::from_secs(5));

        // Mutations at t=0, 1 and 2; the refresh lands at t=7.
        scheduler.schedule_refresh();
        tokio::time::sleep(Duration::from_secs(1)).await;
        scheduler.schedule_refresh();
        tokio::time::sleep(Duration::from_secs(1)).await;
        scheduler.schedule_refresh();
        assert!(scheduler.has_pending_refresh());

        tokio::time::sleep(Duration::from_millis(4500)).await;
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        assert!(scheduler.has_pending_refresh());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert!(!scheduler.has_pending_refresh());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_schedules_still_fire_exactly_once() {
        let (scheduler, transport, _book, _rx) = scheduler("ok", Duration::from_millis(50));

        for round in 1..=40 {
            let callers: Vec<_> = (0..8)
                .map(|_| {
                    let scheduler = scheduler.clone();
                    tokio::spawn(async move { scheduler.schedule_refresh() })
                })
                .collect();
            for caller in callers {
                caller.await.unwrap();
            }

            tokio::time::sleep(Duration::from_millis(300)).await;
            assert_eq!(transport.calls.load(Ordering::SeqCst), round);
            assert!(!scheduler.has_pending_refresh());
        }
    }

    #[tokio::test]
    async fn refresh_now_is_not_debounced() {
        let (scheduler, transport, _book, rx) = scheduler("Move.", Duration::from_secs(60));

        scheduler.refresh_now();
        let event = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match rx.recv_async().await {
                    Ok(CoachEvent::DailyMessage(text)) => break text,
                    Ok(_) => continue,
                    Err(_) => panic!("event channel closed"),
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(event, "Move.");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }
}
