//! The usage tracker: wraps provider calls and ships usage in batches.

use crate::backoff::Backoff;
use crate::config::TrackerConfig;
use crate::error::Result;
use crate::extract;
use crate::sink::{DeliveryReport, HttpSink, UsageSink};
use burnrate_cost::{CallMetadata, UsageEvent, pricing};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Result of a flush attempt that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum FlushOutcome {
    /// The queue was empty; nothing was sent
    Empty,
    /// Another delivery was in flight; this attempt did nothing
    Skipped,
    /// A batch was accepted by the sink
    Delivered(DeliveryReport),
}

/// Meters provider calls and delivers usage events to the ingestion endpoint.
///
/// Cheap to clone; clones share the same queue and timer.
#[derive(Clone)]
pub struct UsageTracker {
    inner: Arc<Inner>,
}

struct Inner {
    config: TrackerConfig,
    sink: Arc<dyn UsageSink>,
    backoff: Backoff,
    queue: Mutex<VecDeque<UsageEvent>>,
    /// Held for the duration of a delivery
    delivery: tokio::sync::Mutex<()>,
    dropped: AtomicU64,
    failures: AtomicU32,
    retry_after: Mutex<Option<Instant>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl UsageTracker {
    /// Create a tracker delivering over HTTP to `config.endpoint`.
    pub fn new(config: TrackerConfig) -> Result<Self> {
        config.validate()?;
        let sink = HttpSink::new(&config.endpoint, &config.api_key, config.request_timeout)?;
        Self::with_sink(config, Arc::new(sink))
    }

    /// Create a tracker with a custom sink.
    pub fn with_sink(config: TrackerConfig, sink: Arc<dyn UsageSink>) -> Result<Self> {
        config.validate()?;
        let backoff = Backoff::new(config.backoff_base, config.backoff_max);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                sink,
                backoff,
                queue: Mutex::new(VecDeque::new()),
                delivery: tokio::sync::Mutex::new(()),
                dropped: AtomicU64::new(0),
                failures: AtomicU32::new(0),
                retry_after: Mutex::new(None),
                timer: Mutex::new(None),
            }),
        })
    }

    /// Tracker configuration.
    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    /// Run a provider call and record its usage.
    ///
    /// The call's own result is returned unchanged, success or failure.
    /// A failed call is recorded as a zero-cost event carrying the error text.
    pub async fn track<T, E, F, Fut>(&self, provider: &str, model: &str, call: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        T: Serialize,
        E: Display,
    {
        let started = Instant::now();
        let outcome = call().await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let event = match &outcome {
            Ok(value) => {
                let counts = match serde_json::to_value(value) {
                    Ok(json) => extract::extract(provider, &json),
                    Err(e) => {
                        debug!(provider, error = %e, "Response not serializable, recording zero tokens");
                        extract::TokenCounts::default()
                    }
                };
                let cost = pricing::cost(provider, model, counts.input, counts.output);
                UsageEvent::new(
                    &self.inner.config.owner_id,
                    provider,
                    model,
                    counts.input,
                    counts.output,
                    cost,
                )
                .with_metadata(CallMetadata::success(latency_ms))
            }
            Err(err) => UsageEvent::new(&self.inner.config.owner_id, provider, model, 0, 0, 0.0)
                .with_metadata(CallMetadata::failure(latency_ms, err.to_string())),
        };

        debug!(
            target: "burnrate::usage",
            provider,
            model,
            input_tokens = event.input_tokens,
            output_tokens = event.output_tokens,
            cost = event.cost,
            latency_ms,
            success = outcome.is_ok(),
            "Tracked call"
        );

        self.enqueue(event);
        self.spawn_flush();
        outcome
    }

    /// Track an OpenAI call.
    pub async fn track_openai<T, E, F, Fut>(&self, model: &str, call: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        T: Serialize,
        E: Display,
    {
        self.track("openai", model, call).await
    }

    /// Track an Anthropic call.
    pub async fn track_anthropic<T, E, F, Fut>(&self, model: &str, call: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        T: Serialize,
        E: Display,
    {
        self.track("anthropic", model, call).await
    }

    /// Track a Google Gemini call.
    pub async fn track_google<T, E, F, Fut>(&self, model: &str, call: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        T: Serialize,
        E: Display,
    {
        self.track("google", model, call).await
    }

    /// Track a Groq call.
    pub async fn track_groq<T, E, F, Fut>(&self, model: &str, call: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        T: Serialize,
        E: Display,
    {
        self.track("groq", model, call).await
    }

    /// Track an NVIDIA call.
    pub async fn track_nvidia<T, E, F, Fut>(&self, model: &str, call: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        T: Serialize,
        E: Display,
    {
        self.track("nvidia", model, call).await
    }

    /// Append an event to the queue, evicting the oldest past the bound.
    pub fn enqueue(&self, event: UsageEvent) {
        let mut queue = self.queue();
        queue.push_back(event);
        self.enforce_bound(&mut queue);
    }

    /// Deliver everything queued, unless a delivery is already in flight.
    pub async fn flush(&self) -> Result<FlushOutcome> {
        let Ok(guard) = self.inner.delivery.try_lock() else {
            debug!("Delivery in flight, skipping flush");
            return Ok(FlushOutcome::Skipped);
        };
        let outcome = self.deliver_queued().await;
        drop(guard);
        outcome
    }

    /// Start the periodic flush timer. Calling it twice has no effect.
    pub fn start(&self) {
        let mut timer = self
            .inner
            .timer
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if timer.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("Flush timer already running");
            return;
        }

        let period = self.inner.config.flush_interval;
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        info!(interval_ms = period.as_millis(), "Starting usage flush timer");

        *timer = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let tracker = UsageTracker { inner };
                if tracker.in_backoff() {
                    debug!("Skipping timer flush during backoff");
                    continue;
                }
                let _ = tracker.flush().await;
            }
        }));
    }

    /// Stop the timer and flush once more, waiting for any in-flight delivery.
    pub async fn stop(&self) -> Result<FlushOutcome> {
        // Once the guard is held the timer task is parked in its tick or in
        // a skipped flush, never mid-delivery.
        let guard = self.inner.delivery.lock().await;
        let handle = self
            .inner
            .timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
            info!("Stopped usage flush timer");
        }

        let outcome = self.deliver_queued().await;
        drop(guard);
        outcome
    }

    /// True while the flush timer is running.
    pub fn is_running(&self) -> bool {
        self.inner
            .timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Number of events waiting for delivery.
    pub fn queued(&self) -> usize {
        self.queue().len()
    }

    /// Events evicted because the queue was full.
    pub fn dropped_events(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Consecutive failed deliveries.
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.failures.load(Ordering::Relaxed)
    }

    /// Budget left given a month's spend.
    pub fn remaining_budget(&self, current_spend: f64) -> f64 {
        self.inner.config.monthly_budget - current_spend
    }

    /// Share of the budget spent, in percent, capped at 100.
    pub fn burn_percentage(&self, current_spend: f64) -> f64 {
        (current_spend / self.inner.config.monthly_budget * 100.0).min(100.0)
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<UsageEvent>> {
        self.inner.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn enforce_bound(&self, queue: &mut VecDeque<UsageEvent>) {
        let max = self.inner.config.max_queue;
        if queue.len() <= max {
            return;
        }
        let excess = queue.len() - max;
        queue.drain(..excess);
        let total = self.inner.dropped.fetch_add(excess as u64, Ordering::Relaxed) + excess as u64;
        warn!(
            evicted = excess,
            dropped_total = total,
            max_queue = max,
            "Usage queue full, dropped oldest events"
        );
    }

    fn spawn_flush(&self) {
        let tracker = self.clone();
        tokio::spawn(async move {
            let _ = tracker.flush().await;
        });
    }

    fn in_backoff(&self) -> bool {
        self.inner
            .retry_after
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some_and(|at| Instant::now() < at)
    }

    /// Snapshot the queue and deliver it. Caller holds the delivery guard.
    async fn deliver_queued(&self) -> Result<FlushOutcome> {
        let batch: Vec<UsageEvent> = {
            let mut queue = self.queue();
            if queue.is_empty() {
                return Ok(FlushOutcome::Empty);
            }
            queue.drain(..).collect()
        };

        match self.inner.sink.deliver(&batch).await {
            Ok(report) => {
                self.inner.failures.store(0, Ordering::Relaxed);
                *self
                    .inner
                    .retry_after
                    .lock()
                    .unwrap_or_else(|e| e.into_inner()) = None;

                for rejected in &report.rejected {
                    warn!(
                        index = ?rejected.index,
                        error = %rejected.error,
                        "Ingestion rejected usage entry, not retrying"
                    );
                }
                debug!(
                    sent = batch.len(),
                    inserted = report.inserted,
                    rejected = report.rejected.len(),
                    "Usage batch delivered"
                );
                Ok(FlushOutcome::Delivered(report))
            }
            Err(e) => {
                let count = batch.len();
                {
                    let mut queue = self.queue();
                    for event in batch.into_iter().rev() {
                        queue.push_front(event);
                    }
                    self.enforce_bound(&mut queue);
                }

                let failures = self.inner.failures.fetch_add(1, Ordering::Relaxed) + 1;
                let delay = self.inner.backoff.delay(failures);
                *self
                    .inner
                    .retry_after
                    .lock()
                    .unwrap_or_else(|e| e.into_inner()) = Some(Instant::now() + delay);

                warn!(
                    error = %e,
                    requeued = count,
                    failures,
                    retry_in_ms = delay.as_millis(),
                    "Usage delivery failed, batch re-queued"
                );
                Err(e)
            }
        }
    }
}
