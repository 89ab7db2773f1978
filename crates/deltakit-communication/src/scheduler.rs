//! Interval request scheduler
//!
//! Coalesces periodic telemetry demands from many owners into one timer per
//! variable. Each variable is polled at the fastest interval any current
//! owner asked for; when the last owner releases it the timer stops and no
//! further request for that variable reaches the transport.
//!
//! Timers are tokio tasks. Every timer carries a generation number that is
//! checked under the scheduler lock before each send, so a tick that races
//! a release or a cadence change is discarded rather than emitted.

use crate::transport::{RequestMessage, SharedTransport};
use deltakit_core::{thread_safe, SchedulerError, ThreadSafe};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Shortest cadence a timer will run at unless configured otherwise
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Identity of a demand holder
///
/// Typically one per view or background service that needs telemetry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(String);

impl OwnerId {
    /// Create an owner id
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Owner name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OwnerId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for OwnerId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl From<&OwnerId> for OwnerId {
    fn from(owner: &OwnerId) -> Self {
        owner.clone()
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Timer bookkeeping counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Timers spawned
    pub timers_started: u64,
    /// Timers cancelled
    pub timers_stopped: u64,
    /// Requests handed to the transport
    pub requests_emitted: u64,
    /// Requests the transport refused
    pub requests_dropped: u64,
}

struct PollTimer {
    interval: Duration,
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct SchedulerState {
    /// variable -> owner -> requested interval
    demands: HashMap<String, HashMap<OwnerId, Duration>>,
    timers: HashMap<String, PollTimer>,
    next_generation: u64,
    stats: SchedulerStats,
}

impl SchedulerState {
    fn wanted_interval(&self, variable: &str) -> Option<Duration> {
        self.demands
            .get(variable)
            .and_then(|owners| owners.values().min().copied())
    }

    fn stop_timer(&mut self, variable: &str) {
        if let Some(timer) = self.timers.remove(variable) {
            timer.handle.abort();
            self.stats.timers_stopped += 1;
            tracing::debug!(
                "Stopped {:?} poll timer for '{}' (gen {})",
                timer.interval,
                variable,
                timer.generation
            );
        }
    }
}

/// Scheduler for periodic variable requests
pub struct IntervalRequestScheduler {
    inner: ThreadSafe<SchedulerState>,
    transport: SharedTransport,
    runtime: Handle,
    min_interval: Duration,
}

impl IntervalRequestScheduler {
    /// Create a scheduler on the current tokio runtime
    pub fn new(transport: SharedTransport) -> Result<Self, SchedulerError> {
        let runtime = Handle::try_current().map_err(|e| SchedulerError::NoRuntime {
            reason: e.to_string(),
        })?;
        Ok(Self::with_runtime(transport, runtime))
    }

    /// Create a scheduler that spawns its timers on `runtime`
    pub fn with_runtime(transport: SharedTransport, runtime: Handle) -> Self {
        Self {
            inner: thread_safe(SchedulerState::default()),
            transport,
            runtime,
            min_interval: DEFAULT_MIN_INTERVAL,
        }
    }

    /// Set the shortest cadence a timer may run at; faster requests are clamped
    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval.max(Duration::from_millis(1));
        self
    }

    /// Register or update `owner`'s demand for `variable`
    ///
    /// Returns the interval recorded for this owner after clamping. The
    /// variable's timer restarts if the fastest demand changed.
    pub fn request(
        &self,
        variable: &str,
        interval_ms: u64,
        owner: impl Into<OwnerId>,
    ) -> Result<Duration, SchedulerError> {
        if interval_ms == 0 {
            return Err(SchedulerError::InvalidInterval {
                variable: variable.to_string(),
            });
        }
        let owner = owner.into();
        let interval = Duration::from_millis(interval_ms).max(self.min_interval);

        let mut state = self.inner.lock();
        state
            .demands
            .entry(variable.to_string())
            .or_default()
            .insert(owner.clone(), interval);
        tracing::trace!("{} requests '{}' every {:?}", owner, variable, interval);
        self.reconcile(&mut state, variable);
        Ok(interval)
    }

    /// Remove every demand held by `owner`
    ///
    /// Returns how many demands were removed. Unknown owners are a no-op.
    pub fn release(&self, owner: impl Into<OwnerId>) -> usize {
        let owner = owner.into();
        let mut state = self.inner.lock();

        let touched: Vec<String> = state
            .demands
            .iter_mut()
            .filter_map(|(variable, owners)| owners.remove(&owner).map(|_| variable.clone()))
            .collect();

        for variable in &touched {
            self.reconcile(&mut state, variable);
        }
        if !touched.is_empty() {
            tracing::trace!("{} released {} variable(s)", owner, touched.len());
        }
        touched.len()
    }

    /// Remove `owner`'s demand for a single variable
    pub fn release_variable(&self, variable: &str, owner: impl Into<OwnerId>) -> bool {
        let owner = owner.into();
        let mut state = self.inner.lock();
        let removed = state
            .demands
            .get_mut(variable)
            .is_some_and(|owners| owners.remove(&owner).is_some());
        if removed {
            self.reconcile(&mut state, variable);
        }
        removed
    }

    /// Effective polling cadence for `variable`, if it is being polled
    pub fn interval_for(&self, variable: &str) -> Option<Duration> {
        self.inner.lock().timers.get(variable).map(|t| t.interval)
    }

    /// Currently polled variables with their cadence, sorted by name
    pub fn active_variables(&self) -> BTreeMap<String, Duration> {
        self.inner
            .lock()
            .timers
            .iter()
            .map(|(variable, timer)| (variable.clone(), timer.interval))
            .collect()
    }

    /// Total number of (variable, owner) demands
    pub fn demand_count(&self) -> usize {
        self.inner.lock().demands.values().map(HashMap::len).sum()
    }

    /// Number of live timers
    pub fn running_timers(&self) -> usize {
        self.inner.lock().timers.len()
    }

    /// Timer bookkeeping counters
    pub fn stats(&self) -> SchedulerStats {
        self.inner.lock().stats
    }

    /// Drop all demands and stop every timer
    pub fn shutdown(&self) {
        let mut state = self.inner.lock();
        state.demands.clear();
        let variables: Vec<String> = state.timers.keys().cloned().collect();
        for variable in &variables {
            state.stop_timer(variable);
        }
        tracing::debug!("Request scheduler shut down, {} timer(s) stopped", variables.len());
    }

    /// Bring the timer for `variable` in line with its demands
    fn reconcile(&self, state: &mut SchedulerState, variable: &str) {
        let wanted = state.wanted_interval(variable);
        let current = state.timers.get(variable).map(|t| t.interval);

        match (wanted, current) {
            (None, None) => {
                state.demands.remove(variable);
            }
            (None, Some(_)) => {
                state.demands.remove(variable);
                state.stop_timer(variable);
            }
            (Some(wanted), Some(current)) if wanted == current => {}
            (Some(wanted), _) => {
                state.stop_timer(variable);
                self.start_timer(state, variable, wanted);
            }
        }
    }

    fn start_timer(&self, state: &mut SchedulerState, variable: &str, interval: Duration) {
        let generation = state.next_generation;
        state.next_generation += 1;

        let inner = Arc::downgrade(&self.inner);
        let transport = self.transport.clone();
        let name = variable.to_string();
        let handle = self.runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !emit_tick(&inner, &transport, &name, generation) {
                    break;
                }
            }
        });

        state.timers.insert(
            variable.to_string(),
            PollTimer {
                interval,
                generation,
                handle,
            },
        );
        state.stats.timers_started += 1;
        tracing::debug!(
            "Started {:?} poll timer for '{}' (gen {})",
            interval,
            variable,
            generation
        );
    }
}

/// Send one request if the timer is still current; false ends the timer task
fn emit_tick(
    inner: &Weak<parking_lot::Mutex<SchedulerState>>,
    transport: &SharedTransport,
    variable: &str,
    generation: u64,
) -> bool {
    let Some(inner) = inner.upgrade() else {
        return false;
    };
    let mut state = inner.lock();
    let current = state
        .timers
        .get(variable)
        .is_some_and(|timer| timer.generation == generation);
    if !current {
        return false;
    }

    // Sent under the lock so a concurrent release cannot be followed by a send.
    match transport.send_request(RequestMessage::new(variable)) {
        Ok(()) => state.stats.requests_emitted += 1,
        Err(e) => {
            state.stats.requests_dropped += 1;
            tracing::warn!("Poll of '{}' dropped: {}", variable, e);
        }
    }
    true
}

impl Drop for IntervalRequestScheduler {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        for (_, timer) in state.timers.drain() {
            timer.handle.abort();
        }
    }
}

impl fmt::Debug for IntervalRequestScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("IntervalRequestScheduler")
            .field("transport", &self.transport.name())
            .field("demands", &state.demands.len())
            .field("timers", &state.timers.len())
            .field("min_interval", &self.min_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ChannelTransport, NoOpTransport, OutboundMessage};
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::sleep;

    fn scheduler() -> (IntervalRequestScheduler, UnboundedReceiver<OutboundMessage>) {
        let (transport, rx) = ChannelTransport::new();
        let scheduler = IntervalRequestScheduler::new(Arc::new(transport)).unwrap();
        (scheduler, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<OutboundMessage>) -> usize {
        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        count
    }

    #[test]
    fn test_new_without_runtime_fails() {
        let err = IntervalRequestScheduler::new(Arc::new(NoOpTransport::new())).unwrap_err();
        assert!(matches!(err, SchedulerError::NoRuntime { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_rejected() {
        let (scheduler, _rx) = scheduler();
        let err = scheduler.request("cpos", 0, "view").unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidInterval { .. }));
        assert_eq!(scheduler.demand_count(), 0);
        assert_eq!(scheduler.running_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_clamped_to_floor() {
        let (scheduler, _rx) = scheduler();
        let scheduler = scheduler.with_min_interval(Duration::from_millis(20));
        assert_eq!(
            scheduler.request("cpos", 1, "view").unwrap(),
            Duration::from_millis(20)
        );
        assert_eq!(scheduler.interval_for("cpos"), Some(Duration::from_millis(20)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_owner_polls_at_cadence() {
        let (scheduler, mut rx) = scheduler();
        scheduler.request("cpos", 50, "view").unwrap();

        sleep(Duration::from_millis(525)).await;
        assert_eq!(drain(&mut rx), 10);
        assert_eq!(scheduler.stats().requests_emitted, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_re_request_same_interval_keeps_timer() {
        let (scheduler, _rx) = scheduler();
        scheduler.request("cpos", 50, "view").unwrap();
        scheduler.request("cpos", 50, "view").unwrap();
        scheduler.request("cpos", 80, "other").unwrap();

        assert_eq!(scheduler.stats().timers_started, 1);
        assert_eq!(scheduler.demand_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_unknown_owner_is_noop() {
        let (scheduler, _rx) = scheduler();
        scheduler.request("cpos", 50, "view").unwrap();
        assert_eq!(scheduler.release("nobody"), 0);
        assert!(!scheduler.release_variable("moStat", "view"));
        assert_eq!(scheduler.running_timers(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_variable_keeps_other_demands() {
        let (scheduler, _rx) = scheduler();
        scheduler.request("cpos", 50, "view").unwrap();
        scheduler.request("super", 100, "view").unwrap();

        assert!(scheduler.release_variable("cpos", "view"));
        assert_eq!(scheduler.interval_for("cpos"), None);
        assert_eq!(scheduler.interval_for("super"), Some(Duration::from_millis(100)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_is_dropped_not_fatal() {
        let scheduler = IntervalRequestScheduler::new(Arc::new(NoOpTransport::new())).unwrap();
        scheduler.request("cpos", 50, "view").unwrap();

        sleep(Duration::from_millis(175)).await;
        let stats = scheduler.stats();
        assert_eq!(stats.requests_dropped, 3);
        assert_eq!(stats.requests_emitted, 0);
        assert_eq!(scheduler.running_timers(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_everything() {
        let (scheduler, mut rx) = scheduler();
        scheduler.request("cpos", 50, "a").unwrap();
        scheduler.request("super", 50, "b").unwrap();
        scheduler.shutdown();

        sleep(Duration::from_millis(500)).await;
        assert_eq!(drain(&mut rx), 0);
        assert_eq!(scheduler.demand_count(), 0);
        let stats = scheduler.stats();
        assert_eq!(stats.timers_started, stats.timers_stopped);
    }

    #[test]
    fn test_owner_id_conversions() {
        let a: OwnerId = "view".into();
        let b: OwnerId = String::from("view").into();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "view");
        assert_eq!(OwnerId::from(&a).as_str(), "view");
    }
}
