//! Bot registry - lifecycle state and per-index worker tasks

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, error, info};

use crate::wire::{ControlOutput, GameTickSnapshot};

use super::{BotPolicy, PolicyFactory, SpawnInfo};

/// Lifecycle of one controlled entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed, not yet driven
    Created,
    /// Has processed at least one frame
    Active,
    /// Terminal; further frames for this index are dropped
    Retired,
}

/// One frame routed to a bot worker
pub struct FrameJob {
    pub snapshot: GameTickSnapshot,
    pub reply: oneshot::Sender<ControlOutput>,
}

/// Reasons a frame could not be handed to a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// Worker still chewing on the previous frame
    Busy,
    /// Worker retired or gone
    Closed,
}

struct HandleInner {
    index: u8,
    team: u8,
    bot_type: String,
    /// Connection that spawned this bot; used for bulk retirement
    conn_id: u64,
    /// Construction failed: permanently retired, answered with neutral output
    failed: bool,
    state: Mutex<LifecycleState>,
    /// Single-slot inbox to the worker; taking it closes the worker down
    job_tx: Mutex<Option<mpsc::Sender<FrameJob>>>,
    /// Most recent successfully computed output, served on deadline misses
    last_output: Mutex<Option<ControlOutput>>,
}

/// Registry-tracked record for one controlled entity
#[derive(Clone)]
pub struct BotHandle {
    inner: Arc<HandleInner>,
}

impl BotHandle {
    fn spawn(spawn: &SpawnInfo, conn_id: u64, policy: Box<dyn BotPolicy>, guard: WorkerGuard) -> Self {
        let (job_tx, job_rx) = mpsc::channel(1);

        let handle = Self {
            inner: Arc::new(HandleInner {
                index: spawn.index,
                team: spawn.team,
                bot_type: spawn.bot_type.clone(),
                conn_id,
                failed: false,
                state: Mutex::new(LifecycleState::Created),
                job_tx: Mutex::new(Some(job_tx)),
                last_output: Mutex::new(None),
            }),
        };

        tokio::spawn(run_worker(handle.clone(), policy, job_rx, guard));

        handle
    }

    fn failed(spawn: &SpawnInfo, conn_id: u64) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                index: spawn.index,
                team: spawn.team,
                bot_type: spawn.bot_type.clone(),
                conn_id,
                failed: true,
                state: Mutex::new(LifecycleState::Retired),
                job_tx: Mutex::new(None),
                last_output: Mutex::new(None),
            }),
        }
    }

    pub fn index(&self) -> u8 {
        self.inner.index
    }

    pub fn conn_id(&self) -> u64 {
        self.inner.conn_id
    }

    pub fn state(&self) -> LifecycleState {
        *self.inner.state.lock()
    }

    pub fn is_retired(&self) -> bool {
        self.state() == LifecycleState::Retired
    }

    /// True for the tombstone of a factory that failed; such an index is
    /// answered with the neutral output instead of being dropped
    pub fn construction_failed(&self) -> bool {
        self.inner.failed
    }

    /// Hand a frame to the worker without waiting on it
    pub fn try_submit(&self, job: FrameJob) -> Result<(), SubmitError> {
        let guard = self.inner.job_tx.lock();
        match guard.as_ref() {
            None => Err(SubmitError::Closed),
            Some(tx) => tx.try_send(job).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SubmitError::Busy,
                mpsc::error::TrySendError::Closed(_) => SubmitError::Closed,
            }),
        }
    }

    /// Last computed output, or the safe neutral default
    pub fn last_or_neutral(&self) -> ControlOutput {
        (*self.inner.last_output.lock()).unwrap_or(ControlOutput::NEUTRAL)
    }

    /// Transition to `Retired` and close the worker inbox
    ///
    /// Idempotent. The worker drains, runs the policy's `retire()` once,
    /// and exits.
    pub fn retire(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state == LifecycleState::Retired {
                return;
            }
            *state = LifecycleState::Retired;
        }
        self.inner.job_tx.lock().take();
        debug!(
            index = self.inner.index,
            team = self.inner.team,
            bot_type = %self.inner.bot_type,
            "Bot retired"
        );
    }

    fn store_output(&self, output: ControlOutput) {
        *self.inner.last_output.lock() = Some(output);
    }

    fn mark_active(&self) {
        let mut state = self.inner.state.lock();
        if *state == LifecycleState::Created {
            *state = LifecycleState::Active;
        }
    }
}

/// Keeps the registry's live-worker count honest across worker exits
struct WorkerGuard {
    live: Arc<AtomicUsize>,
    exit: Arc<Notify>,
}

impl WorkerGuard {
    fn register(live: &Arc<AtomicUsize>, exit: &Arc<Notify>) -> Self {
        live.fetch_add(1, Ordering::AcqRel);
        Self {
            live: live.clone(),
            exit: exit.clone(),
        }
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
        self.exit.notify_waiters();
    }
}

/// Worker task owning one policy; processes frames strictly in order
async fn run_worker(
    handle: BotHandle,
    policy: Box<dyn BotPolicy>,
    mut jobs: mpsc::Receiver<FrameJob>,
    _guard: WorkerGuard,
) {
    let mut policy = Some(policy);

    while let Some(job) = jobs.recv().await {
        let mut p = match policy.take() {
            Some(p) => p,
            None => break,
        };

        let FrameJob { snapshot, reply } = job;
        let result = tokio::task::spawn_blocking(move || {
            let output = p.process_input(&snapshot).clamped();
            (p, output)
        })
        .await;

        match result {
            Ok((p, output)) => {
                policy = Some(p);
                handle.store_output(output);
                handle.mark_active();
                // A reply that misses its tick finds the receiver gone; the
                // output stays cached for the next tick instead.
                let _ = reply.send(output);
            }
            Err(e) => {
                error!(index = handle.index(), error = %e, "Bot policy panicked, retiring index");
                break;
            }
        }
    }

    handle.retire();
    if let Some(mut p) = policy.take() {
        p.retire();
    }
}

/// Mapping from player index to live bot, shared by all connections
///
/// The only shared mutable resource in the process. Creation and
/// retirement take a per-shard entry lock; lookups on distinct indices do
/// not serialize against each other.
pub struct BotRegistry {
    bots: DashMap<u8, BotHandle>,
    live_workers: Arc<AtomicUsize>,
    worker_exit: Arc<Notify>,
}

impl BotRegistry {
    pub fn new() -> Self {
        Self {
            bots: DashMap::new(),
            live_workers: Arc::new(AtomicUsize::new(0)),
            worker_exit: Arc::new(Notify::new()),
        }
    }

    /// Return the live handle for `index`, constructing it if needed
    ///
    /// Concurrent calls for one new index construct exactly one policy:
    /// the map's entry lock serializes the create path per index. A
    /// failed factory leaves a permanent failed tombstone - it is not
    /// retried on later frames.
    pub fn ensure(&self, spawn: &SpawnInfo, conn_id: u64, factory: &PolicyFactory) -> BotHandle {
        match self.bots.entry(spawn.index) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get().clone();
                if !existing.is_retired() || existing.construction_failed() {
                    return existing;
                }
                // Explicitly retired earlier; the engine wants the index back.
                let replacement = self.construct(spawn, conn_id, factory);
                entry.insert(replacement.clone());
                replacement
            }
            Entry::Vacant(entry) => {
                let handle = self.construct(spawn, conn_id, factory);
                entry.insert(handle.clone());
                handle
            }
        }
    }

    fn construct(&self, spawn: &SpawnInfo, conn_id: u64, factory: &PolicyFactory) -> BotHandle {
        match factory(spawn) {
            Ok(policy) => {
                debug_assert_eq!(policy.index(), spawn.index);
                info!(
                    index = spawn.index,
                    team = spawn.team,
                    bot_type = %spawn.bot_type,
                    "Creating bot"
                );
                let guard = WorkerGuard::register(&self.live_workers, &self.worker_exit);
                BotHandle::spawn(spawn, conn_id, policy, guard)
            }
            Err(e) => {
                error!(
                    index = spawn.index,
                    error = %e,
                    "Bot construction failed, marking index failed"
                );
                BotHandle::failed(spawn, conn_id)
            }
        }
    }

    /// Non-mutating lookup on the hot path
    pub fn lookup(&self, index: u8) -> Option<BotHandle> {
        self.bots.get(&index).map(|entry| entry.value().clone())
    }

    /// Retire one index; no-op if unknown or already retired
    pub fn retire(&self, index: u8) {
        if let Some(handle) = self.lookup(index) {
            handle.retire();
        }
    }

    /// Retire and remove every bot spawned by a connection
    ///
    /// Runs on connection loss so a reconnecting engine can claim the
    /// same indices afresh.
    pub fn retire_connection(&self, conn_id: u64) {
        self.bots.retain(|_, handle| {
            if handle.conn_id() == conn_id {
                handle.retire();
                false
            } else {
                true
            }
        });
    }

    /// Retire and remove everything; used at shutdown
    pub fn retire_all(&self) {
        self.bots.retain(|_, handle| {
            handle.retire();
            false
        });
    }

    pub fn len(&self) -> usize {
        self.bots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bots.is_empty()
    }

    /// Resolves once every worker task has exited
    pub async fn drained(&self) {
        loop {
            let notified = self.worker_exit.notified();
            tokio::pin!(notified);
            // Register before checking the count so a worker exiting in
            // between cannot be missed.
            notified.as_mut().enable();
            if self.live_workers.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Default for BotRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::bot::PolicyError;
    use crate::wire::BallState;

    struct CountingPolicy {
        index: u8,
        retires: Arc<AtomicUsize>,
    }

    impl BotPolicy for CountingPolicy {
        fn index(&self) -> u8 {
            self.index
        }

        fn process_input(&mut self, _snapshot: &GameTickSnapshot) -> ControlOutput {
            ControlOutput {
                steer: 0.25,
                ..ControlOutput::NEUTRAL
            }
        }

        fn retire(&mut self) {
            self.retires.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Counters {
        constructions: Arc<AtomicUsize>,
        retires: Arc<AtomicUsize>,
    }

    fn counting_factory() -> (PolicyFactory, Counters) {
        let constructions = Arc::new(AtomicUsize::new(0));
        let retires = Arc::new(AtomicUsize::new(0));
        let counters = Counters {
            constructions: constructions.clone(),
            retires: retires.clone(),
        };

        let factory: PolicyFactory = Arc::new(move |spawn| {
            constructions.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingPolicy {
                index: spawn.index,
                retires: retires.clone(),
            }) as Box<dyn BotPolicy>)
        });

        (factory, counters)
    }

    fn spawn_info(index: u8) -> SpawnInfo {
        SpawnInfo {
            index,
            team: index % 2,
            bot_type: "test".to_string(),
        }
    }

    fn snapshot(index: u8, frame: u32) -> GameTickSnapshot {
        GameTickSnapshot {
            frame,
            game_time: frame as f32 / 60.0,
            player_index: index,
            team: index % 2,
            bot_type: "test".to_string(),
            cars: Vec::new(),
            ball: BallState::default(),
        }
    }

    #[tokio::test]
    async fn ensure_constructs_once_per_index() {
        let registry = BotRegistry::new();
        let (factory, counters) = counting_factory();

        let first = registry.ensure(&spawn_info(3), 0, &factory);
        let second = registry.ensure(&spawn_info(3), 0, &factory);
        registry.ensure(&spawn_info(4), 0, &factory);

        assert_eq!(counters.constructions.load(Ordering::SeqCst), 2);
        assert_eq!(registry.len(), 2);
        assert_eq!(first.state(), LifecycleState::Created);
        assert_eq!(second.index(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_ensure_constructs_once() {
        let registry = Arc::new(BotRegistry::new());
        let (factory, counters) = counting_factory();

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            let factory = factory.clone();
            tasks.push(tokio::spawn(async move {
                registry.ensure(&spawn_info(5), 0, &factory)
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(counters.constructions.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn retire_is_idempotent_and_runs_policy_retire_once() {
        let registry = BotRegistry::new();
        let (factory, counters) = counting_factory();

        let handle = registry.ensure(&spawn_info(1), 0, &factory);
        registry.retire(1);
        registry.retire(1);
        registry.retire(42); // unknown index is a no-op

        registry.drained().await;

        assert_eq!(counters.retires.load(Ordering::SeqCst), 1);
        assert_eq!(handle.state(), LifecycleState::Retired);
        assert_eq!(
            handle.try_submit(FrameJob {
                snapshot: snapshot(1, 1),
                reply: oneshot::channel().0,
            }),
            Err(SubmitError::Closed)
        );
    }

    #[tokio::test]
    async fn worker_serves_frames_and_caches_output() {
        let registry = BotRegistry::new();
        let (factory, _counters) = counting_factory();

        let handle = registry.ensure(&spawn_info(2), 0, &factory);
        assert_eq!(handle.last_or_neutral(), ControlOutput::NEUTRAL);

        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .try_submit(FrameJob {
                snapshot: snapshot(2, 1),
                reply: reply_tx,
            })
            .unwrap();

        let output = reply_rx.await.unwrap();
        assert_eq!(output.steer, 0.25);
        assert_eq!(handle.last_or_neutral(), output);
        assert_eq!(handle.state(), LifecycleState::Active);
    }

    #[tokio::test]
    async fn failed_factory_leaves_permanent_tombstone() {
        let registry = BotRegistry::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_in_factory = attempts.clone();

        let factory: PolicyFactory = Arc::new(move |_spawn| {
            attempts_in_factory.fetch_add(1, Ordering::SeqCst);
            Err(PolicyError::Construction("no such bot type".to_string()))
        });

        let handle = registry.ensure(&spawn_info(6), 0, &factory);
        assert!(handle.is_retired());
        assert!(handle.construction_failed());

        // No retry storm: later frames reuse the tombstone.
        let again = registry.ensure(&spawn_info(6), 0, &factory);
        assert!(again.construction_failed());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ensure_after_explicit_retire_reconstructs() {
        let registry = BotRegistry::new();
        let (factory, counters) = counting_factory();

        registry.ensure(&spawn_info(7), 0, &factory);
        registry.retire(7);
        registry.drained().await;

        let fresh = registry.ensure(&spawn_info(7), 0, &factory);
        assert_eq!(counters.constructions.load(Ordering::SeqCst), 2);
        assert_eq!(fresh.state(), LifecycleState::Created);
    }

    #[tokio::test]
    async fn retire_connection_removes_only_that_connection() {
        let registry = BotRegistry::new();
        let (factory, counters) = counting_factory();

        registry.ensure(&spawn_info(0), 1, &factory);
        registry.ensure(&spawn_info(1), 1, &factory);
        registry.ensure(&spawn_info(2), 2, &factory);

        registry.retire_connection(1);

        assert_eq!(registry.len(), 1);
        assert!(registry.lookup(0).is_none());
        assert!(registry.lookup(2).is_some());

        // Both of connection 1's policies got their retire() call.
        tokio::time::timeout(Duration::from_secs(1), async {
            while counters.retires.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn retire_all_drains_every_worker() {
        let registry = BotRegistry::new();
        let (factory, counters) = counting_factory();

        for index in 0..5 {
            registry.ensure(&spawn_info(index), 0, &factory);
        }
        registry.retire_all();
        registry.drained().await;

        assert!(registry.is_empty());
        assert_eq!(counters.retires.load(Ordering::SeqCst), 5);
    }
}
