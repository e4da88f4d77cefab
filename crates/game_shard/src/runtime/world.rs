//! The world orchestrator: startup, the tick loop, and shutdown.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use tracing::{error, info, info_span, warn};

use game_shard_proto::{SequencerClient, Transaction};

use super::config::WorldConfig;
use super::context::WorldContext;
use super::entity_store::{EntityCommandBuffer, ReadOnlyStore};
use super::error::WorldError;
use super::events::{EventEmitter, TickResults};
use super::receipt::{History, Receipt, DEFAULT_HISTORICAL_TICKS_TO_STORE};
use super::router::ShardRouter;
use super::search::{ComponentFilter, Search};
use super::stage::{Stage, StageManager};
use super::storage::{KeyValueStore, MemoryKvStore, NonceStore};
use super::system::SystemManager;
use super::tx_pool::{TxPool, TxSnapshot};
use super::types::{EntityId, Tick, Timestamp, TxHash};
use super::util::{lock, now_unix_ms};

/// Messages accepted by the game loop thread between ticks.
enum LoopControl {
    /// Registers a one-shot channel closed after the next completed tick.
    Waiter(Sender<()>),
    /// Begins the drain-and-exit sequence.
    Shutdown,
}

/// Result of an EVM-originated transaction, retained for `message_result`
/// queries from the bridge side.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvmTxResult {
    pub result: Option<JsonValue>,
    pub errors: Vec<String>,
}

/// Raw component dump for one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebugStateElement {
    pub id: EntityId,
    pub components: BTreeMap<String, JsonValue>,
}

/// Per-entity component payloads matched by a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityStateElement {
    pub id: EntityId,
    pub data: Vec<JsonValue>,
}

/// The world runtime. Owns the transaction pool, entity command buffer,
/// receipt history, stage machine, and systems; the tick loop is
/// single-threaded by construction while producers push transactions
/// concurrently.
pub struct World {
    config: WorldConfig,
    stage: StageManager,
    nonces: NonceStore,
    entity_store: Mutex<EntityCommandBuffer>,
    systems: SystemManager,
    tx_pool: TxPool,
    receipt_history: Mutex<History>,
    tick_results: Mutex<TickResults>,
    evm_tx_receipts: Mutex<HashMap<String, EvmTxResult>>,
    router: Option<ShardRouter>,
    emitter: Option<Box<dyn EventEmitter>>,
    tick: AtomicU64,
    timestamp: AtomicU64,
    tick_interval: Duration,
    tick_done: Mutex<Option<Sender<Tick>>>,
    control: Mutex<Option<Sender<LoopControl>>>,
}

impl World {
    /// Creates a world over a fresh in-memory store.
    pub fn new(config: WorldConfig) -> Result<Self, WorldError> {
        Self::with_storage(config, Arc::new(MemoryKvStore::new()))
    }

    /// Creates a world over an existing store handle. Reopening a world over
    /// the same handle observes previously committed state.
    pub fn with_storage(
        config: WorldConfig,
        storage: Arc<dyn KeyValueStore>,
    ) -> Result<Self, WorldError> {
        config.validate()?;
        if config.rollup_enabled {
            info!(namespace = %config.namespace, "creating world in rollup mode");
        } else {
            warn!(
                namespace = %config.namespace,
                "running in development mode without rollup sequencing; \
                 set CARDINAL_ROLLUP=true for production use"
            );
        }

        let entity_store = EntityCommandBuffer::new(Arc::clone(&storage), &config.namespace)?;
        let nonces = NonceStore::new(storage, &config.namespace);
        let tick_interval = config.tick_interval();
        Ok(Self {
            config,
            stage: StageManager::new(),
            nonces,
            entity_store: Mutex::new(entity_store),
            systems: SystemManager::new(),
            tx_pool: TxPool::new(),
            receipt_history: Mutex::new(History::new(0, DEFAULT_HISTORICAL_TICKS_TO_STORE)),
            tick_results: Mutex::new(TickResults::new(0)),
            evm_tx_receipts: Mutex::new(HashMap::new()),
            router: None,
            emitter: None,
            tick: AtomicU64::new(0),
            timestamp: AtomicU64::new(0),
            tick_interval,
            tick_done: Mutex::new(None),
            control: Mutex::new(None),
        })
    }

    // -------------------------------------------------------------------------
    // Pre-start options
    // -------------------------------------------------------------------------

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Attaches the sequencer client the outbound router submits to.
    /// Required when the configuration enables rollup mode.
    pub fn with_sequencer(mut self, client: Arc<dyn SequencerClient>) -> Self {
        self.router = Some(ShardRouter::new(&self.config.namespace, client));
        self
    }

    pub fn with_event_emitter(mut self, emitter: Box<dyn EventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// The completed tick number is sent on `done` after every tick; the
    /// channel closes when the loop shuts down.
    pub fn with_tick_done_channel(self, done: Sender<Tick>) -> Self {
        *lock(&self.tick_done) = Some(done);
        self
    }

    pub fn with_receipt_history_size(self, size: u64) -> Self {
        *lock(&self.receipt_history) = History::new(0, size);
        self
    }

    // -------------------------------------------------------------------------
    // Registration (stage Init only)
    // -------------------------------------------------------------------------

    pub fn register_component(&self, name: &str) -> Result<(), WorldError> {
        self.ensure_not_started("component")?;
        lock(&self.entity_store).register_component(name)
    }

    pub fn register_system<F>(&self, name: impl Into<String>, run: F) -> Result<(), WorldError>
    where
        F: Fn(&mut WorldContext<'_>) -> Result<(), WorldError> + Send + Sync + 'static,
    {
        self.ensure_not_started("system")?;
        self.systems.register_system(name, run)
    }

    pub fn register_init_system<F>(&self, name: impl Into<String>, run: F) -> Result<(), WorldError>
    where
        F: Fn(&mut WorldContext<'_>) -> Result<(), WorldError> + Send + Sync + 'static,
    {
        self.ensure_not_started("init system")?;
        self.systems.register_init_system(name, run)
    }

    fn ensure_not_started(&self, what: &str) -> Result<(), WorldError> {
        if self.stage.current() != Stage::Init {
            return Err(WorldError::RegistrationClosed {
                what: what.to_string(),
            });
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    pub fn current_tick(&self) -> Tick {
        self.tick.load(Ordering::SeqCst)
    }

    /// Timestamp recorded for the most recent tick.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp.load(Ordering::SeqCst)
    }

    pub fn current_stage(&self) -> Stage {
        self.stage.current()
    }

    pub fn is_game_running(&self) -> bool {
        self.stage.current() == Stage::Running
    }

    pub fn receipt_history_size(&self) -> u64 {
        lock(&self.receipt_history).size()
    }

    /// Receipts for a completed tick still inside the history window.
    pub fn receipts_for_tick(&self, tick: Tick) -> Result<Vec<Receipt>, WorldError> {
        lock(&self.receipt_history).receipts_for_tick(tick)
    }

    /// Name of the system currently executing, if a tick is in flight.
    pub fn current_system(&self) -> Option<String> {
        self.systems.current_system()
    }

    // -------------------------------------------------------------------------
    // Transactions
    // -------------------------------------------------------------------------

    /// Adds a signed transaction to the pool and returns the tick counter at
    /// call time plus the derived tx hash. The returned tick is advisory: a
    /// tick boundary may be crossed between the counter read and the pool
    /// append, in which case the transaction executes on a later tick.
    pub fn add_transaction(&self, tx: Transaction) -> (Tick, TxHash) {
        let tick = self.current_tick();
        let tx_hash = self.tx_pool.add_transaction(tx);
        (tick, tx_hash)
    }

    /// Same as `add_transaction` for a transaction triggered by an EVM
    /// contract call; the result becomes queryable by `evm_tx_hash`.
    pub fn add_evm_transaction(
        &self,
        tx: Transaction,
        evm_tx_hash: impl Into<String>,
    ) -> (Tick, TxHash) {
        let tick = self.current_tick();
        let tx_hash = self.tx_pool.add_evm_transaction(tx, evm_tx_hash);
        (tick, tx_hash)
    }

    /// Claims a signer nonce. Succeeds at most once per `(signer, nonce)`.
    pub fn use_nonce(&self, signer_address: &str, nonce: u64) -> Result<(), WorldError> {
        self.nonces.use_nonce(signer_address, nonce)
    }

    /// Removes and returns the stored result for an EVM-originated
    /// transaction.
    pub fn consume_evm_tx_result(&self, evm_tx_hash: &str) -> Option<EvmTxResult> {
        lock(&self.evm_tx_receipts).remove(evm_tx_hash)
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Read-only view over committed entity state.
    pub fn store_reader(&self) -> ReadOnlyStore {
        lock(&self.entity_store).to_read_only()
    }

    pub fn search(&self, filter: ComponentFilter) -> Search {
        Search::new(self.store_reader(), filter)
    }

    /// Every entity with all component payloads as raw JSON.
    pub fn debug_state(&self) -> Result<Vec<DebugStateElement>, WorldError> {
        let reader = self.store_reader();
        let mut result = Vec::new();
        for id in reader.entity_ids()? {
            let mut components = BTreeMap::new();
            for name in reader.component_names_for_entity(id)? {
                components.insert(name.clone(), reader.component_for_entity_raw_json(id, &name)?);
            }
            result.push(DebugStateElement { id, components });
        }
        Ok(result)
    }

    /// Evaluates an already-parsed component query. The query-language
    /// parser is an external front-end that produces the filter.
    pub fn evaluate_query(
        &self,
        filter: &ComponentFilter,
    ) -> Result<Vec<EntityStateElement>, WorldError> {
        let reader = self.store_reader();
        let mut result = Vec::new();
        let mut each_err: Option<WorldError> = None;
        Search::new(reader.clone(), filter.clone()).each(|id| {
            let components = match reader.component_names_for_entity(id) {
                Ok(components) => components,
                Err(err) => {
                    each_err = Some(err);
                    return false;
                }
            };
            let mut data = Vec::new();
            for component in &components {
                match reader.component_for_entity_raw_json(id, component) {
                    Ok(value) => data.push(value),
                    Err(err) => {
                        each_err = Some(err);
                        return false;
                    }
                }
            }
            result.push(EntityStateElement { id, data });
            true
        })?;
        match each_err {
            Some(err) => Err(err),
            None => Ok(result),
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Runs the world until shutdown, blocking the calling thread. Ticks are
    /// attempted once per tick interval once startup reaches `Running`. A
    /// tick error unwinds out of this call as the terminal panic.
    pub fn start_game(&self) -> Result<(), WorldError> {
        if !self.stage.compare_and_swap(Stage::Init, Stage::Starting) {
            return Err(WorldError::AlreadyStarted);
        }
        let result = self.run();
        self.cleanup();
        result
    }

    fn run(&self) -> Result<(), WorldError> {
        // Waiter registration opens before the stage reaches `Running` so a
        // caller that observes `Running` can always register.
        let (control_tx, control_rx) = mpsc::channel();
        *lock(&self.control) = Some(control_tx);

        self.startup()?;
        self.game_loop(control_rx);
        Ok(())
    }

    fn startup(&self) -> Result<(), WorldError> {
        if self.config.rollup_enabled && self.router.is_none() {
            return Err(WorldError::Startup {
                reason: "rollup mode requires a sequencer client".to_string(),
            });
        }
        if let Some(router) = &self.router {
            router.start()?;
            router.register_game_shard()?;
        }

        self.stage.store(Stage::Recovering);
        let tick = lock(&self.entity_store).last_finalized_tick();
        self.tick.store(tick, Ordering::SeqCst);

        if self.config.rollup_enabled && self.router.is_some() {
            self.recover_from_chain()?;
        }

        lock(&self.receipt_history).set_tick(self.current_tick());
        self.stage.store(Stage::Running);
        info!(
            namespace = %self.config.namespace,
            tick = self.current_tick(),
            systems = self.systems.system_names().len(),
            "world is running"
        );
        Ok(())
    }

    /// Replays every historical tick blob the sequencer holds for this
    /// namespace, advancing the tick counter through `do_tick` with each
    /// blob's original timestamp. Any error halts startup.
    fn recover_from_chain(&self) -> Result<(), WorldError> {
        let router = match &self.router {
            Some(router) => router,
            None => return Ok(()),
        };
        let blobs = router.historical_ticks(self.current_tick())?;
        if blobs.is_empty() {
            return Ok(());
        }
        info!(blobs = blobs.len(), "recovering ticks from base shard");
        for blob in blobs {
            if blob.tick != self.current_tick() {
                return Err(WorldError::Recovery {
                    reason: format!(
                        "sequencer returned tick {} while recovering tick {}",
                        blob.tick,
                        self.current_tick()
                    ),
                });
            }
            for tx in blob.transactions {
                self.tx_pool.add_transaction(tx);
            }
            self.do_tick(blob.timestamp_ms)?;
        }
        Ok(())
    }

    fn game_loop(&self, control: Receiver<LoopControl>) {
        info!("game loop started");
        let mut waiting: Vec<Sender<()>> = Vec::new();
        let mut next_tick_at = Instant::now() + self.tick_interval;
        loop {
            let timeout = next_tick_at.saturating_duration_since(Instant::now());
            match control.recv_timeout(timeout) {
                Err(RecvTimeoutError::Timeout) => {
                    next_tick_at += self.tick_interval;
                    self.tick_the_engine();
                    close_all_channels(&mut waiting);
                }
                Ok(LoopControl::Waiter(notify)) => waiting.push(notify),
                Ok(LoopControl::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                    info!("shutting down game loop");
                    break;
                }
            }
        }
        close_all_channels(&mut waiting);
        *lock(&self.tick_done) = None;
        // Dropping `control` closes registration: wait_for_next_tick callers
        // arriving after this point fail to register and return right away.
        info!("successfully shut down game loop");
    }

    /// Runs one tick. Errors here are terminal: the full context is
    /// serialized into the panic message so operators see the causal chain.
    fn tick_the_engine(&self) {
        let current_tick = self.current_tick();
        if let Err(err) = self.do_tick(now_unix_ms()) {
            let detail = json!({
                "tick": current_tick,
                "error": err.to_string(),
            });
            panic!("tick failed: {detail}");
        }
        if let Some(done) = lock(&self.tick_done).as_ref() {
            let _ = done.send(current_tick);
        }
    }

    /// Performs one game tick against a snapshot of the pending
    /// transactions.
    fn do_tick(&self, timestamp: Timestamp) -> Result<(), WorldError> {
        let _span = info_span!("tick", tick = self.current_tick()).entered();
        let started = Instant::now();

        let stage = self.stage.current();
        if stage != Stage::Recovering && stage != Stage::Running && stage != Stage::ShuttingDown {
            return Err(WorldError::InvalidStage {
                stage: stage.to_string(),
            });
        }

        let _panic_guard = TickPanicGuard { world: self };

        let snapshot = self.tx_pool.copy_transactions();
        self.timestamp.store(timestamp, Ordering::SeqCst);

        {
            let mut store = lock(&self.entity_store);
            let mut receipts = lock(&self.receipt_history);
            let mut ctx = WorldContext::new(
                self.current_tick(),
                timestamp,
                &mut store,
                &snapshot,
                &mut receipts,
            );
            self.systems.run_systems(&mut ctx)?;
            store.finalize_tick()?;
            self.stash_evm_results(&snapshot, &receipts);
        }

        // Submission is skipped while recovering so past transactions are
        // not resubmitted.
        if let Some(router) = &self.router {
            if self.stage.current() != Stage::Recovering {
                router
                    .submit_tx_blob(snapshot.to_wire(), self.current_tick(), timestamp)
                    .map_err(|err| WorldError::Router {
                        reason: format!("failed to submit transactions to base shard: {}", err),
                    })?;
            }
        }

        self.tick.fetch_add(1, Ordering::SeqCst);
        lock(&self.receipt_history).next_tick();

        if self.stage.current() != Stage::Recovering {
            self.broadcast_tick_results();
        }

        info!(
            tick = self.current_tick() - 1,
            duration_ms = started.elapsed().as_millis() as u64,
            tx_count = snapshot.count(),
            "tick completed"
        );
        Ok(())
    }

    /// Copies receipts for EVM-linked transactions in the snapshot into the
    /// `evm_tx_hash` keyed stash before the history window advances.
    fn stash_evm_results(&self, snapshot: &TxSnapshot, receipts: &History) {
        let mut stash = lock(&self.evm_tx_receipts);
        for pooled in snapshot.evm_txs() {
            let evm_tx_hash = match &pooled.tx.evm_tx_hash {
                Some(hash) => hash.clone(),
                None => continue,
            };
            let receipt = receipts.pending_receipt(&pooled.tx_hash);
            stash.insert(
                evm_tx_hash,
                EvmTxResult {
                    result: receipt.and_then(|receipt| receipt.result.clone()),
                    errors: receipt.map(|receipt| receipt.errors.clone()).unwrap_or_default(),
                },
            );
        }
    }

    /// Best effort: failures are logged and the tick proceeds.
    fn broadcast_tick_results(&self) {
        let _span = info_span!("broadcast_tick_results").entered();
        let completed = self.current_tick() - 1;
        let receipts = match lock(&self.receipt_history).receipts_for_tick(completed) {
            Ok(receipts) => receipts,
            Err(err) => {
                error!(tick = completed, %err, "failed to get receipts for completed tick");
                Vec::new()
            }
        };

        let mut results = lock(&self.tick_results);
        results.set_tick(completed);
        results.set_receipts(receipts);
        if let Some(emitter) = &self.emitter {
            if let Err(err) = emitter.broadcast_event(&results) {
                error!(%err, "failed to broadcast tick results");
            }
        }
        results.clear();
    }

    /// Blocks until at least one tick completes. Returns `false` when the
    /// world shut down (or was never started) before another tick finished.
    pub fn wait_for_next_tick(&self) -> bool {
        let start_tick = self.current_tick();
        let (notify, notified) = mpsc::channel();
        let registered = match lock(&self.control).as_ref() {
            Some(control) => control.send(LoopControl::Waiter(notify)).is_ok(),
            None => false,
        };
        if !registered {
            return false;
        }
        let _ = notified.recv();
        self.current_tick() > start_tick
    }

    /// Triggers a graceful shutdown and blocks until the world has fully
    /// stopped. Idempotent: repeated calls log a warning and return.
    pub fn shutdown(&self) {
        let stage = self.stage.current();
        if stage == Stage::ShuttingDown || stage == Stage::ShutDown {
            warn!(stage = %stage, "world is already stopping, ignoring shutdown request");
            return;
        }
        info!("shutting down world");
        self.stage.store(Stage::ShuttingDown);

        let signalled = match lock(&self.control).as_ref() {
            Some(control) => control.send(LoopControl::Shutdown).is_ok(),
            None => false,
        };
        if !signalled {
            // The loop never started or has already exited; finish the stage
            // walk here.
            self.stage.store(Stage::ShutDown);
            return;
        }

        let stopped = self.stage.notify_on_stage(Stage::ShutDown);
        let _ = stopped.recv();
        info!("successfully shut down world");
    }

    /// Housekeeping after the game loop exits. Storing `ShutDown` is the
    /// very last stage mutation.
    fn cleanup(&self) {
        *lock(&self.control) = None;
        *lock(&self.tick_done) = None;
        self.stage.store(Stage::ShutDown);
    }
}

/// Logs the tick and the running system if a tick unwinds, then lets the
/// panic continue up through the loop thread.
struct TickPanicGuard<'a> {
    world: &'a World,
}

impl Drop for TickPanicGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            let system = self
                .world
                .current_system()
                .unwrap_or_else(|| "<none>".to_string());
            error!(
                tick = self.world.current_tick(),
                system = %system,
                "panic during tick"
            );
        }
    }
}

fn close_all_channels(channels: &mut Vec<Sender<()>>) {
    for channel in channels.drain(..) {
        let _ = channel.send(());
    }
}
