//! Registered systems and their per-tick execution order.

use std::fmt;
use std::sync::Mutex;

use super::context::WorldContext;
use super::error::WorldError;
use super::util::lock;

type SystemFn = Box<dyn Fn(&mut WorldContext<'_>) -> Result<(), WorldError> + Send + Sync>;

struct RegisteredSystem {
    name: String,
    run: SystemFn,
}

/// Ordered registry of named systems. Init systems run once, ahead of user
/// systems, when tick 0 executes.
#[derive(Default)]
pub struct SystemManager {
    systems: Mutex<Vec<RegisteredSystem>>,
    init_systems: Mutex<Vec<RegisteredSystem>>,
    current: Mutex<Option<String>>,
}

impl SystemManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_system<F>(&self, name: impl Into<String>, run: F) -> Result<(), WorldError>
    where
        F: Fn(&mut WorldContext<'_>) -> Result<(), WorldError> + Send + Sync + 'static,
    {
        Self::register(&self.systems, name.into(), Box::new(run))
    }

    pub fn register_init_system<F>(&self, name: impl Into<String>, run: F) -> Result<(), WorldError>
    where
        F: Fn(&mut WorldContext<'_>) -> Result<(), WorldError> + Send + Sync + 'static,
    {
        Self::register(&self.init_systems, name.into(), Box::new(run))
    }

    pub fn system_names(&self) -> Vec<String> {
        lock(&self.systems)
            .iter()
            .map(|system| system.name.clone())
            .collect()
    }

    /// Name of the system currently executing. Kept set when a system fails
    /// or panics, for diagnostics.
    pub fn current_system(&self) -> Option<String> {
        lock(&self.current).clone()
    }

    /// Runs every registered system in registration order. A system error
    /// aborts the tick, annotated with the failing system's name.
    pub fn run_systems(&self, ctx: &mut WorldContext<'_>) -> Result<(), WorldError> {
        if ctx.current_tick() == 0 {
            self.run_list(&self.init_systems, ctx)?;
        }
        self.run_list(&self.systems, ctx)?;
        *lock(&self.current) = None;
        Ok(())
    }

    fn register(
        registry: &Mutex<Vec<RegisteredSystem>>,
        name: String,
        run: SystemFn,
    ) -> Result<(), WorldError> {
        let mut systems = lock(registry);
        if systems.iter().any(|system| system.name == name) {
            return Err(WorldError::SystemAlreadyRegistered { system: name });
        }
        systems.push(RegisteredSystem { name, run });
        Ok(())
    }

    fn run_list(
        &self,
        registry: &Mutex<Vec<RegisteredSystem>>,
        ctx: &mut WorldContext<'_>,
    ) -> Result<(), WorldError> {
        let systems = lock(registry);
        for system in systems.iter() {
            *lock(&self.current) = Some(system.name.clone());
            (system.run)(ctx).map_err(|err| WorldError::System {
                system: system.name.clone(),
                reason: err.to_string(),
            })?;
        }
        Ok(())
    }
}

impl fmt::Debug for SystemManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemManager")
            .field("systems", &self.system_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::entity_store::EntityCommandBuffer;
    use crate::runtime::receipt::History;
    use crate::runtime::storage::MemoryKvStore;
    use crate::runtime::tx_pool::TxSnapshot;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn run_at_tick(manager: &SystemManager, tick: u64) -> Result<(), WorldError> {
        let mut store =
            EntityCommandBuffer::new(Arc::new(MemoryKvStore::new()), "w1").expect("open buffer");
        let snapshot = TxSnapshot::default();
        let mut receipts = History::new(tick, 10);
        let mut ctx = WorldContext::new(tick, 1_000, &mut store, &snapshot, &mut receipts);
        manager.run_systems(&mut ctx)
    }

    #[test]
    fn systems_run_in_registration_order() {
        let manager = SystemManager::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            manager
                .register_system(name, move |_ctx| {
                    order.lock().expect("lock order").push(name);
                    Ok(())
                })
                .expect("register");
        }

        run_at_tick(&manager, 5).expect("run");
        assert_eq!(
            *order.lock().expect("lock order"),
            vec!["first", "second", "third"]
        );
    }

    #[test]
    fn init_systems_only_run_on_tick_zero() {
        let manager = SystemManager::new();
        let init_runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&init_runs);
        manager
            .register_init_system("seed_world", move |_ctx| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .expect("register");

        run_at_tick(&manager, 0).expect("tick 0");
        run_at_tick(&manager, 1).expect("tick 1");
        assert_eq!(init_runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_system_aborts_with_its_name() {
        let manager = SystemManager::new();
        let ran_after = Arc::new(AtomicUsize::new(0));
        manager
            .register_system("exploder", |_ctx| {
                Err(WorldError::Storage {
                    reason: "boom".to_string(),
                })
            })
            .expect("register");
        let counter = Arc::clone(&ran_after);
        manager
            .register_system("never_runs", move |_ctx| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .expect("register");

        let err = run_at_tick(&manager, 1).expect_err("must fail");
        assert!(matches!(err, WorldError::System { ref system, .. } if system == "exploder"));
        assert_eq!(ran_after.load(Ordering::SeqCst), 0);
        assert_eq!(manager.current_system().as_deref(), Some("exploder"));
    }

    #[test]
    fn duplicate_system_names_are_rejected() {
        let manager = SystemManager::new();
        manager.register_system("mover", |_ctx| Ok(())).expect("register");
        assert!(matches!(
            manager.register_system("mover", |_ctx| Ok(())),
            Err(WorldError::SystemAlreadyRegistered { .. })
        ));
    }
}
