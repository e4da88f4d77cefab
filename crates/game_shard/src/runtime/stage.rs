//! World lifecycle stage state machine.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use super::util::lock;

/// Lifecycle stages, in the order the world moves through them. Transitions
/// only move forward; `Recovering -> Running` is the normal startup path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Init,
    Starting,
    Recovering,
    Running,
    ShuttingDown,
    ShutDown,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::Starting => "starting",
            Stage::Recovering => "recovering",
            Stage::Running => "running",
            Stage::ShuttingDown => "shutting_down",
            Stage::ShutDown => "shut_down",
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Stage::Init => 0,
            Stage::Starting => 1,
            Stage::Recovering => 2,
            Stage::Running => 3,
            Stage::ShuttingDown => 4,
            Stage::ShutDown => 5,
        }
    }

    fn from_u8(raw: u8) -> Stage {
        match raw {
            0 => Stage::Init,
            1 => Stage::Starting,
            2 => Stage::Recovering,
            3 => Stage::Running,
            4 => Stage::ShuttingDown,
            _ => Stage::ShutDown,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct StageWaiter {
    stage: Stage,
    notify: Sender<()>,
}

/// Tracks the current stage and wakes subscribers once a target stage is
/// current or has been passed.
#[derive(Default)]
pub struct StageManager {
    current: AtomicU8,
    waiters: Mutex<Vec<StageWaiter>>,
}

impl StageManager {
    pub fn new() -> Self {
        Self {
            current: AtomicU8::new(Stage::Init.as_u8()),
            waiters: Mutex::new(Vec::new()),
        }
    }

    pub fn current(&self) -> Stage {
        Stage::from_u8(self.current.load(Ordering::SeqCst))
    }

    /// Unconditionally sets the stage.
    pub fn store(&self, stage: Stage) {
        self.current.store(stage.as_u8(), Ordering::SeqCst);
        self.wake(stage);
    }

    /// Atomically moves `old -> new`; returns whether the swap happened.
    pub fn compare_and_swap(&self, old: Stage, new: Stage) -> bool {
        let swapped = self
            .current
            .compare_exchange(old.as_u8(), new.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if swapped {
            self.wake(new);
        }
        swapped
    }

    /// One-shot notification that fires once `stage` is current or already
    /// behind the world.
    pub fn notify_on_stage(&self, stage: Stage) -> Receiver<()> {
        let (notify, receiver) = mpsc::channel();
        let mut waiters = lock(&self.waiters);
        if self.current() >= stage {
            let _ = notify.send(());
        } else {
            waiters.push(StageWaiter { stage, notify });
        }
        receiver
    }

    fn wake(&self, reached: Stage) {
        let mut waiters = lock(&self.waiters);
        waiters.retain(|waiter| {
            if reached >= waiter.stage {
                let _ = waiter.notify.send(());
                false
            } else {
                true
            }
        });
    }
}

impl fmt::Debug for StageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageManager")
            .field("current", &self.current())
            .finish()
    }
}
