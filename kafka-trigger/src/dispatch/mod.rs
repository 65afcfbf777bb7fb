pub mod accumulator;
pub mod executor;
pub mod multi;
pub mod queue;
pub mod single;
pub mod worker;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::commit::CommitStrategy;

pub use accumulator::{BatchAccumulator, FlushOutcome};
pub use executor::{FunctionExecutor, LoggingExecutor, TriggerInput};
pub use multi::MultiRecordDispatcher;
pub use queue::{dispatch_queue, Batch, DispatchReceiver, DispatchSender, EnqueueError};
pub use single::SingleRecordDispatcher;
pub use worker::DispatchWorker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// One callback invocation per record
    #[default]
    Single,
    /// One callback invocation per batch
    Multi,
}

impl FromStr for DispatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "single" => Ok(DispatchMode::Single),
            "multi" => Ok(DispatchMode::Multi),
            other => Err(format!("unknown dispatch mode: {other}")),
        }
    }
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchMode::Single => write!(f, "single"),
            DispatchMode::Multi => write!(f, "multi"),
        }
    }
}

/// The dispatch strategy, chosen once when the listener starts
pub enum Dispatcher {
    Single(SingleRecordDispatcher),
    Multi(MultiRecordDispatcher),
}

impl Dispatcher {
    pub fn new(
        mode: DispatchMode,
        executor: Arc<dyn FunctionExecutor>,
        commit: Arc<dyn CommitStrategy>,
    ) -> Self {
        match mode {
            DispatchMode::Single => {
                Dispatcher::Single(SingleRecordDispatcher::new(executor, commit))
            }
            DispatchMode::Multi => Dispatcher::Multi(MultiRecordDispatcher::new(executor, commit)),
        }
    }

    pub fn mode(&self) -> DispatchMode {
        match self {
            Dispatcher::Single(_) => DispatchMode::Single,
            Dispatcher::Multi(_) => DispatchMode::Multi,
        }
    }

    pub async fn dispatch(&self, batch: Batch) {
        match self {
            Dispatcher::Single(dispatcher) => dispatcher.dispatch(batch).await,
            Dispatcher::Multi(dispatcher) => dispatcher.dispatch(batch).await,
        }
    }
}
