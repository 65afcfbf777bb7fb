use std::any::Any;
use std::panic::AssertUnwindSafe;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::FutureExt;
use tracing::info;

use crate::kafka::record::Record;

/// What a single callback invocation receives
#[derive(Debug, Clone)]
pub enum TriggerInput {
    Single(Record),
    Batch(Vec<Record>),
}

impl TriggerInput {
    pub fn records(&self) -> &[Record] {
        match self {
            TriggerInput::Single(record) => std::slice::from_ref(record),
            TriggerInput::Batch(records) => records,
        }
    }
}

/// The user-supplied processing callback.
///
/// An `Err` is logged by the dispatcher and does not stop the offset from
/// advancing past the records it was given.
#[async_trait]
pub trait FunctionExecutor: Send + Sync {
    async fn execute(&self, input: TriggerInput) -> Result<()>;
}

/// Run one callback invocation, reporting a panic as a failed invocation so
/// the dispatcher carries on with the next record.
pub async fn invoke(executor: &dyn FunctionExecutor, input: TriggerInput) -> Result<()> {
    match AssertUnwindSafe(executor.execute(input)).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(anyhow!("callback panicked: {}", panic_message(&*payload))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}

/// Executor that logs what it receives. Used by the standalone binary, where no
/// function host supplies a callback.
#[derive(Debug, Default)]
pub struct LoggingExecutor;

#[async_trait]
impl FunctionExecutor for LoggingExecutor {
    async fn execute(&self, input: TriggerInput) -> Result<()> {
        for record in input.records() {
            info!(
                topic = record.topic(),
                partition = record.partition(),
                offset = record.offset(),
                bytes = record.value.as_ref().map_or(0, Vec::len),
                "Received record"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_of_input() {
        let single = TriggerInput::Single(Record::new_for_test("events", 0, 1));
        assert_eq!(single.records().len(), 1);

        let batch = TriggerInput::Batch(vec![
            Record::new_for_test("events", 0, 1),
            Record::new_for_test("events", 1, 1),
        ]);
        assert_eq!(batch.records()[1].partition(), 1);
    }

    #[tokio::test]
    async fn test_logging_executor_accepts_everything() {
        let executor = LoggingExecutor;
        assert!(executor
            .execute(TriggerInput::Batch(vec![Record::new_for_test("events", 0, 0)]))
            .await
            .is_ok());
    }

    struct PanickingExecutor;

    #[async_trait]
    impl FunctionExecutor for PanickingExecutor {
        async fn execute(&self, _input: TriggerInput) -> Result<()> {
            panic!("boom at {}", 7);
        }
    }

    #[tokio::test]
    async fn test_invoke_turns_panic_into_error() {
        let err = invoke(
            &PanickingExecutor,
            TriggerInput::Single(Record::new_for_test("events", 0, 7)),
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "callback panicked: boom at 7");

        assert!(invoke(
            &LoggingExecutor,
            TriggerInput::Single(Record::new_for_test("events", 0, 7))
        )
        .await
        .is_ok());
    }
}
