//! Local execution of the reduce stage.

use std::time::Duration;

use floe_common::{DataBlock, DataSchema, ServerInstance};
use floe_mailbox::{
    BlockReceiver, ExchangeType, MailboxReceiveOperator, MailboxService, TransferableBlock,
};
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::error::{DispatchError, Result};

/// Drain budget used when the caller does not supply one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

// Fallback when `now + timeout` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Builds the receive operator of the reduce stage: one mailbox per sending
/// instance of `stage_id`, merged without any ordering across senders.
pub fn create_reduce_stage_operator(
    mailbox_service: &dyn MailboxService,
    sending_instances: &[ServerInstance],
    request_id: i64,
    stage_id: i32,
    data_schema: DataSchema,
    hostname: &str,
    port: u16,
) -> Result<MailboxReceiveOperator> {
    let operator = MailboxReceiveOperator::new(
        mailbox_service,
        data_schema,
        sending_instances,
        ExchangeType::RandomDistributed,
        hostname,
        port,
        request_id,
        stage_id,
    )?;
    Ok(operator)
}

/// Pulls blocks from `receiver` until a clean end-of-stream and returns the
/// data blocks in arrival order.
///
/// The deadline is fixed on entry. No-op blocks are skipped, an error block
/// fails the call without returning partial results, and reaching the
/// deadline first yields [`DispatchError::Timeout`].
pub async fn reduce_mailbox_receive<R>(receiver: &mut R, timeout: Duration) -> Result<Vec<DataBlock>>
where
    R: BlockReceiver + ?Sized,
{
    let start = Instant::now();
    let deadline = start
        .checked_add(timeout)
        .unwrap_or_else(|| start + FAR_FUTURE);
    let mut result_blocks = Vec::new();

    while Instant::now() < deadline {
        let Ok(block) = time::timeout_at(deadline, receiver.next_block()).await else {
            break;
        };
        match block {
            TransferableBlock::EndOfStream { error: Some(payload) } => {
                warn!(error = %payload, "received error block from reduce stage");
                return Err(DispatchError::RemoteExecution(payload));
            }
            TransferableBlock::NoOp => continue,
            TransferableBlock::EndOfStream { error: None } => {
                debug!(
                    blocks = result_blocks.len(),
                    elapsed = ?start.elapsed(),
                    "reduce stage finished"
                );
                return Ok(result_blocks);
            }
            TransferableBlock::Data(data_block) => result_blocks.push(data_block),
        }
    }

    warn!(?timeout, blocks = result_blocks.len(), "timed out while receiving from mailbox");
    Err(DispatchError::Timeout(timeout))
}

pub async fn reduce_mailbox_receive_default<R>(receiver: &mut R) -> Result<Vec<DataBlock>>
where
    R: BlockReceiver + ?Sized,
{
    reduce_mailbox_receive(receiver, DEFAULT_TIMEOUT).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use floe_common::{ColumnDataType, Value};
    use floe_mailbox::{ErrorPayload, InMemoryMailboxService, MailboxId};
    use std::collections::VecDeque;

    struct ScriptedReceiver {
        blocks: VecDeque<TransferableBlock>,
    }

    impl ScriptedReceiver {
        fn new(blocks: Vec<TransferableBlock>) -> Self {
            Self {
                blocks: blocks.into(),
            }
        }
    }

    #[async_trait]
    impl BlockReceiver for ScriptedReceiver {
        async fn next_block(&mut self) -> TransferableBlock {
            self.blocks.pop_front().unwrap_or(TransferableBlock::NoOp)
        }
    }

    struct StalledReceiver;

    #[async_trait]
    impl BlockReceiver for StalledReceiver {
        async fn next_block(&mut self) -> TransferableBlock {
            std::future::pending().await
        }
    }

    fn block(v: i32) -> DataBlock {
        let schema = DataSchema::new([("v", ColumnDataType::Int)]);
        DataBlock::from_rows(schema, vec![vec![Value::Int(v)]]).unwrap()
    }

    #[tokio::test]
    async fn test_returns_data_blocks_in_order_without_no_ops() {
        let mut receiver = ScriptedReceiver::new(vec![
            block(1).into(),
            TransferableBlock::NoOp,
            block(2).into(),
            TransferableBlock::NoOp,
            block(3).into(),
            TransferableBlock::end_of_stream(),
        ]);
        let blocks = reduce_mailbox_receive(&mut receiver, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(blocks, vec![block(1), block(2), block(3)]);
    }

    #[tokio::test]
    async fn test_error_block_discards_partial_results() {
        let mut receiver = ScriptedReceiver::new(vec![
            block(1).into(),
            block(2).into(),
            TransferableBlock::error(ErrorPayload::execution("division by zero")),
        ]);
        let err = reduce_mailbox_receive(&mut receiver, Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            DispatchError::RemoteExecution(payload) => {
                assert!(payload.to_string().contains("division by zero"))
            }
            other => panic!("expected remote execution error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_only_no_ops_times_out() {
        let mut receiver = ScriptedReceiver::new(vec![]);
        let started = std::time::Instant::now();
        let err = reduce_mailbox_receive(&mut receiver, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Timeout(t) if t == Duration::from_millis(1)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_stalled_receiver_times_out() {
        let err = reduce_mailbox_receive(&mut StalledReceiver, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_zero_timeout_fails_before_pulling() {
        let mut receiver = ScriptedReceiver::new(vec![TransferableBlock::end_of_stream()]);
        let err = reduce_mailbox_receive(&mut receiver, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Timeout(_)));
        assert_eq!(receiver.blocks.len(), 1);
    }

    #[tokio::test]
    async fn test_default_timeout_drains_operator() {
        let service = InMemoryMailboxService::new("broker", 9000);
        let senders = vec![
            ServerInstance::new("worker-a", 8421, 8442),
            ServerInstance::new("worker-b", 8421, 8442),
        ];
        let mut operator = create_reduce_stage_operator(
            &service,
            &senders,
            3,
            1,
            DataSchema::new([("v", ColumnDataType::Int)]),
            "broker",
            9000,
        )
        .unwrap();
        assert_eq!(operator.exchange_type(), ExchangeType::RandomDistributed);

        for (i, sender) in senders.iter().enumerate() {
            let id = MailboxId::new(3, 1, (sender.hostname(), 8442), ("broker", 9000));
            let mailbox = service.sending_mailbox(&id);
            mailbox.send(block(i as i32).into()).await.unwrap();
            mailbox.send(TransferableBlock::end_of_stream()).await.unwrap();
        }

        let mut blocks = reduce_mailbox_receive_default(&mut operator).await.unwrap();
        blocks.sort_by_key(|b| match b.value(0, 0).unwrap() {
            Value::Int(v) => v,
            _ => unreachable!(),
        });
        assert_eq!(blocks, vec![block(0), block(1)]);
    }
}
