use async_trait::async_trait;
use floe_common::{DataSchema, ServerInstance};
use futures::stream::{self, BoxStream, SelectAll, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::block::{ErrorPayload, TransferableBlock};
use crate::error::MailboxError;
use crate::service::{MailboxId, MailboxService};

/// How rows are routed from a sending stage into a receiving stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangeType {
    /// Exactly one sender, co-located with the receiver.
    Singleton,
    /// Any sender may deliver any row; streams are merged in arrival order.
    RandomDistributed,
    HashDistributed,
    Broadcast,
}

/// Pull interface over a stream of exchange blocks.
///
/// `next_block` suspends the calling task until a block, an error or the
/// end of the stream is available.
#[async_trait]
pub trait BlockReceiver: Send {
    async fn next_block(&mut self) -> TransferableBlock;
}

enum SenderEvent {
    Block(usize, TransferableBlock),
    Closed(usize),
}

/// Merges the mailboxes of every sender instance of one stage.
///
/// No ordering is imposed across senders; blocks of a single sender arrive
/// in the order it sent them. The merged stream ends once every sender has
/// sent its end-of-stream block, and fails as soon as any sender reports an
/// error.
pub struct MailboxReceiveOperator {
    data_schema: DataSchema,
    exchange_type: ExchangeType,
    mailbox_ids: Vec<MailboxId>,
    finished: Vec<bool>,
    remaining: usize,
    streams: SelectAll<BoxStream<'static, SenderEvent>>,
}

impl MailboxReceiveOperator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mailbox_service: &dyn MailboxService,
        data_schema: DataSchema,
        sending_instances: &[ServerInstance],
        exchange_type: ExchangeType,
        hostname: &str,
        port: u16,
        request_id: i64,
        sender_stage_id: i32,
    ) -> Result<Self, MailboxError> {
        let senders: Vec<&ServerInstance> = match exchange_type {
            ExchangeType::Singleton => {
                let local: Vec<_> = sending_instances
                    .iter()
                    .filter(|s| s.hostname() == hostname && s.query_mailbox_port() == port)
                    .collect();
                if local.len() != 1 {
                    return Err(MailboxError::InvalidSingleton {
                        host: hostname.to_string(),
                        port,
                        found: local.len(),
                    });
                }
                local
            }
            _ => sending_instances.iter().collect(),
        };

        let mut mailbox_ids = Vec::with_capacity(senders.len());
        let mut streams = SelectAll::new();
        for (index, sender) in senders.into_iter().enumerate() {
            let id = MailboxId::new(
                request_id,
                sender_stage_id,
                (sender.hostname(), sender.query_mailbox_port()),
                (hostname, port),
            );
            let mailbox = mailbox_service.receiving_mailbox(&id)?;
            let events = mailbox
                .into_stream()
                .map(move |block| SenderEvent::Block(index, block))
                .chain(stream::once(async move { SenderEvent::Closed(index) }));
            streams.push(events.boxed());
            mailbox_ids.push(id);
        }
        debug!(
            request_id,
            sender_stage_id,
            senders = mailbox_ids.len(),
            "subscribed to sender mailboxes"
        );

        let remaining = mailbox_ids.len();
        Ok(Self {
            data_schema,
            exchange_type,
            finished: vec![false; remaining],
            mailbox_ids,
            remaining,
            streams,
        })
    }

    pub fn data_schema(&self) -> &DataSchema {
        &self.data_schema
    }

    pub fn exchange_type(&self) -> ExchangeType {
        self.exchange_type
    }

    pub fn mailbox_ids(&self) -> &[MailboxId] {
        &self.mailbox_ids
    }

    fn mark_finished(&mut self, index: usize) -> bool {
        if self.finished[index] {
            return false;
        }
        self.finished[index] = true;
        self.remaining -= 1;
        true
    }
}

#[async_trait]
impl BlockReceiver for MailboxReceiveOperator {
    async fn next_block(&mut self) -> TransferableBlock {
        loop {
            if self.remaining == 0 {
                return TransferableBlock::end_of_stream();
            }
            match self.streams.next().await {
                None => return TransferableBlock::end_of_stream(),
                Some(SenderEvent::Block(index, block)) => match block {
                    TransferableBlock::EndOfStream { error: None } => {
                        self.mark_finished(index);
                    }
                    TransferableBlock::EndOfStream { error: Some(_) } => {
                        self.mark_finished(index);
                        return block;
                    }
                    block => return block,
                },
                Some(SenderEvent::Closed(index)) => {
                    if self.mark_finished(index) {
                        let id = &self.mailbox_ids[index];
                        warn!(mailbox = %id, "mailbox closed before end-of-stream");
                        return TransferableBlock::error(ErrorPayload::execution(format!(
                            "mailbox {id} closed before end-of-stream"
                        )));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::InMemoryMailboxService;
    use floe_common::{ColumnDataType, DataBlock, Value};

    fn schema() -> DataSchema {
        DataSchema::new([("v", ColumnDataType::Int)])
    }

    fn data(v: i32) -> TransferableBlock {
        DataBlock::from_rows(schema(), vec![vec![Value::Int(v)]])
            .unwrap()
            .into()
    }

    fn senders() -> Vec<ServerInstance> {
        vec![
            ServerInstance::new("worker-a", 8421, 8442),
            ServerInstance::new("worker-b", 8421, 8442),
        ]
    }

    fn mailbox(sender: &ServerInstance) -> MailboxId {
        MailboxId::new(1, 1, (sender.hostname(), sender.query_mailbox_port()), ("broker", 9000))
    }

    #[tokio::test]
    async fn test_merges_all_senders_until_every_stream_ends() {
        let service = InMemoryMailboxService::new("broker", 9000);
        let instances = senders();
        let mut operator = MailboxReceiveOperator::new(
            &service,
            schema(),
            &instances,
            ExchangeType::RandomDistributed,
            "broker",
            9000,
            1,
            1,
        )
        .unwrap();

        let a = service.sending_mailbox(&mailbox(&instances[0]));
        let b = service.sending_mailbox(&mailbox(&instances[1]));
        a.send(data(1)).await.unwrap();
        a.send(TransferableBlock::end_of_stream()).await.unwrap();
        b.send(data(2)).await.unwrap();
        b.send(TransferableBlock::NoOp).await.unwrap();
        b.send(TransferableBlock::end_of_stream()).await.unwrap();

        let mut received = Vec::new();
        loop {
            let block = operator.next_block().await;
            if block.is_end_of_stream() {
                assert!(!block.is_error());
                break;
            }
            received.push(block);
        }
        assert_eq!(received.len(), 3);
        assert!(received.contains(&data(1)));
        assert!(received.contains(&data(2)));
        assert!(received.contains(&TransferableBlock::NoOp));
    }

    #[tokio::test]
    async fn test_error_from_one_sender_surfaces_immediately() {
        let service = InMemoryMailboxService::new("broker", 9000);
        let instances = senders();
        let mut operator = MailboxReceiveOperator::new(
            &service,
            schema(),
            &instances,
            ExchangeType::RandomDistributed,
            "broker",
            9000,
            1,
            1,
        )
        .unwrap();

        let b = service.sending_mailbox(&mailbox(&instances[1]));
        b.send(TransferableBlock::error(ErrorPayload::execution("boom")))
            .await
            .unwrap();

        let block = operator.next_block().await;
        assert!(block.is_error());
    }

    #[tokio::test]
    async fn test_closed_mailbox_without_end_of_stream_is_an_error() {
        let service = InMemoryMailboxService::new("broker", 9000);
        let instances = vec![ServerInstance::new("worker-a", 8421, 8442)];
        let id = mailbox(&instances[0]);
        let sender = service.sending_mailbox(&id);
        let mut operator = MailboxReceiveOperator::new(
            &service,
            schema(),
            &instances,
            ExchangeType::RandomDistributed,
            "broker",
            9000,
            1,
            1,
        )
        .unwrap();

        sender.send(data(1)).await.unwrap();
        drop(sender);

        assert_eq!(operator.next_block().await, data(1));
        assert!(operator.next_block().await.is_error());
        assert_eq!(operator.next_block().await, TransferableBlock::end_of_stream());
    }

    #[tokio::test]
    async fn test_singleton_requires_local_sender() {
        let service = InMemoryMailboxService::new("broker", 9000);
        let result = MailboxReceiveOperator::new(
            &service,
            schema(),
            &senders(),
            ExchangeType::Singleton,
            "broker",
            9000,
            1,
            1,
        );
        assert!(matches!(
            result,
            Err(MailboxError::InvalidSingleton { found: 0, .. })
        ));

        let local = vec![
            ServerInstance::new("broker", 8421, 9000),
            ServerInstance::new("worker-a", 8421, 8442),
        ];
        let operator = MailboxReceiveOperator::new(
            &service,
            schema(),
            &local,
            ExchangeType::Singleton,
            "broker",
            9000,
            1,
            1,
        )
        .unwrap();
        assert_eq!(operator.mailbox_ids().len(), 1);
    }

    #[tokio::test]
    async fn test_no_senders_is_immediately_finished() {
        let service = InMemoryMailboxService::new("broker", 9000);
        let mut operator = MailboxReceiveOperator::new(
            &service,
            schema(),
            &[],
            ExchangeType::RandomDistributed,
            "broker",
            9000,
            1,
            1,
        )
        .unwrap();
        assert_eq!(operator.next_block().await, TransferableBlock::end_of_stream());
    }
}
