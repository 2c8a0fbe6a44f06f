use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures::stream::{BoxStream, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::block::TransferableBlock;
use crate::error::MailboxError;

const DEFAULT_MAILBOX_CAPACITY: usize = 64;

/// Address of one mailbox: a (request, stage, sender, receiver) tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MailboxId {
    pub request_id: i64,
    pub stage_id: i32,
    pub sender_host: String,
    pub sender_port: u16,
    pub receiver_host: String,
    pub receiver_port: u16,
}

impl MailboxId {
    pub fn new(
        request_id: i64,
        stage_id: i32,
        sender: (&str, u16),
        receiver: (&str, u16),
    ) -> Self {
        Self {
            request_id,
            stage_id,
            sender_host: sender.0.to_string(),
            sender_port: sender.1,
            receiver_host: receiver.0.to_string(),
            receiver_port: receiver.1,
        }
    }
}

impl fmt::Display for MailboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}:{}:{}:{}:{}",
            self.request_id,
            self.stage_id,
            self.sender_host,
            self.sender_port,
            self.receiver_host,
            self.receiver_port
        )
    }
}

/// Receiving end of one mailbox, as a stream of blocks in sender order.
pub struct ReceivingMailbox {
    id: MailboxId,
    stream: BoxStream<'static, TransferableBlock>,
}

impl ReceivingMailbox {
    pub fn new<S>(id: MailboxId, stream: S) -> Self
    where
        S: Stream<Item = TransferableBlock> + Send + 'static,
    {
        Self {
            id,
            stream: stream.boxed(),
        }
    }

    pub fn id(&self) -> &MailboxId {
        &self.id
    }

    pub fn into_stream(self) -> BoxStream<'static, TransferableBlock> {
        self.stream
    }
}

impl fmt::Debug for ReceivingMailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceivingMailbox")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Local endpoint of the mailbox transport.
///
/// Cross-node implementations own the wire framing; callers only see the
/// address of the local node and per-mailbox block streams.
pub trait MailboxService: Send + Sync {
    fn hostname(&self) -> &str;

    fn mailbox_port(&self) -> u16;

    /// Subscribes to `id`. Each mailbox can be received from once.
    fn receiving_mailbox(&self, id: &MailboxId) -> Result<ReceivingMailbox, MailboxError>;
}

type Channels = DashMap<MailboxId, MailboxChannel>;

/// Sending end of an in-process mailbox.
///
/// The receiver observes the end of the stream once every sending handle
/// for the mailbox has been dropped.
#[derive(Debug, Clone)]
pub struct SendingMailbox {
    id: MailboxId,
    sender: Option<mpsc::Sender<TransferableBlock>>,
    channels: Weak<Channels>,
}

impl SendingMailbox {
    pub fn id(&self) -> &MailboxId {
        &self.id
    }

    /// Waits for capacity, then enqueues `block`. Fails once the receiving
    /// side has been dropped.
    pub async fn send(&self, block: TransferableBlock) -> Result<(), MailboxError> {
        let closed = || MailboxError::Closed(self.id.to_string());
        let sender = self.sender.as_ref().ok_or_else(closed)?;
        sender.send(block).await.map_err(|_| closed())
    }
}

impl Drop for SendingMailbox {
    fn drop(&mut self) {
        drop(self.sender.take());
        if let Some(channels) = self.channels.upgrade() {
            remove_if_finished(&channels, &self.id);
        }
    }
}

/// Block stream handed out by [`InMemoryMailboxService::receiving_mailbox`].
struct MailboxStream {
    id: MailboxId,
    inner: ReceiverStream<TransferableBlock>,
    channels: Weak<Channels>,
}

impl Stream for MailboxStream {
    type Item = TransferableBlock;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for MailboxStream {
    fn drop(&mut self) {
        let Some(channels) = self.channels.upgrade() else {
            return;
        };
        if let Some(mut channel) = channels.get_mut(&self.id) {
            channel.receiver_dropped = true;
        }
        remove_if_finished(&channels, &self.id);
    }
}

struct MailboxChannel {
    /// Strong handle kept by the service until both ends have attached, so
    /// the channel cannot close before its sender shows up.
    sender: Option<mpsc::Sender<TransferableBlock>>,
    weak_sender: mpsc::WeakSender<TransferableBlock>,
    receiver: Option<mpsc::Receiver<TransferableBlock>>,
    sender_attached: bool,
    receiver_dropped: bool,
}

impl MailboxChannel {
    fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            weak_sender: sender.downgrade(),
            sender: Some(sender),
            receiver: Some(receiver),
            sender_attached: false,
            receiver_dropped: false,
        }
    }

    fn attach_sender(&mut self) -> Option<mpsc::Sender<TransferableBlock>> {
        let sender = self
            .sender
            .clone()
            .or_else(|| self.weak_sender.upgrade());
        self.sender_attached = true;
        self.release_service_handle();
        sender
    }

    fn attach_receiver(&mut self) -> Option<mpsc::Receiver<TransferableBlock>> {
        let receiver = self.receiver.take();
        self.release_service_handle();
        receiver
    }

    fn release_service_handle(&mut self) {
        if self.sender_attached && self.receiver.is_none() {
            self.sender = None;
        }
    }

    fn is_finished(&self) -> bool {
        self.receiver_dropped && self.sender.is_none() && self.weak_sender.upgrade().is_none()
    }
}

fn remove_if_finished(channels: &Channels, id: &MailboxId) {
    if channels
        .remove_if(id, |_, channel| channel.is_finished())
        .is_some()
    {
        debug!(mailbox = %id, "released mailbox channel");
    }
}

/// Mailbox service exchanging blocks between stages of the same process.
///
/// Channels are bounded and created on first use by either side. A channel
/// is forgotten once its receiver and every sender have been dropped.
pub struct InMemoryMailboxService {
    hostname: String,
    mailbox_port: u16,
    capacity: usize,
    channels: Arc<Channels>,
}

impl InMemoryMailboxService {
    pub fn new(hostname: impl Into<String>, mailbox_port: u16) -> Self {
        Self::with_capacity(hostname, mailbox_port, DEFAULT_MAILBOX_CAPACITY)
    }

    pub fn with_capacity(hostname: impl Into<String>, mailbox_port: u16, capacity: usize) -> Self {
        Self {
            hostname: hostname.into(),
            mailbox_port,
            capacity: capacity.max(1),
            channels: Arc::new(DashMap::new()),
        }
    }

    pub fn sending_mailbox(&self, id: &MailboxId) -> SendingMailbox {
        let sender = {
            let mut channel = self.channels.entry(id.clone()).or_insert_with(|| {
                debug!(mailbox = %id, "creating mailbox channel");
                MailboxChannel::new(self.capacity)
            });
            channel.attach_sender()
        };
        if sender.is_none() {
            debug!(mailbox = %id, "mailbox already closed by its earlier senders");
        }
        SendingMailbox {
            id: id.clone(),
            sender,
            channels: Arc::downgrade(&self.channels),
        }
    }

    /// Drops the channel for `id` regardless of its state. Outstanding
    /// senders keep their handle; the receiver observes the stream closing
    /// once they are all dropped.
    pub fn release(&self, id: &MailboxId) {
        self.channels.remove(id);
    }

    /// Channels currently tracked, finished or not.
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }
}

impl MailboxService for InMemoryMailboxService {
    fn hostname(&self) -> &str {
        &self.hostname
    }

    fn mailbox_port(&self) -> u16 {
        self.mailbox_port
    }

    fn receiving_mailbox(&self, id: &MailboxId) -> Result<ReceivingMailbox, MailboxError> {
        let receiver = self
            .channels
            .entry(id.clone())
            .or_insert_with(|| MailboxChannel::new(self.capacity))
            .attach_receiver()
            .ok_or_else(|| MailboxError::AlreadyReceived(id.to_string()))?;
        let stream = MailboxStream {
            id: id.clone(),
            inner: ReceiverStream::new(receiver),
            channels: Arc::downgrade(&self.channels),
        };
        Ok(ReceivingMailbox::new(id.clone(), stream))
    }
}
