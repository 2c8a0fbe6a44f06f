//! Mailbox crate
//!
//! A mailbox is the addressed channel one sender instance of a stage uses to
//! stream [`TransferableBlock`]s to one receiver instance of a downstream
//! stage. This crate defines the block type, mailbox addressing, the
//! [`MailboxService`] seam, an in-process implementation of it, and the
//! [`MailboxReceiveOperator`] that merges every sender of a stage into one
//! stream.

pub mod block;
pub mod error;
pub mod receive;
pub mod service;

pub use block::{ErrorPayload, TransferableBlock};
pub use error::MailboxError;
pub use receive::{BlockReceiver, ExchangeType, MailboxReceiveOperator};
pub use service::{
    InMemoryMailboxService, MailboxId, MailboxService, ReceivingMailbox, SendingMailbox,
};
