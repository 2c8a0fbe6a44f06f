//! Dispatcher crate
//!
//! Submits the stages of a distributed query plan to their workers, runs the
//! reduce stage locally by draining its mailboxes, and materializes the
//! drained blocks into a [`ResultTable`].

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod plan;
pub mod pool;
pub mod reduce;
pub mod result;

#[cfg(test)]
mod testing;

pub use client::{DispatchClient, DispatchClientFactory, GrpcClientFactory, GrpcDispatchClient};
pub use dispatcher::QueryDispatcher;
pub use error::{DispatchError, Result};
pub use plan::{
    construct_distributed_stage_plan, DistributedStagePlan, MailboxReceiveNode, MailboxSendNode,
    ProjectNode, QueryPlan, StageMetadata, StageNode, TableScanNode, NO_REDUCE_STAGE,
    ROOT_STAGE_ID,
};
pub use pool::DispatchClientPool;
pub use reduce::{
    create_reduce_stage_operator, reduce_mailbox_receive, reduce_mailbox_receive_default,
    DEFAULT_TIMEOUT,
};
pub use result::{to_result_table, ResultTable};
