//! Stage graph handed over by the planner, and the per-worker stage plans
//! derived from it.

use std::collections::BTreeMap;

use floe_common::{DataSchema, ServerInstance};
use floe_mailbox::ExchangeType;
use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};

/// Returned by `submit` when the plan has no reduce stage.
pub const NO_REDUCE_STAGE: i32 = -1;

/// Stage whose data schema defines the columns of the final result.
pub const ROOT_STAGE_ID: i32 = 0;

/// Receives the output of every sender instance of `sender_stage_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailboxReceiveNode {
    pub sender_stage_id: i32,
    pub data_schema: DataSchema,
    pub exchange_type: ExchangeType,
}

/// Streams the output of `input` to the instances of `receiver_stage_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailboxSendNode {
    pub receiver_stage_id: i32,
    pub data_schema: DataSchema,
    pub exchange_type: ExchangeType,
    pub input: Box<StageNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableScanNode {
    pub table_name: String,
    pub columns: Vec<String>,
    pub data_schema: DataSchema,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectNode {
    pub column_indices: Vec<usize>,
    pub data_schema: DataSchema,
    pub input: Box<StageNode>,
}

/// A node of a stage's operator tree. Workers execute it; the dispatcher
/// only inspects the root to find the reduce stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageNode {
    MailboxReceive(MailboxReceiveNode),
    MailboxSend(MailboxSendNode),
    TableScan(TableScanNode),
    Project(ProjectNode),
}

impl StageNode {
    pub fn data_schema(&self) -> &DataSchema {
        match self {
            StageNode::MailboxReceive(node) => &node.data_schema,
            StageNode::MailboxSend(node) => &node.data_schema,
            StageNode::TableScan(node) => &node.data_schema,
            StageNode::Project(node) => &node.data_schema,
        }
    }

    pub fn as_mailbox_receive(&self) -> Option<&MailboxReceiveNode> {
        match self {
            StageNode::MailboxReceive(node) => Some(node),
            _ => None,
        }
    }
}

/// Workers assigned to a stage and how data is routed into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageMetadata {
    pub server_instances: Vec<ServerInstance>,
    pub exchange_type: ExchangeType,
}

impl StageMetadata {
    pub fn new(server_instances: Vec<ServerInstance>, exchange_type: ExchangeType) -> Self {
        Self {
            server_instances,
            exchange_type,
        }
    }
}

/// A query partitioned into stages, each assigned to worker instances.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPlan {
    query_stage_map: BTreeMap<i32, StageNode>,
    stage_metadata_map: BTreeMap<i32, StageMetadata>,
    query_result_fields: Vec<(usize, String)>,
}

impl QueryPlan {
    pub fn new(query_result_fields: Vec<(usize, String)>) -> Self {
        Self {
            query_result_fields,
            ..Self::default()
        }
    }

    pub fn with_stage(mut self, stage_id: i32, root: StageNode, metadata: StageMetadata) -> Self {
        self.add_stage(stage_id, root, metadata);
        self
    }

    pub fn add_stage(&mut self, stage_id: i32, root: StageNode, metadata: StageMetadata) {
        self.query_stage_map.insert(stage_id, root);
        self.stage_metadata_map.insert(stage_id, metadata);
    }

    pub fn stage(&self, stage_id: i32) -> Option<&StageNode> {
        self.query_stage_map.get(&stage_id)
    }

    pub fn stage_metadata(&self, stage_id: i32) -> Option<&StageMetadata> {
        self.stage_metadata_map.get(&stage_id)
    }

    pub fn stage_metadata_map(&self) -> &BTreeMap<i32, StageMetadata> {
        &self.stage_metadata_map
    }

    /// Output projection as `(source column index, output column name)`.
    pub fn query_result_fields(&self) -> &[(usize, String)] {
        &self.query_result_fields
    }

    /// The stage rooted at a mailbox receive node, if any.
    pub fn reduce_stage_id(&self) -> Option<i32> {
        self.query_stage_map
            .iter()
            .find(|(_, node)| node.as_mailbox_receive().is_some())
            .map(|(stage_id, _)| *stage_id)
    }

    /// Checks the structural invariants dispatch relies on.
    pub fn validate(&self) -> Result<()> {
        let mut reduce_stages = 0;
        for (stage_id, metadata) in &self.stage_metadata_map {
            let node = self.stage(*stage_id).ok_or_else(|| {
                DispatchError::InvalidPlan(format!("stage {stage_id} has metadata but no plan"))
            })?;
            if node.as_mailbox_receive().is_some() {
                reduce_stages += 1;
            } else if metadata.server_instances.is_empty() {
                return Err(DispatchError::InvalidPlan(format!(
                    "stage {stage_id} has no assigned server instances"
                )));
            }
        }
        if reduce_stages > 1 {
            return Err(DispatchError::InvalidPlan(format!(
                "expected at most one reduce stage, found {reduce_stages}"
            )));
        }
        Ok(())
    }
}

/// A stage plan bound to the worker instance that will run it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributedStagePlan {
    stage_id: i32,
    server_instance: ServerInstance,
    stage_root: StageNode,
    stage_metadata: BTreeMap<i32, StageMetadata>,
}

impl DistributedStagePlan {
    pub fn new(
        stage_id: i32,
        server_instance: ServerInstance,
        stage_root: StageNode,
        stage_metadata: BTreeMap<i32, StageMetadata>,
    ) -> Self {
        Self {
            stage_id,
            server_instance,
            stage_root,
            stage_metadata,
        }
    }

    pub fn stage_id(&self) -> i32 {
        self.stage_id
    }

    pub fn server_instance(&self) -> &ServerInstance {
        &self.server_instance
    }

    pub fn stage_root(&self) -> &StageNode {
        &self.stage_root
    }

    pub fn stage_metadata(&self) -> &BTreeMap<i32, StageMetadata> {
        &self.stage_metadata
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

pub fn construct_distributed_stage_plan(
    plan: &QueryPlan,
    stage_id: i32,
    server_instance: &ServerInstance,
) -> Result<DistributedStagePlan> {
    let stage_root = plan
        .stage(stage_id)
        .ok_or_else(|| DispatchError::InvalidPlan(format!("stage {stage_id} not found")))?;
    Ok(DistributedStagePlan::new(
        stage_id,
        server_instance.clone(),
        stage_root.clone(),
        plan.stage_metadata_map().clone(),
    ))
}
