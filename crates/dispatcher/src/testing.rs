//! Test doubles shared by the unit tests of this crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use floe_api::{metadata, QueryRequest, QueryResponse};
use floe_common::{ColumnDataType, DataSchema, ServerInstance};
use floe_mailbox::ExchangeType;

use crate::client::{DispatchClient, DispatchClientFactory};
use crate::error::{DispatchError, Result};
use crate::plan::{
    MailboxReceiveNode, MailboxSendNode, QueryPlan, StageMetadata, StageNode, TableScanNode,
};

pub(crate) fn ab_schema() -> DataSchema {
    DataSchema::new([("A", ColumnDataType::Int), ("B", ColumnDataType::String)])
}

pub(crate) fn scan_stage(receiver_stage_id: i32) -> StageNode {
    StageNode::MailboxSend(MailboxSendNode {
        receiver_stage_id,
        data_schema: ab_schema(),
        exchange_type: ExchangeType::RandomDistributed,
        input: Box::new(StageNode::TableScan(TableScanNode {
            table_name: "t".to_string(),
            columns: vec!["A".to_string(), "B".to_string()],
            data_schema: ab_schema(),
        })),
    })
}

pub(crate) fn workers(endpoints: &[(&str, u16)]) -> Vec<ServerInstance> {
    endpoints
        .iter()
        .map(|(host, port)| ServerInstance::new(*host, *port, port + 1))
        .collect()
}

/// Reduce stage 0 receiving from scan stage 1, which runs on `endpoints`.
pub(crate) fn two_stage_plan(endpoints: &[(&str, u16)]) -> QueryPlan {
    QueryPlan::new(vec![(0, "a".to_string()), (1, "b".to_string())])
        .with_stage(
            0,
            StageNode::MailboxReceive(MailboxReceiveNode {
                sender_stage_id: 1,
                data_schema: ab_schema(),
                exchange_type: ExchangeType::RandomDistributed,
            }),
            StageMetadata::new(
                vec![ServerInstance::new("broker", 8421, 9000)],
                ExchangeType::Singleton,
            ),
        )
        .with_stage(
            1,
            scan_stage(0),
            StageMetadata::new(workers(endpoints), ExchangeType::RandomDistributed),
        )
}

#[derive(Default)]
pub(crate) struct Recorder {
    pub created: AtomicUsize,
    pub closed: AtomicUsize,
    pub submissions: Mutex<Vec<(String, QueryRequest)>>,
    pub rejected_endpoints: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn reject(&self, endpoint: &str) {
        self.rejected_endpoints
            .lock()
            .unwrap()
            .push(endpoint.to_string());
    }

    pub fn submitted_endpoints(&self) -> Vec<String> {
        self.submissions
            .lock()
            .unwrap()
            .iter()
            .map(|(endpoint, _)| endpoint.clone())
            .collect()
    }
}

pub(crate) struct RecordingFactory {
    recorder: Arc<Recorder>,
}

impl RecordingFactory {
    pub fn new() -> (Self, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        (
            Self {
                recorder: Arc::clone(&recorder),
            },
            recorder,
        )
    }
}

impl DispatchClientFactory for RecordingFactory {
    type Client = RecordingClient;

    fn create(&self, host: &str, port: u16) -> Result<RecordingClient> {
        self.recorder.created.fetch_add(1, Ordering::SeqCst);
        Ok(RecordingClient {
            endpoint: format!("{host}_{port}"),
            recorder: Arc::clone(&self.recorder),
            closed: AtomicBool::new(false),
        })
    }
}

pub(crate) struct RecordingClient {
    endpoint: String,
    recorder: Arc<Recorder>,
    closed: AtomicBool,
}

#[async_trait]
impl DispatchClient for RecordingClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn submit(&self, request: QueryRequest) -> Result<QueryResponse> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DispatchError::ClientClosed(self.endpoint.clone()));
        }
        self.recorder
            .submissions
            .lock()
            .unwrap()
            .push((self.endpoint.clone(), request));

        let rejected = self
            .recorder
            .rejected_endpoints
            .lock()
            .unwrap()
            .contains(&self.endpoint);
        let mut response = QueryResponse::default();
        if rejected {
            response.metadata = HashMap::from([(
                metadata::ERROR.to_string(),
                "stage plan rejected".to_string(),
            )]);
        }
        Ok(response)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.recorder.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
