//! Query dispatcher
//!
//! Sends every non-reduce stage of a [`QueryPlan`] to its workers and, when
//! asked, runs the reduce stage on the calling task.

use std::collections::HashMap;
use std::time::Duration;

use floe_api::{metadata, QueryRequest};
use floe_common::ServerInstance;
use floe_mailbox::MailboxService;
use tracing::{debug, info, warn};

use crate::client::{DispatchClient, DispatchClientFactory, GrpcClientFactory};
use crate::config::Settings;
use crate::error::{DispatchError, Result};
use crate::plan::{construct_distributed_stage_plan, QueryPlan, NO_REDUCE_STAGE, ROOT_STAGE_ID};
use crate::pool::DispatchClientPool;
use crate::reduce::{create_reduce_stage_operator, reduce_mailbox_receive, DEFAULT_TIMEOUT};
use crate::result::{to_result_table, ResultTable};

pub struct QueryDispatcher<F: DispatchClientFactory = GrpcClientFactory> {
    pool: DispatchClientPool<F>,
    default_timeout: Duration,
}

impl QueryDispatcher<GrpcClientFactory> {
    pub fn new() -> Self {
        Self::from_settings(&Settings::default())
    }

    /// Dispatcher configured from the settings file and environment.
    pub fn from_config() -> Result<Self> {
        let settings = Settings::new()?;
        Ok(Self::from_settings(&settings))
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::with_factory(
            GrpcClientFactory::new(settings.connect_timeout()),
            settings.default_timeout(),
        )
    }
}

impl Default for QueryDispatcher<GrpcClientFactory> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: DispatchClientFactory> QueryDispatcher<F> {
    pub fn with_factory(factory: F, default_timeout: Duration) -> Self {
        Self {
            pool: DispatchClientPool::new(factory),
            default_timeout,
        }
    }

    /// Dispatcher using `factory` and the stock drain timeout.
    pub fn with_default_timeout(factory: F) -> Self {
        Self::with_factory(factory, DEFAULT_TIMEOUT)
    }

    pub fn pool(&self) -> &DispatchClientPool<F> {
        &self.pool
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Dispatches every stage except the reduce stage to each of its workers.
    ///
    /// Returns the id of the reduce stage, or [`NO_REDUCE_STAGE`] if the plan
    /// has none. The first worker that rejects its stage plan aborts the
    /// dispatch; stages already sent are left running.
    pub async fn submit(&self, request_id: i64, plan: &QueryPlan) -> Result<i32> {
        plan.validate()?;

        let mut reduce_stage_id = NO_REDUCE_STAGE;
        for (&stage_id, stage_metadata) in plan.stage_metadata_map() {
            let is_reduce_stage = plan
                .stage(stage_id)
                .is_some_and(|node| node.as_mailbox_receive().is_some());
            if is_reduce_stage {
                reduce_stage_id = stage_id;
                continue;
            }

            for server in &stage_metadata.server_instances {
                self.submit_stage(request_id, plan, stage_id, server).await?;
            }
        }

        info!(
            request_id,
            reduce_stage_id,
            stages = plan.stage_metadata_map().len(),
            "dispatched query plan"
        );
        Ok(reduce_stage_id)
    }

    async fn submit_stage(
        &self,
        request_id: i64,
        plan: &QueryPlan,
        stage_id: i32,
        server: &ServerInstance,
    ) -> Result<()> {
        let stage_plan = construct_distributed_stage_plan(plan, stage_id, server)?.serialize()?;
        let request = QueryRequest {
            stage_id,
            stage_plan,
            metadata: HashMap::from([
                (metadata::REQUEST_ID.to_string(), request_id.to_string()),
                (
                    metadata::SERVER_INSTANCE_HOST.to_string(),
                    server.hostname().to_string(),
                ),
                (
                    metadata::SERVER_INSTANCE_PORT.to_string(),
                    server.query_mailbox_port().to_string(),
                ),
            ]),
        };

        let client = self
            .pool
            .get_or_create(server.hostname(), server.query_service_port())?;
        let response = client.submit(request).await?;
        if let Some(message) = response.error() {
            warn!(request_id, stage_id, %server, error = message, "worker rejected stage plan");
            return Err(DispatchError::Dispatch {
                stage_id,
                server: server.clone(),
                message: message.to_string(),
            });
        }
        debug!(request_id, stage_id, endpoint = client.endpoint(), "submitted stage plan");
        Ok(())
    }

    /// Dispatches `plan`, drains its reduce stage through `mailbox_service`
    /// and materializes the result.
    ///
    /// `timeout` bounds the drain only; it defaults to the dispatcher's
    /// configured timeout.
    pub async fn submit_and_reduce(
        &self,
        request_id: i64,
        plan: &QueryPlan,
        mailbox_service: &dyn MailboxService,
        timeout: Option<Duration>,
    ) -> Result<ResultTable> {
        let reduce_stage_id = plan
            .reduce_stage_id()
            .ok_or_else(|| DispatchError::InvalidPlan("plan has no reduce stage".to_string()))?;
        let reduce_node = plan
            .stage(reduce_stage_id)
            .and_then(|node| node.as_mailbox_receive())
            .ok_or_else(|| {
                DispatchError::InvalidPlan(format!("stage {reduce_stage_id} is not a receive stage"))
            })?;
        let sender_stage_id = reduce_node.sender_stage_id;
        let sending_instances = plan
            .stage_metadata(sender_stage_id)
            .map(|metadata| metadata.server_instances.as_slice())
            .ok_or_else(|| {
                DispatchError::InvalidPlan(format!("sender stage {sender_stage_id} not found"))
            })?;
        let source_schema = plan
            .stage(ROOT_STAGE_ID)
            .map(|node| node.data_schema().clone())
            .ok_or_else(|| DispatchError::InvalidPlan(format!("stage {ROOT_STAGE_ID} not found")))?;

        self.submit(request_id, plan).await?;

        let mut receiver = create_reduce_stage_operator(
            mailbox_service,
            sending_instances,
            request_id,
            sender_stage_id,
            reduce_node.data_schema.clone(),
            mailbox_service.hostname(),
            mailbox_service.mailbox_port(),
        )?;
        let timeout = timeout.unwrap_or(self.default_timeout);
        let blocks = reduce_mailbox_receive(&mut receiver, timeout).await?;

        let table = to_result_table(&blocks, plan.query_result_fields(), &source_schema)?;
        info!(request_id, rows = table.num_rows(), "query finished");
        Ok(table)
    }

    /// Closes every pooled client. Later submissions fail with
    /// [`DispatchError::PoolClosed`].
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}
