//! Seams between the plumbing and the services

use std::sync::Arc;

use async_trait::async_trait;
use meshbank_protocol::{Reply, ReplyData, RequestBody};
use meshbank_transport::NodeId;
use meshbank_types::{BankError, CorrelationId};

use crate::KeyScope;

/// Where a request came from
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub id: CorrelationId,
    pub sender: NodeId,
    /// Label of the client link behind a relay, if any
    pub origin: Option<String>,
    pub scope: KeyScope,
}

impl RequestContext {
    /// Context for a call made inside the same process
    pub fn local(sender: impl Into<String>, scope: KeyScope) -> Self {
        Self {
            id: CorrelationId::new(),
            sender: NodeId::new(sender),
            origin: None,
            scope,
        }
    }
}

/// A backend service's request handler
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, ctx: RequestContext, body: RequestBody) -> Reply;
}

/// Something that can carry a request to a service and bring back its data
#[async_trait]
pub trait Call: Send + Sync {
    async fn call(&self, body: RequestBody) -> Result<ReplyData, BankError>;
}

/// [`Call`] straight into a handler in the same process, skipping the network
pub struct DirectCall {
    handler: Arc<dyn Handler>,
    caller: String,
    scope: KeyScope,
}

impl DirectCall {
    pub fn new(handler: Arc<dyn Handler>, caller: impl Into<String>, scope: KeyScope) -> Self {
        Self {
            handler,
            caller: caller.into(),
            scope,
        }
    }
}

#[async_trait]
impl Call for DirectCall {
    async fn call(&self, body: RequestBody) -> Result<ReplyData, BankError> {
        let ctx = RequestContext::local(self.caller.clone(), self.scope);
        self.handler.handle(ctx, body).await.into_result()
    }
}
