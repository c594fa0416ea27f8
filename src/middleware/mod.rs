//! Middleware pipeline wrapping turn execution.
//!
//! Every "produce one turn" operation runs through an ordered chain of
//! interceptors. Each link may inspect or rewrite the outgoing request,
//! short-circuit with a synthetic response, rewrite the model's response, or
//! edit the context store after tool execution. Composition order is the
//! declaration order in the agent definition; each link decides whether to
//! invoke the next one.

pub mod context_editing;
pub mod fallback;
pub mod notes;

pub use context_editing::{ClearToolUsesEdit, ContextEdit, ContextEditingMiddleware, LongChainWakeUp};
pub use fallback::ModelFallbackMiddleware;
pub use notes::ImportantNotesMiddleware;

use crate::context::ContextStore;
use crate::gateway::{ChatResponse, GatewayError, ModelEndpoint, ModelGateway, TurnRequest};
use crate::tools::Tool;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// The "next link" seen by a middleware wrapping the model-invocation step.
#[async_trait]
pub trait ModelCaller: Send + Sync {
    /// Produce a response for the request.
    async fn call(&self, request: TurnRequest) -> Result<ChatResponse, GatewayError>;
}

/// One interceptor in the pipeline.
///
/// Default implementations are pass-through, so a middleware only overrides
/// the steps it cares about. Any mutable cross-turn state must live inside
/// the middleware instance: pipelines are instantiated per execution context,
/// which scopes such state to one context store.
#[async_trait]
pub trait TurnMiddleware: Send + Sync {
    /// Middleware name for logging.
    fn name(&self) -> &str;

    /// Wrap the model-invocation step. May rewrite the request, delegate to
    /// `next`, rewrite the result, or short-circuit without calling `next`.
    async fn wrap_model_call(
        &self,
        request: TurnRequest,
        next: &dyn ModelCaller,
    ) -> Result<ChatResponse, GatewayError> {
        next.call(request).await
    }

    /// Observe or edit the context store after tool execution. A returned
    /// error is non-retryable and aborts the turn.
    fn after_tool_execution(&self, _store: &mut ContextStore) -> Result<()> {
        Ok(())
    }

    /// Run-scoped tools this middleware contributes (e.g. a note writer).
    fn provided_tools(&self) -> Vec<Arc<dyn Tool>> {
        Vec::new()
    }
}

/// Ordered interceptor chain for one execution context.
pub struct MiddlewarePipeline {
    chain: Vec<Arc<dyn TurnMiddleware>>,
}

impl MiddlewarePipeline {
    /// Build a pipeline from interceptors in declaration order.
    pub fn new(chain: Vec<Arc<dyn TurnMiddleware>>) -> Self {
        Self { chain }
    }

    /// Pipeline with no interceptors; requests go straight to the terminal.
    pub fn empty() -> Self {
        Self { chain: Vec::new() }
    }

    /// Tools contributed by the chain's interceptors.
    pub fn provided_tools(&self) -> Vec<Arc<dyn Tool>> {
        self.chain
            .iter()
            .flat_map(|middleware| middleware.provided_tools())
            .collect()
    }

    /// Run the model-invocation step through the chain, ending at `terminal`.
    pub async fn execute_model_call(
        &self,
        request: TurnRequest,
        terminal: &dyn ModelCaller,
    ) -> Result<ChatResponse, GatewayError> {
        let link = ChainLink {
            chain: &self.chain,
            terminal,
        };
        link.call(request).await
    }

    /// Apply every interceptor's post-tool-execution step in order.
    pub fn apply_post_tool_edits(&self, store: &mut ContextStore) -> Result<()> {
        for middleware in &self.chain {
            middleware.after_tool_execution(store)?;
        }
        Ok(())
    }
}

/// Chain-of-responsibility link over a middleware slice.
struct ChainLink<'a> {
    chain: &'a [Arc<dyn TurnMiddleware>],
    terminal: &'a dyn ModelCaller,
}

#[async_trait]
impl<'a> ModelCaller for ChainLink<'a> {
    async fn call(&self, request: TurnRequest) -> Result<ChatResponse, GatewayError> {
        match self.chain.split_first() {
            Some((head, rest)) => {
                let next = ChainLink {
                    chain: rest,
                    terminal: self.terminal,
                };
                head.wrap_model_call(request, &next).await
            }
            None => self.terminal.call(request).await,
        }
    }
}

/// Terminal caller invoking the gateway.
///
/// Honors the request's endpoint override so fallback middleware can steer
/// retries through the whole chain; without an override the caller's own
/// default endpoint is used.
pub struct GatewayCaller {
    gateway: Arc<dyn ModelGateway>,
    endpoint: ModelEndpoint,
}

impl GatewayCaller {
    pub fn new(gateway: Arc<dyn ModelGateway>, endpoint: ModelEndpoint) -> Self {
        Self { gateway, endpoint }
    }
}

#[async_trait]
impl ModelCaller for GatewayCaller {
    async fn call(&self, request: TurnRequest) -> Result<ChatResponse, GatewayError> {
        let endpoint = request
            .endpoint_override
            .clone()
            .unwrap_or_else(|| self.endpoint.clone());
        self.gateway.invoke(&endpoint, &request).await
    }
}
