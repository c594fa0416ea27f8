//! Dispatcher: definition registry, run creation and delegation routing.

use super::execution::AgentExecutionContext;
use super::tools::{SubmitTool, DELEGATE_TOOL_NAME};
use super::{AdoptedResult, RunReport, RunResult};
use crate::config::{
    AgentConfig, AgentDocument, ConfigError, ContextEditSpec, DelegationPolicy, MiddlewareSpec,
};
use crate::context::NotesLog;
use crate::gateway::{ModelEndpointConfig, ModelGateway};
use crate::middleware::{
    ClearToolUsesEdit, ContextEdit, ContextEditingMiddleware, GatewayCaller,
    ImportantNotesMiddleware, LongChainWakeUp, MiddlewarePipeline, ModelFallbackMiddleware,
    TurnMiddleware,
};
use crate::observability::Logger;
use crate::tools::{ScopedRegistry, Tool, ToolError, ToolRegistry, ToolSchema};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Dispatch-level failure.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// No agent definition with this name.
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    /// A delegation to this subagent is already active for the parent run.
    #[error("subagent '{0}' already has an active delegation for this run")]
    DelegationBusy(String),
}

/// Owns the read-only definition registry and creates execution contexts.
///
/// One dispatcher serves the whole process: the main run and any concurrent
/// delegations share its tool registry, gateway, notes log and logger. All
/// mutable bookkeeping sits behind short-lived in-memory locks, never held
/// across an await.
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    definitions: HashMap<String, Arc<AgentConfig>>,
    main_agent: Arc<AgentConfig>,
    registry: Arc<ToolRegistry>,
    gateway: Arc<dyn ModelGateway>,
    endpoints: ModelEndpointConfig,
    logger: Logger,
    notes: NotesLog,
    /// Active (parent run, subagent name) delegations.
    active_delegations: Mutex<HashSet<(String, String)>>,
    reports: Mutex<Vec<RunReport>>,
}

impl Dispatcher {
    /// Build from a validated document.
    ///
    /// Every tool name referenced by any definition must resolve in the
    /// registry; anything else fails here, at startup, never mid-run.
    pub fn new(
        document: &AgentDocument,
        registry: Arc<ToolRegistry>,
        gateway: Arc<dyn ModelGateway>,
        endpoints: ModelEndpointConfig,
        logger: Logger,
    ) -> Result<Self, ConfigError> {
        document.validate()?;

        let mut definitions = HashMap::new();
        for agent in std::iter::once(&document.agent).chain(document.subagents.iter()) {
            for tool in &agent.tools {
                if !registry.contains(tool) {
                    return Err(ConfigError::Validation(format!(
                        "agent '{}' references unknown tool '{}'",
                        agent.name, tool
                    )));
                }
            }
            definitions.insert(agent.name.clone(), Arc::new(agent.clone()));
        }
        let main_agent = definitions[&document.agent.name].clone();

        Ok(Self {
            inner: Arc::new(DispatcherInner {
                definitions,
                main_agent,
                registry,
                gateway,
                endpoints,
                logger,
                notes: NotesLog::new(),
                active_delegations: Mutex::new(HashSet::new()),
                reports: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Resolve an agent name to its definition.
    pub fn resolve(&self, name: &str) -> Result<Arc<AgentConfig>, DispatchError> {
        self.inner.resolve(name)
    }

    /// Shared notes log.
    pub fn notes(&self) -> &NotesLog {
        &self.inner.notes
    }

    /// Snapshot of every archived run report, main and delegated.
    pub fn run_reports(&self) -> Vec<RunReport> {
        self.inner
            .reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Run the main agent to a terminal state.
    pub async fn run_main(&self, initial_input: impl Into<String>) -> RunResult {
        self.run_main_with_cancellation(initial_input, CancellationToken::new())
            .await
    }

    /// Run the main agent under an externally held cancellation token.
    ///
    /// Cancelling the token propagates to in-flight model and tool calls and
    /// transitively to every child delegation.
    pub async fn run_main_with_cancellation(
        &self,
        initial_input: impl Into<String>,
        cancel: CancellationToken,
    ) -> RunResult {
        let definition = self.inner.main_agent.clone();
        let context = self.inner.build_context(definition.clone(), cancel, true);
        let run_id = context.run_id().to_string();
        let result = context.run(initial_input).await;
        self.inner.archive(RunReport {
            run_id,
            agent_name: definition.name.clone(),
            result: result.clone(),
        });
        result
    }
}

impl DispatcherInner {
    fn resolve(&self, name: &str) -> Result<Arc<AgentConfig>, DispatchError> {
        self.definitions
            .get(name)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownAgent(name.to_string()))
    }

    fn archive(&self, report: RunReport) {
        self.reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(report);
    }

    /// Instantiate a fresh execution context for one run.
    ///
    /// Pipelines are built per context so middleware counters stay scoped to
    /// a single store; the delegation tool is attached to parent runs only.
    fn build_context(
        self: &Arc<Self>,
        definition: Arc<AgentConfig>,
        cancel: CancellationToken,
        with_delegation: bool,
    ) -> AgentExecutionContext {
        let run_id = Uuid::new_v4().to_string();
        let adopted = AdoptedResult::default();

        let mut chain: Vec<Arc<dyn TurnMiddleware>> = Vec::new();
        for spec in &definition.middleware {
            chain.push(self.build_middleware(spec));
        }
        let pipeline = MiddlewarePipeline::new(chain);

        let mut tools = ScopedRegistry::new(self.registry.clone(), definition.tools.clone());
        for tool in pipeline.provided_tools() {
            tools.attach(tool);
        }
        tools.attach(Arc::new(SubmitTool));
        if with_delegation && self.definitions.len() > 1 {
            tools.attach(Arc::new(DelegateTool {
                inner: self.clone(),
                parent_run: run_id.clone(),
                cancel: cancel.clone(),
                adopted: adopted.clone(),
            }));
        }

        let caller = GatewayCaller::new(self.gateway.clone(), self.endpoints.primary.clone());
        AgentExecutionContext::new(
            run_id,
            definition,
            tools,
            pipeline,
            caller,
            self.endpoints.primary.model.clone(),
            self.logger.clone(),
            cancel,
            adopted,
        )
    }

    fn build_middleware(self: &Arc<Self>, spec: &MiddlewareSpec) -> Arc<dyn TurnMiddleware> {
        match spec {
            MiddlewareSpec::ModelFallback { backup_retries } => Arc::new(
                ModelFallbackMiddleware::new(self.endpoints.clone(), *backup_retries),
            ),
            MiddlewareSpec::ImportantNotes => {
                Arc::new(ImportantNotesMiddleware::new(self.notes.clone()))
            }
            MiddlewareSpec::ContextEditing { edits } => {
                let policies: Vec<Arc<dyn ContextEdit>> = edits
                    .iter()
                    .map(|edit| -> Arc<dyn ContextEdit> {
                        match edit {
                            ContextEditSpec::LongChainWakeUp {
                                max_consecutive_counts,
                                important_tool_name,
                                exclude_tools,
                            } => Arc::new(LongChainWakeUp::new(
                                *max_consecutive_counts,
                                important_tool_name.clone(),
                                exclude_tools.iter().cloned(),
                            )),
                            ContextEditSpec::ClearToolUses {
                                trigger_tokens,
                                keep,
                                exclude_tools,
                            } => Arc::new(ClearToolUsesEdit::new(
                                *trigger_tokens,
                                *keep,
                                exclude_tools.iter().cloned(),
                            )),
                        }
                    })
                    .collect();
                Arc::new(ContextEditingMiddleware::new(policies, self.notes.clone()))
            }
        }
    }
}

/// RAII guard for the one-active-delegation-per-(run, name) policy.
struct DelegationGuard {
    inner: Arc<DispatcherInner>,
    key: (String, String),
}

impl DelegationGuard {
    fn acquire(
        inner: Arc<DispatcherInner>,
        parent_run: &str,
        subagent: &str,
    ) -> Result<Self, DispatchError> {
        let key = (parent_run.to_string(), subagent.to_string());
        let mut active = inner
            .active_delegations
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if !active.insert(key.clone()) {
            return Err(DispatchError::DelegationBusy(subagent.to_string()));
        }
        drop(active);
        Ok(Self { inner, key })
    }
}

impl Drop for DelegationGuard {
    fn drop(&mut self) {
        self.inner
            .active_delegations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}

#[derive(serde::Deserialize)]
struct DelegateArgs {
    subagent: String,
    task: String,
}

/// Run-scoped delegation tool attached to parent contexts.
struct DelegateTool {
    inner: Arc<DispatcherInner>,
    parent_run: String,
    cancel: CancellationToken,
    adopted: AdoptedResult,
}

#[async_trait]
impl Tool for DelegateTool {
    fn name(&self) -> &str {
        DELEGATE_TOOL_NAME
    }

    fn schema(&self) -> ToolSchema {
        let subagents: Vec<String> = self
            .inner
            .definitions
            .values()
            .filter(|d| d.name != self.inner.main_agent.name)
            .map(|d| format!("- {}: {}", d.name, d.description))
            .collect();
        ToolSchema {
            name: DELEGATE_TOOL_NAME.to_string(),
            description: format!(
                "Delegate a sub-task to a named specialist subagent and wait for its result.\n\
                 Available subagents:\n{}",
                subagents.join("\n")
            ),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "subagent": {"type": "string", "description": "Subagent name"},
                    "task": {"type": "string", "description": "Task description for the subagent"}
                },
                "required": ["subagent", "task"]
            }),
        }
    }

    async fn invoke(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let args: DelegateArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let definition = self
            .inner
            .resolve(&args.subagent)
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        if definition.name == self.inner.main_agent.name {
            return Err(ToolError::Execution(
                "cannot delegate to the main agent".to_string(),
            ));
        }

        let guard = DelegationGuard::acquire(self.inner.clone(), &self.parent_run, &args.subagent)
            .map_err(|e| ToolError::Execution(e.to_string()))?;

        let _ = self
            .inner
            .logger
            .log_delegation(&self.parent_run, &args.subagent, &args.task);

        // The child runs detached under a child token: if the parent is
        // cancelled and this future is dropped, the child still observes the
        // cancellation and archives its partial context.
        let child = self
            .inner
            .build_context(definition.clone(), self.cancel.child_token(), false);
        let child_run_id = child.run_id().to_string();
        let inner = self.inner.clone();
        let agent_name = definition.name.clone();
        let handle = tokio::spawn(async move {
            let result = child.run(args.task).await;
            let summary = match &result {
                RunResult::Completed { output, .. } => (true, output.clone()),
                RunResult::Failed { error, .. } => {
                    (false, format!("delegation failed: {}", error))
                }
                RunResult::Cancelled { .. } => (false, "delegation cancelled".to_string()),
            };
            inner.archive(RunReport {
                run_id: child_run_id,
                agent_name,
                result,
            });
            summary
        });

        let (completed, summary) = handle
            .await
            .map_err(|e| ToolError::Execution(format!("delegation task failed: {}", e)))?;
        drop(guard);

        if completed && definition.delegation_policy == DelegationPolicy::AdoptVerbatim {
            self.adopted.set(summary.clone());
        }
        Ok(format!(
            "Subagent '{}' finished.\n{}",
            definition.name, summary
        ))
    }
}
