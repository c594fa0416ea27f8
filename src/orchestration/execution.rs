//! Agent execution context: the per-run turn loop.

use super::{AdoptedResult, FlagReport, RunResult, SUBMIT_TOOL_NAME};
use crate::config::AgentConfig;
use crate::context::{ContextStore, ToolCallRecord, ToolOutcome, Turn};
use crate::gateway::{ChatResponse, ToolCallRequest, TurnRequest};
use crate::middleware::{GatewayCaller, MiddlewarePipeline};
use crate::observability::Logger;
use crate::tools::ScopedRegistry;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

enum Outcome {
    Completed(String),
    Failed(String),
    Cancelled,
}

/// One live run: a definition bound to a context store, a scoped registry
/// view and an instantiated pipeline.
///
/// The context exclusively owns its store; turns and tool-call records are
/// appended in production order and never written concurrently. Model
/// invocation and tool execution are the only suspension points, and both
/// race against the run's cancellation token.
pub struct AgentExecutionContext {
    run_id: String,
    definition: Arc<AgentConfig>,
    store: ContextStore,
    tools: ScopedRegistry,
    pipeline: MiddlewarePipeline,
    caller: GatewayCaller,
    model_name: String,
    logger: Logger,
    cancel: CancellationToken,
    adopted: AdoptedResult,
}

impl AgentExecutionContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        run_id: String,
        definition: Arc<AgentConfig>,
        tools: ScopedRegistry,
        pipeline: MiddlewarePipeline,
        caller: GatewayCaller,
        model_name: String,
        logger: Logger,
        cancel: CancellationToken,
        adopted: AdoptedResult,
    ) -> Self {
        Self {
            run_id,
            definition,
            store: ContextStore::new(),
            tools,
            pipeline,
            caller,
            model_name,
            logger,
            cancel,
            adopted,
        }
    }

    /// Run identifier.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Drive the run to a terminal state.
    ///
    /// Appends exactly one terminal record to the store before returning;
    /// the store travels with the result whatever the outcome.
    pub async fn run(mut self, initial_input: impl Into<String>) -> RunResult {
        let task = initial_input.into();
        let _ = self
            .logger
            .log_run_start(&self.run_id, &self.definition.name, &task);
        self.store.push(Turn::user(task));

        let outcome = self.drive().await;

        let summary = match &outcome {
            Outcome::Completed(output) => format!("run completed: {}", output),
            Outcome::Failed(error) => format!("run failed: {}", error),
            Outcome::Cancelled => "run cancelled".to_string(),
        };
        self.store.push(Turn::terminal(summary.clone()));

        let result = match outcome {
            Outcome::Completed(output) => RunResult::Completed {
                output,
                context: self.store,
            },
            Outcome::Failed(error) => RunResult::Failed {
                error,
                context: self.store,
            },
            Outcome::Cancelled => RunResult::Cancelled {
                context: self.store,
            },
        };
        let _ = self
            .logger
            .log_run_end(&self.run_id, result.state(), &summary);
        result
    }

    async fn drive(&mut self) -> Outcome {
        for _ in 0..self.definition.max_steps {
            if self.cancel.is_cancelled() {
                return Outcome::Cancelled;
            }

            let request = TurnRequest {
                system_prompt: self.definition.system_prompt.clone(),
                turns: self.store.turns().to_vec(),
                temperature: None,
                tools: self.tools.schemas(),
                endpoint_override: None,
            };

            let response = tokio::select! {
                _ = self.cancel.cancelled() => return Outcome::Cancelled,
                result = self.pipeline.execute_model_call(request, &self.caller) => {
                    match result {
                        Ok(response) => response,
                        Err(error) => {
                            let _ = self.logger.log_error(&self.run_id, &error.to_string());
                            return Outcome::Failed(error.to_string());
                        }
                    }
                }
            };

            match self.execute_turn(response).await {
                TurnProgress::Continue => {}
                TurnProgress::Terminal(outcome) => return outcome,
            }

            if let Err(error) = self.pipeline.apply_post_tool_edits(&mut self.store) {
                let _ = self.logger.log_error(&self.run_id, &error.to_string());
                return Outcome::Failed(format!("turn failed: {}", error));
            }

            if let Some(output) = self.adopted.take() {
                return Outcome::Completed(output);
            }
        }
        Outcome::Failed(format!(
            "step budget of {} exhausted",
            self.definition.max_steps
        ))
    }

    /// Record the model turn and execute its requested tool calls.
    ///
    /// Calls within one turn run concurrently; records are appended in
    /// request order once all calls have finished, so delegations to
    /// distinct subagents overlap while the store keeps a single writer.
    async fn execute_turn(&mut self, response: ChatResponse) -> TurnProgress {
        let content = response.content.unwrap_or_default();
        let _ = self
            .logger
            .log_model_turn(&self.run_id, &self.model_name, &content);

        self.store.push(Turn::assistant(content));
        let turn_index = self.store.len() - 1;

        if response.tool_calls.is_empty() {
            // The loop only terminates through the finish tool; nudge the
            // model back on track instead of stalling on plain prose.
            self.store.push(Turn::user(format!(
                "Continue with the task. Call `{}` when it is complete.",
                SUBMIT_TOOL_NAME
            )));
            return TurnProgress::Continue;
        }

        // Sequence indices are allocated in request order, before execution.
        // Every allocated index ends up in a record, so the store never
        // shows gaps; the first `submit` call is held aside and any repeat
        // is recorded as an error.
        let mut submission: Option<(u64, ToolCallRequest)> = None;
        let mut pending = Vec::new();
        let mut recorded: Vec<(u64, ToolCallRequest, ToolOutcome)> = Vec::new();
        for call in response.tool_calls {
            let sequence = self.store.allocate_sequence();
            if call.name == SUBMIT_TOOL_NAME {
                if submission.is_none() {
                    submission = Some((sequence, call));
                } else {
                    recorded.push((
                        sequence,
                        call,
                        ToolOutcome::Error(
                            "duplicate submit call; only the first is accepted".to_string(),
                        ),
                    ));
                }
            } else {
                pending.push((sequence, call));
            }
        }

        let tools = &self.tools;
        let invocations = pending.into_iter().map(|(sequence, call)| async move {
            let invocation = tools.invoke(&call.name, call.arguments.clone()).await;
            (sequence, call, invocation)
        });
        let results = tokio::select! {
            _ = self.cancel.cancelled() => return TurnProgress::Terminal(Outcome::Cancelled),
            results = futures_util::future::join_all(invocations) => results,
        };

        let mut fatal = None;
        for (sequence, call, invocation) in results {
            let outcome = match invocation {
                Ok(text) => ToolOutcome::Success(text),
                Err(error) => {
                    if error.is_fatal() {
                        fatal.get_or_insert(error.to_string());
                    }
                    ToolOutcome::Error(error.to_string())
                }
            };
            recorded.push((sequence, call, outcome));
        }

        let mut completed = None;
        if let Some((sequence, call)) = submission {
            let outcome = match serde_json::from_value::<FlagReport>(call.arguments.clone()) {
                Ok(report) => {
                    completed = Some(
                        serde_json::to_string_pretty(&report)
                            .unwrap_or_else(|_| report.flag.clone()),
                    );
                    ToolOutcome::Success("submission accepted".to_string())
                }
                // Malformed submission: recorded, the run continues.
                Err(error) => ToolOutcome::Error(format!("invalid submission: {}", error)),
            };
            recorded.push((sequence, call, outcome));
        }

        recorded.sort_by_key(|(sequence, _, _)| *sequence);
        for (sequence, call, outcome) in recorded {
            let _ = self.logger.log_tool_execution(
                &self.run_id,
                &call.name,
                &call.arguments.to_string(),
                outcome.as_text(),
                outcome.is_success(),
            );
            self.store.turns_mut()[turn_index].tool_calls.push(ToolCallRecord {
                sequence,
                call_id: call.id,
                tool_name: call.name,
                arguments: call.arguments,
                outcome,
            });
        }

        if let Some(error) = fatal {
            return TurnProgress::Terminal(Outcome::Failed(error));
        }
        if let Some(output) = completed {
            return TurnProgress::Terminal(Outcome::Completed(output));
        }
        TurnProgress::Continue
    }
}

enum TurnProgress {
    Continue,
    Terminal(Outcome),
}
