//! Integration tests for the orchestration runtime
//!
//! Drives complete runs through the dispatcher with scripted gateways and
//! spy tools.

use async_trait::async_trait;
use oak::config::AgentDocument;
use oak::gateway::{
    ChatResponse, GatewayError, ModelEndpoint, ModelEndpointConfig, ModelGateway, ToolCallRequest,
    TurnRequest,
};
use oak::observability::Logger;
use oak::orchestration::{Dispatcher, RunResult};
use oak::tools::{Tool, ToolError, ToolRegistry, ToolSchema};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One scripted gateway step.
struct Step {
    delay: Option<Duration>,
    result: Result<ChatResponse, GatewayError>,
}

impl Step {
    fn respond(response: ChatResponse) -> Self {
        Self {
            delay: None,
            result: Ok(response),
        }
    }

    fn respond_after(delay: Duration, response: ChatResponse) -> Self {
        Self {
            delay: Some(delay),
            result: Ok(response),
        }
    }

    fn fail(error: GatewayError) -> Self {
        Self {
            delay: None,
            result: Err(error),
        }
    }
}

/// Gateway scripted per agent, matched by a marker in the system prompt.
struct ScriptedGateway {
    scripts: Mutex<HashMap<&'static str, Vec<Step>>>,
}

impl ScriptedGateway {
    fn new(scripts: Vec<(&'static str, Vec<Step>)>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
        }
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    async fn invoke(
        &self,
        _endpoint: &ModelEndpoint,
        request: &TurnRequest,
    ) -> Result<ChatResponse, GatewayError> {
        let step = {
            let mut scripts = self.scripts.lock().unwrap();
            let script = scripts
                .iter_mut()
                .find(|(marker, _)| request.system_prompt.contains(**marker))
                .map(|(_, steps)| steps);
            match script {
                Some(steps) if !steps.is_empty() => steps.remove(0),
                _ => Step::fail(GatewayError::Endpoint("script exhausted".to_string())),
            }
        };
        if let Some(delay) = step.delay {
            tokio::time::sleep(delay).await;
        }
        step.result
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Gateway scripted per endpoint base URL, for fallback tests.
struct EndpointGateway {
    scripts: Mutex<HashMap<String, Vec<Step>>>,
}

impl EndpointGateway {
    fn new(scripts: Vec<(&str, Vec<Step>)>) -> Self {
        Self {
            scripts: Mutex::new(
                scripts
                    .into_iter()
                    .map(|(url, steps)| (url.to_string(), steps))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl ModelGateway for EndpointGateway {
    async fn invoke(
        &self,
        endpoint: &ModelEndpoint,
        _request: &TurnRequest,
    ) -> Result<ChatResponse, GatewayError> {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(&endpoint.base_url) {
            Some(steps) if !steps.is_empty() => steps.remove(0).result,
            _ => Err(GatewayError::Endpoint("script exhausted".to_string())),
        }
    }

    fn name(&self) -> &str {
        "endpoint-scripted"
    }
}

/// Gateway recording the system prompt of every request before finishing
/// the run with a submission.
struct PromptCaptureGateway {
    prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl ModelGateway for PromptCaptureGateway {
    async fn invoke(
        &self,
        _endpoint: &ModelEndpoint,
        request: &TurnRequest,
    ) -> Result<ChatResponse, GatewayError> {
        self.prompts
            .lock()
            .unwrap()
            .push(request.system_prompt.clone());
        Ok(calls(vec![submit_call("call_0", "flag{seen}")]))
    }

    fn name(&self) -> &str {
        "prompt-capture"
    }
}

/// Tool recording every invocation.
struct SpyTool {
    tool_name: &'static str,
    invocations: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl SpyTool {
    fn new(tool_name: &'static str) -> (Self, Arc<Mutex<Vec<serde_json::Value>>>) {
        let invocations = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                tool_name,
                invocations: invocations.clone(),
            },
            invocations,
        )
    }
}

#[async_trait]
impl Tool for SpyTool {
    fn name(&self) -> &str {
        self.tool_name
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.tool_name.to_string(),
            description: "spy tool".to_string(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        }
    }

    async fn invoke(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        self.invocations.lock().unwrap().push(arguments);
        Ok(format!("{} executed", self.tool_name))
    }
}

fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCallRequest {
    ToolCallRequest {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }
}

fn calls(tool_calls: Vec<ToolCallRequest>) -> ChatResponse {
    ChatResponse {
        content: Some("working".to_string()),
        tool_calls,
    }
}

fn submit_call(id: &str, flag: &str) -> ToolCallRequest {
    tool_call(
        id,
        "submit",
        serde_json::json!({"flag": flag, "write_up_content": "steps taken"}),
    )
}

fn endpoints() -> ModelEndpointConfig {
    let endpoint = |base_url: &str| ModelEndpoint {
        base_url: base_url.to_string(),
        api_key: "test-key".to_string(),
        model: "test-model".to_string(),
        temperature: 0.5,
    };
    ModelEndpointConfig {
        primary: endpoint("http://primary"),
        backup: endpoint("http://backup"),
    }
}

fn logger() -> (tempfile::TempDir, Logger) {
    let dir = tempfile::tempdir().unwrap();
    let logger = Logger::new(Some(&dir.path().join("run.md"))).unwrap();
    (dir, logger)
}

#[tokio::test]
async fn test_run_completes_on_submit() {
    let document = AgentDocument::from_yaml(
        r#"
agent:
  name: main
  system_prompt: "MAIN_AGENT: assess the target"
  tools: ["curl"]
"#,
    )
    .unwrap();

    let (curl, curl_invocations) = SpyTool::new("curl");
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(curl));

    let gateway = ScriptedGateway::new(vec![(
        "MAIN_AGENT",
        vec![
            Step::respond(calls(vec![tool_call(
                "call_0",
                "curl",
                serde_json::json!({"url": "http://target"}),
            )])),
            Step::respond(calls(vec![submit_call("call_1", "flag{integration}")])),
        ],
    )]);

    let (_dir, logger) = logger();
    let dispatcher = Dispatcher::new(
        &document,
        Arc::new(registry),
        Arc::new(gateway),
        endpoints(),
        logger,
    )
    .unwrap();

    let result = dispatcher.run_main("find the flag").await;
    let RunResult::Completed { output, context } = &result else {
        panic!("expected completion, got {}", result.state());
    };
    assert!(output.contains("flag{integration}"));
    assert_eq!(curl_invocations.lock().unwrap().len(), 1);

    // Exactly one terminal record, appended last.
    assert_eq!(
        context.last().map(|t| t.origin),
        Some(oak::context::TurnOrigin::Terminal)
    );

    // Sequence indices are strictly increasing with no gaps.
    let sequences: Vec<u64> = context.tool_call_records().map(|r| r.sequence).collect();
    assert_eq!(sequences, vec![0, 1]);

    let reports = dispatcher.run_reports();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].result.is_completed());
}

#[tokio::test]
async fn test_unpermitted_tool_is_recorded_but_never_invoked() {
    let document = AgentDocument::from_yaml(
        r#"
agent:
  name: main
  system_prompt: "MAIN_AGENT: curl only"
  tools: ["curl"]
"#,
    )
    .unwrap();

    let (curl, _) = SpyTool::new("curl");
    let (nmap, nmap_invocations) = SpyTool::new("nmap");
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(curl));
    registry.register(Arc::new(nmap));

    let gateway = ScriptedGateway::new(vec![(
        "MAIN_AGENT",
        vec![
            Step::respond(calls(vec![tool_call(
                "call_0",
                "nmap",
                serde_json::json!({"target": "10.0.0.1"}),
            )])),
            Step::respond(calls(vec![submit_call("call_1", "flag{scoped}")])),
        ],
    )]);

    let (_dir, logger) = logger();
    let dispatcher = Dispatcher::new(
        &document,
        Arc::new(registry),
        Arc::new(gateway),
        endpoints(),
        logger,
    )
    .unwrap();

    let result = dispatcher.run_main("scan the target").await;
    assert!(result.is_completed(), "denial must not abort the run");

    let denied = result
        .context()
        .tool_call_records()
        .find(|record| record.tool_name == "nmap")
        .expect("denial must be recorded");
    assert!(!denied.outcome.is_success());
    assert!(denied.outcome.as_text().contains("not permitted"));
    assert!(nmap_invocations.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_fallback_uses_backup_then_exhausts() {
    let yaml = r#"
agent:
  name: main
  system_prompt: "MAIN_AGENT: fallback run"
  middleware:
    - type: model_fallback
      backup_retries: 1
"#;

    // Primary times out, backup succeeds: the run completes with no error.
    let document = AgentDocument::from_yaml(yaml).unwrap();
    let gateway = EndpointGateway::new(vec![
        ("http://primary", vec![Step::fail(GatewayError::Timeout)]),
        (
            "http://backup",
            vec![Step::respond(calls(vec![submit_call(
                "call_0",
                "flag{backup}",
            )]))],
        ),
    ]);
    let (_dir, logger) = logger();
    let dispatcher = Dispatcher::new(
        &document,
        Arc::new(ToolRegistry::new()),
        Arc::new(gateway),
        endpoints(),
        logger,
    )
    .unwrap();
    let result = dispatcher.run_main("go").await;
    assert!(result.is_completed());

    // Both endpoints failing surfaces ModelUnavailable and the run fails.
    let gateway = EndpointGateway::new(vec![
        ("http://primary", vec![Step::fail(GatewayError::Timeout)]),
        ("http://backup", vec![Step::fail(GatewayError::RateLimited)]),
    ]);
    let (_dir, logger) = self::logger();
    let dispatcher = Dispatcher::new(
        &document,
        Arc::new(ToolRegistry::new()),
        Arc::new(gateway),
        endpoints(),
        logger,
    )
    .unwrap();
    let result = dispatcher.run_main("go").await;
    let RunResult::Failed { error, .. } = &result else {
        panic!("expected failure, got {}", result.state());
    };
    assert!(error.contains("exhausted"));
}

fn delegation_yaml() -> &'static str {
    r#"
agent:
  name: main
  system_prompt: "MAIN_AGENT: orchestrate"
subagents:
  - name: sqli_specialist
    description: "SQL injection testing"
    system_prompt: "SQLI_AGENT: test for injection"
  - name: xss_specialist
    description: "Cross-site scripting testing"
    system_prompt: "XSS_AGENT: test for xss"
"#
}

#[tokio::test]
async fn test_same_name_delegation_is_rejected_while_active() {
    let document = AgentDocument::from_yaml(delegation_yaml()).unwrap();

    let delegate = |id: &str| {
        tool_call(
            id,
            "task",
            serde_json::json!({"subagent": "sqli_specialist", "task": "probe the login form"}),
        )
    };
    let gateway = ScriptedGateway::new(vec![
        (
            "MAIN_AGENT",
            vec![
                // Two concurrent delegations to the same name in one turn.
                Step::respond(calls(vec![delegate("call_0"), delegate("call_1")])),
                Step::respond(calls(vec![submit_call("call_2", "flag{busy}")])),
            ],
        ),
        (
            "SQLI_AGENT",
            vec![Step::respond_after(
                Duration::from_millis(300),
                calls(vec![submit_call("call_0", "flag{child}")]),
            )],
        ),
    ]);

    let (_dir, logger) = logger();
    let dispatcher = Dispatcher::new(
        &document,
        Arc::new(ToolRegistry::new()),
        Arc::new(gateway),
        endpoints(),
        logger,
    )
    .unwrap();

    let result = dispatcher.run_main("assess").await;
    assert!(result.is_completed());

    let outcomes: Vec<_> = result
        .context()
        .tool_call_records()
        .filter(|record| record.tool_name == "task")
        .map(|record| record.outcome.clone())
        .collect();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes.iter().filter(|o| o.is_success()).count(), 1);
    let rejected = outcomes.iter().find(|o| !o.is_success()).unwrap();
    assert!(rejected.as_text().contains("active delegation"));
}

#[tokio::test]
async fn test_distinct_name_delegations_run_concurrently() {
    let document = AgentDocument::from_yaml(delegation_yaml()).unwrap();

    let gateway = ScriptedGateway::new(vec![
        (
            "MAIN_AGENT",
            vec![
                Step::respond(calls(vec![
                    tool_call(
                        "call_0",
                        "task",
                        serde_json::json!({"subagent": "sqli_specialist", "task": "probe login"}),
                    ),
                    tool_call(
                        "call_1",
                        "task",
                        serde_json::json!({"subagent": "xss_specialist", "task": "probe search"}),
                    ),
                ])),
                Step::respond(calls(vec![submit_call("call_2", "flag{parent}")])),
            ],
        ),
        (
            "SQLI_AGENT",
            vec![Step::respond_after(
                Duration::from_millis(200),
                calls(vec![submit_call("call_0", "flag{sqli}")]),
            )],
        ),
        (
            "XSS_AGENT",
            vec![Step::respond_after(
                Duration::from_millis(200),
                calls(vec![submit_call("call_0", "flag{xss}")]),
            )],
        ),
    ]);

    let (_dir, logger) = logger();
    let dispatcher = Dispatcher::new(
        &document,
        Arc::new(ToolRegistry::new()),
        Arc::new(gateway),
        endpoints(),
        logger,
    )
    .unwrap();

    let result = dispatcher.run_main("assess").await;
    assert!(result.is_completed());

    let delegations: Vec<_> = result
        .context()
        .tool_call_records()
        .filter(|record| record.tool_name == "task")
        .collect();
    assert_eq!(delegations.len(), 2);
    assert!(delegations.iter().all(|record| record.outcome.is_success()));

    // Main run plus both children are archived.
    let reports = dispatcher.run_reports();
    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(|report| report.result.is_completed()));
}

#[tokio::test]
async fn test_adopt_verbatim_delegation_completes_parent() {
    let document = AgentDocument::from_yaml(
        r#"
agent:
  name: main
  system_prompt: "MAIN_AGENT: orchestrate"
subagents:
  - name: closer
    description: "Finishes the assessment"
    system_prompt: "CLOSER_AGENT: finish the job"
    delegation_policy: adopt_verbatim
"#,
    )
    .unwrap();

    let gateway = ScriptedGateway::new(vec![
        (
            "MAIN_AGENT",
            vec![Step::respond(calls(vec![tool_call(
                "call_0",
                "task",
                serde_json::json!({"subagent": "closer", "task": "wrap up"}),
            )]))],
        ),
        (
            "CLOSER_AGENT",
            vec![Step::respond(calls(vec![submit_call(
                "call_0",
                "flag{adopted}",
            )]))],
        ),
    ]);

    let (_dir, logger) = logger();
    let dispatcher = Dispatcher::new(
        &document,
        Arc::new(ToolRegistry::new()),
        Arc::new(gateway),
        endpoints(),
        logger,
    )
    .unwrap();

    let result = dispatcher.run_main("assess").await;
    let RunResult::Completed { output, .. } = &result else {
        panic!("expected completion, got {}", result.state());
    };
    assert!(output.contains("flag{adopted}"));
}

#[tokio::test]
async fn test_cancellation_propagates_to_child_delegation() {
    let document = AgentDocument::from_yaml(
        r#"
agent:
  name: main
  system_prompt: "MAIN_AGENT: orchestrate"
subagents:
  - name: slow
    description: "Slow specialist"
    system_prompt: "SLOW_AGENT: take your time"
"#,
    )
    .unwrap();

    let gateway = ScriptedGateway::new(vec![
        (
            "MAIN_AGENT",
            vec![Step::respond(calls(vec![tool_call(
                "call_0",
                "task",
                serde_json::json!({"subagent": "slow", "task": "long probe"}),
            )]))],
        ),
        (
            "SLOW_AGENT",
            vec![Step::respond_after(
                Duration::from_secs(30),
                calls(vec![submit_call("call_0", "flag{never}")]),
            )],
        ),
    ]);

    let (_dir, logger) = logger();
    let dispatcher = Arc::new(
        Dispatcher::new(
            &document,
            Arc::new(ToolRegistry::new()),
            Arc::new(gateway),
            endpoints(),
            logger,
        )
        .unwrap(),
    );

    let cancel = CancellationToken::new();
    let run = {
        let dispatcher = dispatcher.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { dispatcher.run_main_with_cancellation("assess", cancel).await })
    };

    // Let the delegation start, then cancel the parent.
    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel.cancel();

    let result = run.await.unwrap();
    assert!(matches!(result, RunResult::Cancelled { .. }));
    assert!(!result.context().is_empty(), "partial context is retained");

    // The child archives its own cancelled report shortly after.
    let mut child_reported = false;
    for _ in 0..50 {
        let reports = dispatcher.run_reports();
        if reports.iter().any(|report| {
            report.agent_name == "slow"
                && matches!(report.result, RunResult::Cancelled { .. })
                && !report.result.context().is_empty()
        }) {
            child_reported = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(child_reported, "cancelled child must still be archived");
}

#[tokio::test]
async fn test_notes_guidance_survives_fallback_link() {
    // The notes middleware is declared after the fallback link, matching the
    // documented configuration order; its prompt guidance must still reach
    // the model.
    let document = AgentDocument::from_yaml(
        r#"
agent:
  name: main
  system_prompt: "MAIN_AGENT: base"
  middleware:
    - type: model_fallback
      backup_retries: 1
    - type: important_notes
"#,
    )
    .unwrap();

    let gateway = Arc::new(PromptCaptureGateway {
        prompts: Mutex::new(Vec::new()),
    });
    let (_dir, logger) = logger();
    let dispatcher = Dispatcher::new(
        &document,
        Arc::new(ToolRegistry::new()),
        gateway.clone(),
        endpoints(),
        logger,
    )
    .unwrap();

    let result = dispatcher.run_main("assess").await;
    assert!(result.is_completed());

    let prompts = gateway.prompts.lock().unwrap();
    assert!(!prompts.is_empty());
    assert!(
        prompts[0].contains("write_important_notes"),
        "notes guidance missing; prompt seen: {:?}",
        prompts[0]
    );
}

#[tokio::test]
async fn test_duplicate_submit_is_recorded_without_sequence_gaps() {
    let document = AgentDocument::from_yaml(
        r#"
agent:
  name: main
  system_prompt: "MAIN_AGENT: submit twice"
"#,
    )
    .unwrap();

    let gateway = ScriptedGateway::new(vec![(
        "MAIN_AGENT",
        vec![
            // A malformed submission plus a duplicate in the same turn.
            Step::respond(calls(vec![
                tool_call(
                    "call_0",
                    "submit",
                    serde_json::json!({"write_up_content": "missing flag"}),
                ),
                submit_call("call_1", "flag{second}"),
            ])),
            Step::respond(calls(vec![submit_call("call_2", "flag{final}")])),
        ],
    )]);

    let (_dir, logger) = logger();
    let dispatcher = Dispatcher::new(
        &document,
        Arc::new(ToolRegistry::new()),
        Arc::new(gateway),
        endpoints(),
        logger,
    )
    .unwrap();

    let result = dispatcher.run_main("assess").await;
    let RunResult::Completed { output, context } = &result else {
        panic!("expected completion, got {}", result.state());
    };
    assert!(output.contains("flag{final}"));

    // Both first-turn submit calls are recorded and no index is dropped.
    let sequences: Vec<u64> = context.tool_call_records().map(|r| r.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2]);

    let duplicate = context
        .tool_call_records()
        .find(|record| record.sequence == 1)
        .unwrap();
    assert!(!duplicate.outcome.is_success());
    assert!(duplicate.outcome.as_text().contains("duplicate submit"));
}

#[tokio::test]
async fn test_unknown_tool_reference_fails_startup() {
    let document = AgentDocument::from_yaml(
        r#"
agent:
  name: main
  system_prompt: "MAIN_AGENT: misconfigured"
  tools: ["nmap"]
"#,
    )
    .unwrap();

    let (_dir, logger) = logger();
    let error = Dispatcher::new(
        &document,
        Arc::new(ToolRegistry::new()),
        Arc::new(ScriptedGateway::new(vec![])),
        endpoints(),
        logger,
    )
    .err()
    .expect("startup must fail");
    assert!(error.to_string().contains("unknown tool 'nmap'"));
}

#[tokio::test]
async fn test_unknown_subagent_delegation_is_recorded_and_run_continues() {
    let document = AgentDocument::from_yaml(delegation_yaml()).unwrap();

    let gateway = ScriptedGateway::new(vec![(
        "MAIN_AGENT",
        vec![
            Step::respond(calls(vec![tool_call(
                "call_0",
                "task",
                serde_json::json!({"subagent": "nonexistent", "task": "anything"}),
            )])),
            Step::respond(calls(vec![submit_call("call_1", "flag{recovered}")])),
        ],
    )]);

    let (_dir, logger) = logger();
    let dispatcher = Dispatcher::new(
        &document,
        Arc::new(ToolRegistry::new()),
        Arc::new(gateway),
        endpoints(),
        logger,
    )
    .unwrap();

    let result = dispatcher.run_main("assess").await;
    assert!(result.is_completed());
    let failed = result
        .context()
        .tool_call_records()
        .find(|record| record.tool_name == "task")
        .unwrap();
    assert!(failed.outcome.as_text().contains("unknown agent"));
}
