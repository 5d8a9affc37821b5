//! `ReasoningLoop`: the LLM-tool state machine (spec §4.9).
//!
//! `INIT -> ROUTING -> EXECUTING_TOOL -> SYNTHESISING -> (COMPLETE | FAILED
//! | SURRENDERED)`, with a self-loop from `SYNTHESISING` back into
//! `ROUTING` when MAIN itself proposes further tool calls. Grounded on the
//! teacher's `AgenticOrchestrator::execute` step loop: a bounded counter, a
//! wall-clock deadline check, an LLM turn, a tool-execution branch, and
//! accumulation of a termination reason.

use std::time::{Duration, Instant};

use codemind_core::{
    CancellationHandle, ChatMessage, Result, ResultContent, Session, ToolCall, ToolDefinition,
    TraceAction, TraceEvent,
};
use codemind_llm::{ChatWithToolsResult, GenerationParams, LLMAdapter};
use std::sync::Arc;
use tracing::{info, warn};

use crate::circuit_breaker::{BreakerVerdict, CircuitBreaker};
use crate::learned_store::LearnedStore;
use crate::tools::ToolExecutor;

const TRUNCATE_LEN: usize = 200;

/// Default step bound, "in the tens" per spec §4.9.
pub const DEFAULT_MAX_STEPS: u32 = 40;

/// Default surrender-phrase set (spec §4.9), kept as injectable
/// configuration rather than hard-coded per the open question on
/// localisation (spec §9).
pub fn default_surrender_phrases() -> Vec<String> {
    vec![
        "i don't know".to_string(),
        "unable to determine".to_string(),
        "no information available".to_string(),
        "i couldn't find".to_string(),
    ]
}

#[derive(Debug, Clone)]
pub struct ReasoningLoopConfig {
    pub max_steps: u32,
    pub deadline: Duration,
    pub surrender_phrases: Vec<String>,
    pub min_answer_bytes: usize,
    pub router_params: GenerationParams,
    pub main_params: GenerationParams,
}

impl Default for ReasoningLoopConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            deadline: Duration::from_secs(120),
            surrender_phrases: default_surrender_phrases(),
            min_answer_bytes: 20,
            router_params: GenerationParams::default(),
            main_params: GenerationParams::default(),
        }
    }
}

/// Terminal result of a `ReasoningLoop::run` call.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopOutcome {
    Complete { answer: String },
    Surrendered { answer: String },
    Failed { cause: String },
}

enum NextAction {
    AskRouter,
    Validate { text: String, calls: Vec<ToolCall> },
}

pub struct ReasoningLoop {
    router_adapter: Arc<dyn LLMAdapter>,
    main_adapter: Arc<dyn LLMAdapter>,
    tool_executor: Arc<ToolExecutor>,
    circuit_breaker: CircuitBreaker,
    tool_definitions: Vec<ToolDefinition>,
    config: ReasoningLoopConfig,
}

impl ReasoningLoop {
    pub fn new(
        router_adapter: Arc<dyn LLMAdapter>,
        main_adapter: Arc<dyn LLMAdapter>,
        tool_executor: Arc<ToolExecutor>,
        tool_definitions: Vec<ToolDefinition>,
        config: ReasoningLoopConfig,
    ) -> Self {
        Self {
            router_adapter,
            main_adapter,
            tool_executor,
            circuit_breaker: CircuitBreaker::default(),
            tool_definitions,
            config,
        }
    }

    pub async fn run(
        &self,
        session: &mut Session,
        user_query: &str,
        cancel: &CancellationHandle,
    ) -> Result<LoopOutcome> {
        let started_at = Instant::now();
        session.append_message(ChatMessage::user(user_query));
        session.record_trace(
            TraceEvent::new(TraceAction::LlmCall)
                .with_result_summary(format!(
                    "messages={} last_user={}",
                    session.history.len(),
                    truncate(user_query)
                )),
        );

        let mut next = NextAction::AskRouter;
        let mut step: u32 = 0;

        loop {
            step += 1;
            if step > self.config.max_steps {
                return Ok(LoopOutcome::Failed { cause: "step bound exceeded".to_string() });
            }
            if started_at.elapsed() > self.config.deadline {
                return Ok(LoopOutcome::Failed { cause: "deadline exceeded".to_string() });
            }
            if cancel.is_cancelled() {
                return Ok(LoopOutcome::Failed { cause: "cancelled".to_string() });
            }

            // ROUTING
            let (text, proposed) = match next {
                NextAction::AskRouter => {
                    let mut params = self.config.router_params.clone();
                    params.tools = self.tool_definitions.clone();
                    let result = self
                        .router_adapter
                        .chat_with_tools(&session.history, &params, cancel)
                        .await?;
                    (result.text, result.tool_calls)
                }
                NextAction::Validate { text, calls } => (text, calls),
            };

            let mut valid_calls = Vec::new();
            for call in proposed {
                let fingerprint = fingerprint_of(&call);
                if LearnedStore::is_disproven(session, &call.name, &fingerprint) {
                    continue;
                }
                match self.circuit_breaker.check(session, &call.name, &fingerprint) {
                    BreakerVerdict::Allowed => valid_calls.push((call, fingerprint)),
                    verdict => {
                        CircuitBreaker::trace_blocked(session, &call.name, &verdict);
                        LearnedStore::record_failure(session, &call.name, &fingerprint, "circuit_broken");
                    }
                }
            }

            if valid_calls.is_empty() {
                session.append_message(ChatMessage::assistant(text));
            } else {
                session.append_message(ChatMessage::assistant_with_tool_calls(
                    text,
                    valid_calls.iter().map(|(c, _)| c.clone()).collect(),
                ));
                for (call, fingerprint) in &valid_calls {
                    session.bump_invocation_count(&call.name);
                    session.record_fingerprint(&call.name, fingerprint.clone());
                    self.execute_tool(session, call, fingerprint).await?;
                    if cancel.is_cancelled() {
                        return Ok(LoopOutcome::Failed { cause: "cancelled".to_string() });
                    }
                }
            }

            // SYNTHESISING
            let mut main_params = self.config.main_params.clone();
            main_params.tools = self.tool_definitions.clone();
            let synth: ChatWithToolsResult =
                self.main_adapter.chat_with_tools(&session.history, &main_params, cancel).await?;

            if synth.has_tool_calls() {
                next = NextAction::Validate { text: synth.text, calls: synth.tool_calls };
                continue;
            }

            session.append_message(ChatMessage::assistant(synth.text.clone()));
            return Ok(self.apply_surrender_detector(synth.text));
        }
    }

    async fn execute_tool(
        &self,
        session: &mut Session,
        call: &ToolCall,
        fingerprint: &str,
    ) -> Result<()> {
        let start = Instant::now();
        let outcome = self.tool_executor.execute(call).await;
        let duration = start.elapsed();

        match outcome {
            Ok(value) => {
                let summary = truncate(&value.to_string());
                session.append_message(ChatMessage::tool_result(
                    call.id.clone(),
                    call.name.clone(),
                    ResultContent::Structured(value).as_display_text(),
                ));
                session.record_trace(
                    TraceEvent::new(TraceAction::ToolCall)
                        .with_tool(&call.name)
                        .with_result_summary(format!(
                            "fingerprint={fingerprint} duration_ms={} result={summary}",
                            duration.as_millis()
                        )),
                );
                info!(tool = %call.name, duration_ms = duration.as_millis(), "tool call succeeded");
            }
            Err(err) => {
                let message = err.to_string();
                if err.is_recoverable() {
                    LearnedStore::record_failure(session, &call.name, fingerprint, "tool_error");
                    warn!(tool = %call.name, error = %message, "recoverable tool error, recorded learned clause");
                } else {
                    return Err(err);
                }
                session.append_message(ChatMessage::tool_result(
                    call.id.clone(),
                    call.name.clone(),
                    format!("error: {message}"),
                ));
                session.record_trace(
                    TraceEvent::new(TraceAction::ToolCall)
                        .with_tool(&call.name)
                        .with_error(message),
                );
            }
        }
        Ok(())
    }

    fn apply_surrender_detector(&self, answer: String) -> LoopOutcome {
        let trimmed = answer.trim();
        let too_short = trimmed.len() < self.config.min_answer_bytes;
        let matches_phrase = self
            .config
            .surrender_phrases
            .iter()
            .any(|phrase| trimmed.to_lowercase().contains(&phrase.to_lowercase()));
        if too_short || matches_phrase {
            LoopOutcome::Surrendered { answer }
        } else {
            LoopOutcome::Complete { answer }
        }
    }
}

fn fingerprint_of(call: &ToolCall) -> String {
    call.arguments.to_string()
}

fn truncate(s: &str) -> String {
    if s.len() <= TRUNCATE_LEN {
        s.to_string()
    } else {
        format!("{}...", &s[..TRUNCATE_LEN])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use codemind_core::ToolCall as CoreToolCall;
    use codemind_index::SymbolIndex;
    use codemind_llm::{ProviderCharacteristics, StopReason};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct ScriptedAdapter {
        responses: parking_lot::Mutex<Vec<ChatWithToolsResult>>,
    }

    impl ScriptedAdapter {
        fn new(responses: Vec<ChatWithToolsResult>) -> Self {
            Self { responses: parking_lot::Mutex::new(responses) }
        }
    }

    #[async_trait]
    impl LLMAdapter for ScriptedAdapter {
        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _params: &GenerationParams,
            _cancel: &CancellationHandle,
        ) -> Result<String> {
            Ok(String::new())
        }

        async fn chat_with_tools(
            &self,
            _messages: &[ChatMessage],
            _params: &GenerationParams,
            _cancel: &CancellationHandle,
        ) -> Result<ChatWithToolsResult> {
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                Ok(ChatWithToolsResult { text: "i don't know".to_string(), tool_calls: vec![], stop_reason: StopReason::End })
            } else {
                Ok(responses.remove(0))
            }
        }

        fn provider_name(&self) -> &str {
            "scripted"
        }

        fn model_name(&self) -> &str {
            "scripted-model"
        }

        fn characteristics(&self) -> ProviderCharacteristics {
            ProviderCharacteristics {
                max_tokens: 4096,
                avg_latency_ms: 1,
                rpm_limit: None,
                tpm_limit: None,
                supports_streaming: false,
                supports_functions: true,
            }
        }
    }

    fn empty_index() -> Arc<SymbolIndex> {
        Arc::new(SymbolIndex::new(1000))
    }

    #[tokio::test]
    async fn completes_when_main_returns_a_real_answer_with_no_tool_calls() {
        let router = Arc::new(ScriptedAdapter::new(vec![ChatWithToolsResult {
            text: String::new(),
            tool_calls: vec![],
            stop_reason: StopReason::End,
        }]));
        let main = Arc::new(ScriptedAdapter::new(vec![ChatWithToolsResult {
            text: "The answer involves three call sites across two files.".to_string(),
            tool_calls: vec![],
            stop_reason: StopReason::End,
        }]));
        let executor = Arc::new(ToolExecutor::new(empty_index()));
        let loop_ = ReasoningLoop::new(
            router,
            main,
            executor,
            vec![],
            ReasoningLoopConfig::default(),
        );
        let mut session = Session::new("s1".to_string());
        let cancel = CancellationHandle::new();
        let outcome = loop_.run(&mut session, "where is Foo called?", &cancel).await.unwrap();
        assert!(matches!(outcome, LoopOutcome::Complete { .. }));
    }

    #[tokio::test]
    async fn surrenders_on_short_answer() {
        let router = Arc::new(ScriptedAdapter::new(vec![ChatWithToolsResult {
            text: String::new(),
            tool_calls: vec![],
            stop_reason: StopReason::End,
        }]));
        let main = Arc::new(ScriptedAdapter::new(vec![ChatWithToolsResult {
            text: "no".to_string(),
            tool_calls: vec![],
            stop_reason: StopReason::End,
        }]));
        let executor = Arc::new(ToolExecutor::new(empty_index()));
        let loop_ = ReasoningLoop::new(
            router,
            main,
            executor,
            vec![],
            ReasoningLoopConfig::default(),
        );
        let mut session = Session::new("s1".to_string());
        let cancel = CancellationHandle::new();
        let outcome = loop_.run(&mut session, "where is Foo called?", &cancel).await.unwrap();
        assert!(matches!(outcome, LoopOutcome::Surrendered { .. }));
    }

    #[tokio::test]
    async fn surrenders_on_configured_phrase() {
        let router = Arc::new(ScriptedAdapter::new(vec![ChatWithToolsResult {
            text: String::new(),
            tool_calls: vec![],
            stop_reason: StopReason::End,
        }]));
        let main = Arc::new(ScriptedAdapter::new(vec![ChatWithToolsResult {
            text: "I'm afraid I couldn't find anything relevant in the index.".to_string(),
            tool_calls: vec![],
            stop_reason: StopReason::End,
        }]));
        let executor = Arc::new(ToolExecutor::new(empty_index()));
        let loop_ = ReasoningLoop::new(
            router,
            main,
            executor,
            vec![],
            ReasoningLoopConfig::default(),
        );
        let mut session = Session::new("s1".to_string());
        let cancel = CancellationHandle::new();
        let outcome = loop_.run(&mut session, "where is Foo called?", &cancel).await.unwrap();
        assert!(matches!(outcome, LoopOutcome::Surrendered { .. }));
    }

    #[tokio::test]
    async fn step_bound_fails_the_loop_when_main_keeps_requesting_tools() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);

        #[derive(Debug)]
        struct InfiniteToolAdapter;

        #[async_trait]
        impl LLMAdapter for InfiniteToolAdapter {
            async fn chat(
                &self,
                _messages: &[ChatMessage],
                _params: &GenerationParams,
                _cancel: &CancellationHandle,
            ) -> Result<String> {
                Ok(String::new())
            }

            async fn chat_with_tools(
                &self,
                _messages: &[ChatMessage],
                _params: &GenerationParams,
                _cancel: &CancellationHandle,
            ) -> Result<ChatWithToolsResult> {
                let n = CALLS.fetch_add(1, Ordering::SeqCst);
                Ok(ChatWithToolsResult {
                    text: String::new(),
                    tool_calls: vec![CoreToolCall {
                        id: format!("call-{n}"),
                        name: "find-symbol".to_string(),
                        arguments: json!({ "name": format!("Thing{n}") }),
                    }],
                    stop_reason: StopReason::ToolUse,
                })
            }

            fn provider_name(&self) -> &str {
                "infinite"
            }

            fn model_name(&self) -> &str {
                "infinite-model"
            }

            fn characteristics(&self) -> ProviderCharacteristics {
                ProviderCharacteristics {
                    max_tokens: 4096,
                    avg_latency_ms: 1,
                    rpm_limit: None,
                    tpm_limit: None,
                    supports_streaming: false,
                    supports_functions: true,
                }
            }
        }

        let router = Arc::new(InfiniteToolAdapter);
        let main = Arc::new(InfiniteToolAdapter);
        let executor = Arc::new(ToolExecutor::new(empty_index()));
        let mut config = ReasoningLoopConfig::default();
        config.max_steps = 3;
        let loop_ = ReasoningLoop::new(router, main, executor, vec![], config);
        let mut session = Session::new("s1".to_string());
        let cancel = CancellationHandle::new();
        let outcome = loop_.run(&mut session, "query", &cancel).await.unwrap();
        assert_eq!(outcome, LoopOutcome::Failed { cause: "step bound exceeded".to_string() });
    }

    #[tokio::test]
    async fn repeated_identical_tool_call_is_blocked_by_circuit_breaker_and_learned() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);

        #[derive(Debug)]
        struct RepeatingAdapter;

        #[async_trait]
        impl LLMAdapter for RepeatingAdapter {
            async fn chat(
                &self,
                _messages: &[ChatMessage],
                _params: &GenerationParams,
                _cancel: &CancellationHandle,
            ) -> Result<String> {
                Ok(String::new())
            }

            async fn chat_with_tools(
                &self,
                _messages: &[ChatMessage],
                _params: &GenerationParams,
                _cancel: &CancellationHandle,
            ) -> Result<ChatWithToolsResult> {
                let n = CALLS.fetch_add(1, Ordering::SeqCst);
                if n < 3 {
                    Ok(ChatWithToolsResult {
                        text: String::new(),
                        tool_calls: vec![CoreToolCall {
                            id: format!("call-{n}"),
                            name: "find-hotspots".to_string(),
                            arguments: json!({}),
                        }],
                        stop_reason: StopReason::ToolUse,
                    })
                } else {
                    Ok(ChatWithToolsResult {
                        text: "Process appears three times across the index.".to_string(),
                        tool_calls: vec![],
                        stop_reason: StopReason::End,
                    })
                }
            }

            fn provider_name(&self) -> &str {
                "repeating"
            }

            fn model_name(&self) -> &str {
                "repeating-model"
            }

            fn characteristics(&self) -> ProviderCharacteristics {
                ProviderCharacteristics {
                    max_tokens: 4096,
                    avg_latency_ms: 1,
                    rpm_limit: None,
                    tpm_limit: None,
                    supports_streaming: false,
                    supports_functions: true,
                }
            }
        }

        let router = Arc::new(RepeatingAdapter);
        let main = Arc::new(RepeatingAdapter);
        let executor = Arc::new(ToolExecutor::new(empty_index()));
        let loop_ = ReasoningLoop::new(router, main, executor, vec![], ReasoningLoopConfig::default());
        let mut session = Session::new("s1".to_string());
        let cancel = CancellationHandle::new();
        let outcome = loop_.run(&mut session, "find Process", &cancel).await.unwrap();
        assert!(matches!(outcome, LoopOutcome::Complete { .. }));
        assert!(session
            .trace
            .iter()
            .any(|e| matches!(e.action, TraceAction::CircuitBreaker)));
        assert!(session.has_clause_for("find-hotspots", &serde_json::json!({}).to_string()));
    }
}
