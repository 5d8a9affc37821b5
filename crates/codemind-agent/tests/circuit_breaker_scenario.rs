use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use codemind_agent::{LoopOutcome, ReasoningLoop, ReasoningLoopConfig};
use codemind_core::{
    CancellationHandle, ChatMessage, Result, Session, Symbol, SymbolKind, ToolCall, TraceAction,
};
use codemind_index::SymbolIndex;
use codemind_llm::{ChatWithToolsResult, GenerationParams, LLMAdapter, ProviderCharacteristics, StopReason};
use serde_json::json;

fn populated_index() -> Arc<SymbolIndex> {
    let index = SymbolIndex::new(1000);
    let caller = Symbol {
        id: Symbol::make_id("src/main.rs", 10, "main"),
        name: "main".to_string(),
        kind: SymbolKind::Function,
        file: "src/main.rs".to_string(),
        start_line: 10,
        end_line: 20,
        exported: true,
        doc: None,
        signature: None,
        metadata: None,
        call_sites: vec![],
        type_refs: vec![],
    };
    let callee = Symbol {
        id: Symbol::make_id("src/lib.rs", 1, "find_callers_target"),
        name: "find_callers_target".to_string(),
        kind: SymbolKind::Function,
        file: "src/lib.rs".to_string(),
        start_line: 1,
        end_line: 5,
        exported: true,
        doc: None,
        signature: None,
        metadata: None,
        call_sites: vec![],
        type_refs: vec![],
    };
    index.add(caller).unwrap();
    index.add(callee).unwrap();
    Arc::new(index)
}

/// Asks for `find-callers` on the same symbol id three times, in sequence.
/// The third proposal must be blocked by the circuit breaker before the
/// tool executor is ever invoked a third time, and a `circuit_breaker`
/// trace event must record it.
#[derive(Debug)]
struct ThreeStrikesRouter {
    calls: AtomicUsize,
    target_id: String,
}

#[async_trait]
impl LLMAdapter for ThreeStrikesRouter {
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
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < 3 {
            Ok(ChatWithToolsResult {
                text: String::new(),
                tool_calls: vec![ToolCall {
                    id: format!("router-call-{n}"),
                    name: "find-callers".to_string(),
                    arguments: json!({ "symbol_id": self.target_id }),
                }],
                stop_reason: StopReason::ToolUse,
            })
        } else {
            Ok(ChatWithToolsResult { text: String::new(), tool_calls: vec![], stop_reason: StopReason::End })
        }
    }

    fn provider_name(&self) -> &str {
        "three-strikes"
    }

    fn model_name(&self) -> &str {
        "three-strikes-model"
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

/// MAIN keeps re-proposing `find-callers` on its first two synthesising
/// turns (so the router's circuit-breaker state accumulates two real
/// executions), then gives a real final answer on the third.
#[derive(Debug)]
struct TwoMoreRoundsMain {
    calls: AtomicUsize,
    target_id: String,
}

#[async_trait]
impl LLMAdapter for TwoMoreRoundsMain {
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
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < 2 {
            Ok(ChatWithToolsResult {
                text: String::new(),
                tool_calls: vec![ToolCall {
                    id: format!("main-call-{n}"),
                    name: "find-callers".to_string(),
                    arguments: json!({ "symbol_id": self.target_id }),
                }],
                stop_reason: StopReason::ToolUse,
            })
        } else {
            Ok(ChatWithToolsResult {
                text: "find_callers_target is called once, from main.".to_string(),
                tool_calls: vec![],
                stop_reason: StopReason::End,
            })
        }
    }

    fn provider_name(&self) -> &str {
        "final-answer"
    }

    fn model_name(&self) -> &str {
        "final-answer-model"
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

#[tokio::test]
async fn third_identical_find_callers_call_is_circuit_broken_and_learned() {
    let index = populated_index();
    let target_id = Symbol::make_id("src/lib.rs", 1, "find_callers_target");
    let router = Arc::new(ThreeStrikesRouter { calls: AtomicUsize::new(0), target_id: target_id.clone() });
    let main = Arc::new(TwoMoreRoundsMain { calls: AtomicUsize::new(0), target_id: target_id.clone() });
    let executor = Arc::new(codemind_agent::ToolExecutor::new(index));

    let loop_ = ReasoningLoop::new(router, main, executor, vec![], ReasoningLoopConfig::default());
    let mut session = Session::new("scenario-6".to_string());
    let cancel = CancellationHandle::new();

    let outcome = loop_.run(&mut session, "who calls find_callers_target?", &cancel).await.unwrap();
    assert!(matches!(outcome, LoopOutcome::Complete { .. }));

    // find-callers is proposed three times (once by the router, twice more
    // by MAIN's self-loop); only the first two reach the executor, the
    // third is blocked by the count breaker (threshold 2) before dispatch.
    let fingerprint = json!({ "symbol_id": target_id }).to_string();
    assert_eq!(session.invocation_count("find-callers"), 2);
    assert!(session
        .trace
        .iter()
        .any(|e| matches!(e.action, TraceAction::CircuitBreaker)));
    assert!(session.has_clause_for("find-callers", &fingerprint));
}

#[tokio::test]
async fn unknown_tool_proposal_is_recorded_as_a_learned_clause_and_loop_completes() {
    #[derive(Debug)]
    struct BadToolRouter;

    #[async_trait]
    impl LLMAdapter for BadToolRouter {
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
            Ok(ChatWithToolsResult {
                text: String::new(),
                tool_calls: vec![ToolCall {
                    id: "call-1".to_string(),
                    name: "delete-everything".to_string(),
                    arguments: json!({}),
                }],
                stop_reason: StopReason::ToolUse,
            })
        }

        fn provider_name(&self) -> &str {
            "bad-tool"
        }

        fn model_name(&self) -> &str {
            "bad-tool-model"
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

    #[derive(Debug)]
    struct ImmediateAnswerMain;

    #[async_trait]
    impl LLMAdapter for ImmediateAnswerMain {
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
            Ok(ChatWithToolsResult {
                text: "no caller could be verified through the requested tool.".to_string(),
                tool_calls: vec![],
                stop_reason: StopReason::End,
            })
        }

        fn provider_name(&self) -> &str {
            "immediate-answer"
        }

        fn model_name(&self) -> &str {
            "immediate-answer-model"
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

    let index = populated_index();
    let router = Arc::new(BadToolRouter);
    let main = Arc::new(ImmediateAnswerMain);
    let executor = Arc::new(codemind_agent::ToolExecutor::new(index));
    let loop_ = ReasoningLoop::new(router, main, executor, vec![], ReasoningLoopConfig::default());
    let mut session = Session::new("scenario-unknown".to_string());
    let cancel = CancellationHandle::new();

    let outcome = loop_.run(&mut session, "do something destructive", &cancel).await.unwrap();
    assert!(matches!(outcome, LoopOutcome::Complete { .. }));
    assert!(session.has_clause_for("delete-everything", &json!({}).to_string()));
}
