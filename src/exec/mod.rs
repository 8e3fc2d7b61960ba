// Execution dispatcher: one "run this code" entry point for both the local
// interpreter and model-simulated execution.

pub(crate) mod capture;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::instrument;

use crate::errors::{CodeboxError, CodeboxErrorType, Result};
use crate::fsystem::Language;
use crate::provider::{CompletionOptions, CompletionProvider};
use crate::script::{run_script, Limits};

pub(crate) const GENERAL_MODEL: &str = "llama3";
pub(crate) const CODE_MODEL: &str = "codellama";
const ASSISTED_TEMPERATURE: f64 = 0.1;
// Deep script recursion must reach the call-depth limit before the native stack runs out
const WORKER_STACK_SIZE: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ExecutionMode {
    Local,
    Assisted,
}

impl ExecutionMode {
    pub(crate) fn from_ollama_flag(use_ollama: bool) -> ExecutionMode {
        if use_ollama {
            ExecutionMode::Assisted
        } else {
            ExecutionMode::Local
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ExecutionResult {
    pub(crate) output: String,
    pub(crate) success: bool,
}

impl ExecutionResult {
    pub(crate) fn succeeded(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: true,
        }
    }

    pub(crate) fn failed(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: false,
        }
    }
}

pub(crate) fn model_for_language(language: Language) -> &'static str {
    match language {
        Language::Javascript => GENERAL_MODEL,
        _ => CODE_MODEL,
    }
}

fn assisted_prompt(code: &str, language: Language) -> String {
    format!(
        "Run the following {language} code and give the result. If the code cannot be run, explain the error:\n\n\
         ```{language}\n{code}\n```\n\n\
         Only return the execution output and/or error messages. Do not add any extra explanation."
    )
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ExecutorConfig {
    /// Pause before a local run resolves, so the UI can show its busy state.
    pub(crate) local_delay: Duration,
    pub(crate) limits: Limits,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            local_delay: Duration::from_millis(500),
            limits: Limits::default(),
        }
    }
}

pub(crate) struct ExecutionDispatcher {
    provider: Arc<dyn CompletionProvider>,
    config: ExecutorConfig,
}

impl ExecutionDispatcher {
    pub(crate) fn new(provider: Arc<dyn CompletionProvider>, config: ExecutorConfig) -> Self {
        Self { provider, config }
    }

    /// Never fails: every fault ends up in the returned result.
    #[instrument(skip(self, code), fields(code_len = code.len()))]
    pub(crate) async fn execute(
        &self,
        code: &str,
        language: Language,
        mode: ExecutionMode,
    ) -> ExecutionResult {
        if code.trim().is_empty() {
            return ExecutionResult::failed("");
        }
        let result = match mode {
            ExecutionMode::Assisted => self.execute_assisted(code, language).await,
            ExecutionMode::Local => self.execute_local(code, language).await,
        };
        tracing::info!("Execution finished, success = {}", result.success);
        result
    }

    async fn execute_assisted(&self, code: &str, language: Language) -> ExecutionResult {
        let model = model_for_language(language);
        let options = CompletionOptions::with_temperature(ASSISTED_TEMPERATURE);
        let prompt = assisted_prompt(code, language);
        match self.provider.complete(&prompt, model, Some(&options)).await {
            Ok(text) => ExecutionResult::succeeded(text),
            Err(e) => {
                tracing::error!("Assisted execution failed: {}", e);
                ExecutionResult::failed(format!("Error: {}", e.message))
            }
        }
    }

    async fn execute_local(&self, code: &str, language: Language) -> ExecutionResult {
        match self.try_execute_local(code, language).await {
            Ok(output) => ExecutionResult::succeeded(output),
            Err(e) => {
                tracing::debug!("Local execution failed: {}", e);
                ExecutionResult::failed(e.message)
            }
        }
    }

    async fn try_execute_local(&self, code: &str, language: Language) -> Result<String> {
        if !language.is_locally_executable() {
            return Err(CodeboxError::new(
                CodeboxErrorType::UnsupportedLanguage,
                format!(
                    "{} code cannot be run locally. Enable Ollama mode to run it.",
                    language
                ),
            ));
        }
        if !self.config.local_delay.is_zero() {
            tokio::time::sleep(self.config.local_delay).await;
        }
        run_local(code.to_string(), self.config.limits).await
    }
}

fn evaluate(code: &str, limits: Limits) -> Result<String> {
    let (outcome, capture) = capture::with_capture(|sink| run_script(code, sink, limits));
    let value = outcome.map_err(|fault| {
        CodeboxError::new(CodeboxErrorType::EvaluationFault, fault.to_string())
    })?;
    if capture.is_empty() {
        Ok(value)
    } else {
        Ok(capture.into_output())
    }
}

fn worker_failure(reason: &str) -> CodeboxError {
    CodeboxError::new(
        CodeboxErrorType::InternalError,
        format!("Error: script worker {}", reason),
    )
}

/// Evaluates on a dedicated thread and waits for it without blocking the runtime.
async fn run_local(code: String, limits: Limits) -> Result<String> {
    let (sender, receiver) = oneshot::channel();
    std::thread::Builder::new()
        .name("script-worker".to_string())
        .stack_size(WORKER_STACK_SIZE)
        .spawn(move || {
            let result = evaluate(&code, limits);
            // the receiver is gone only if the request was dropped
            let _ = sender.send(result);
        })
        .map_err(|e| worker_failure(&format!("could not start: {}", e)))?;
    receiver
        .await
        .map_err(|_| worker_failure("stopped unexpectedly"))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::tests::ScriptedProvider;
    use std::time::Instant;

    fn dispatcher(provider: Arc<ScriptedProvider>) -> ExecutionDispatcher {
        ExecutionDispatcher::new(
            provider,
            ExecutorConfig {
                local_delay: Duration::ZERO,
                limits: Limits::default(),
            },
        )
    }

    fn local() -> ExecutionDispatcher {
        dispatcher(Arc::new(ScriptedProvider::replying("unused")))
    }

    #[tokio::test]
    async fn empty_code_short_circuits() {
        let provider = Arc::new(ScriptedProvider::replying("never"));
        let dispatcher = dispatcher(provider.clone());
        for mode in [ExecutionMode::Local, ExecutionMode::Assisted] {
            let result = dispatcher.execute("  \n\t", Language::Javascript, mode).await;
            assert_eq!(result, ExecutionResult::failed(""));
        }
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn local_logs_are_joined() {
        let result = local()
            .execute(
                "console.log('a'); console.log('b');",
                Language::Javascript,
                ExecutionMode::Local,
            )
            .await;
        assert_eq!(result, ExecutionResult::succeeded("a\nb"));
    }

    #[tokio::test]
    async fn local_completion_value_without_logs() {
        let result = local().execute("1/0", Language::Javascript, ExecutionMode::Local).await;
        assert_eq!(result, ExecutionResult::succeeded("Infinity"));
        let result = local().execute("let x;", Language::Javascript, ExecutionMode::Local).await;
        assert_eq!(result, ExecutionResult::succeeded(""));
    }

    #[tokio::test]
    async fn local_faults_become_failed_results() {
        let dispatcher = local();
        let result = dispatcher
            .execute("throw new Error('x')", Language::Javascript, ExecutionMode::Local)
            .await;
        assert_eq!(result, ExecutionResult::failed("Error: x"));
        let result = dispatcher
            .execute("throw 42", Language::Javascript, ExecutionMode::Local)
            .await;
        assert_eq!(result, ExecutionResult::failed("Unknown error occurred"));
        let result = dispatcher
            .execute("function f() { return f(); } f()", Language::Javascript, ExecutionMode::Local)
            .await;
        assert_eq!(result, ExecutionResult::failed("Error: Maximum call stack size exceeded"));
    }

    #[tokio::test]
    async fn oversized_scripts_fail_without_taking_the_worker_down() {
        let dispatcher = local();
        let result = dispatcher
            .execute("'a'.repeat(2 ** 50).length", Language::Javascript, ExecutionMode::Local)
            .await;
        assert_eq!(result, ExecutionResult::failed("Error: Invalid string length"));

        let nested = format!("{}1{}", "(".repeat(40_000), ")".repeat(40_000));
        let result = dispatcher
            .execute(&nested, Language::Javascript, ExecutionMode::Local)
            .await;
        assert!(!result.success);
        assert!(result.output.starts_with("Error: Expression too deeply nested"), "{}", result.output);

        let result = dispatcher
            .execute("6 * 7", Language::Javascript, ExecutionMode::Local)
            .await;
        assert_eq!(result, ExecutionResult::succeeded("42"));
    }

    #[test]
    fn worker_failures_carry_the_error_prefix() {
        let err = worker_failure("could not start: Resource temporarily unavailable");
        assert_eq!(err.error_type, CodeboxErrorType::InternalError);
        assert_eq!(
            err.message,
            "Error: script worker could not start: Resource temporarily unavailable"
        );
        assert!(worker_failure("stopped unexpectedly").message.starts_with("Error: "));
    }

    #[tokio::test]
    async fn local_requires_javascript() {
        let provider = Arc::new(ScriptedProvider::replying("never"));
        let result = dispatcher(provider.clone())
            .execute("body { color: red; }", Language::Css, ExecutionMode::Local)
            .await;
        assert!(!result.success);
        assert!(result.output.contains("Ollama mode"));
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn assisted_uses_language_model_tiers() {
        let provider = Arc::new(ScriptedProvider::replying("42\n"));
        let dispatcher = dispatcher(provider.clone());
        let result = dispatcher
            .execute("console.log(42)", Language::Javascript, ExecutionMode::Assisted)
            .await;
        assert_eq!(result, ExecutionResult::succeeded("42\n"));
        dispatcher
            .execute("let x: number = 1", Language::Typescript, ExecutionMode::Assisted)
            .await;

        let calls = provider.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].model, GENERAL_MODEL);
        assert_eq!(calls[1].model, CODE_MODEL);
        assert!(calls[0].prompt.contains("```javascript\nconsole.log(42)\n```"));
        assert_eq!(calls[0].options, Some(CompletionOptions::with_temperature(0.1)));
    }

    #[tokio::test]
    async fn assisted_provider_fault_is_absorbed() {
        let provider = Arc::new(ScriptedProvider::failing(CodeboxError::new(
            CodeboxErrorType::ProviderUnreachable,
            "connection refused".to_string(),
        )));
        let result = dispatcher(provider)
            .execute("1 + 1", Language::Javascript, ExecutionMode::Assisted)
            .await;
        assert_eq!(result, ExecutionResult::failed("Error: connection refused"));
    }

    #[tokio::test]
    async fn concurrent_runs_do_not_share_output() {
        let dispatcher = local();
        let (first, second) = tokio::join!(
            dispatcher.execute(
                "for (let i = 0; i < 3; i++) console.log('first', i)",
                Language::Javascript,
                ExecutionMode::Local
            ),
            dispatcher.execute("console.log('second')", Language::Javascript, ExecutionMode::Local),
        );
        assert_eq!(first.output, "first 0\nfirst 1\nfirst 2");
        assert_eq!(second.output, "second");
    }

    #[tokio::test]
    async fn local_delay_is_applied() {
        let dispatcher = ExecutionDispatcher::new(
            Arc::new(ScriptedProvider::replying("unused")),
            ExecutorConfig {
                local_delay: Duration::from_millis(50),
                limits: Limits::default(),
            },
        );
        let started = Instant::now();
        dispatcher.execute("1", Language::Javascript, ExecutionMode::Local).await;
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn mode_follows_ollama_flag() {
        assert_eq!(ExecutionMode::from_ollama_flag(true), ExecutionMode::Assisted);
        assert_eq!(ExecutionMode::from_ollama_flag(false), ExecutionMode::Local);
        assert_eq!(serde_json::to_string(&ExecutionMode::Assisted).unwrap(), "\"assisted\"");
    }
}
