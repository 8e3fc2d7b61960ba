// The single editing session served to the browser: project files, editor
// buffer, settings, assistant history and the execution backends.

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::instrument;

use crate::assistant::{build_prompt, ChatMessage, Conversation, APOLOGY};
use crate::errors::{CodeboxError, CodeboxErrorType, Result};
use crate::exec::{ExecutionDispatcher, ExecutionMode, ExecutionResult, ExecutorConfig};
use crate::fsystem::{BufferLoad, Language, VirtualFileSystem};
use crate::provider::{CompletionProvider, TextStream};
use crate::settings::{Settings, SettingsUpdate, Theme};
use crate::storage::{load_or_log, persist_or_log, SnapshotKey, SnapshotStore};
use crate::templates;

pub(crate) const DEFAULT_CODE: &str = r#"// Write your code here
function greet() {
  return "Hello, world!";
}

console.log(greet());"#;

/// Builds a provider for an Ollama base URL. Called again whenever the URL
/// setting changes.
pub(crate) type ProviderFactory = Arc<dyn Fn(&str) -> Arc<dyn CompletionProvider> + Send + Sync>;

pub(crate) type SharedWorkspace = Arc<Mutex<Workspace>>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct EditorBuffer {
    pub(crate) code: String,
    pub(crate) language: Language,
    pub(crate) output: String,
    pub(crate) processing: bool,
}

impl Default for EditorBuffer {
    fn default() -> Self {
        EditorBuffer {
            code: DEFAULT_CODE.to_string(),
            language: Language::Javascript,
            output: String::new(),
            processing: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct BufferUpdate {
    pub(crate) code: Option<String>,
    pub(crate) language: Option<Language>,
}

pub(crate) struct Workspace {
    files: VirtualFileSystem,
    buffer: EditorBuffer,
    settings: Settings,
    conversation: Conversation,
    store: Arc<dyn SnapshotStore>,
    provider: Arc<dyn CompletionProvider>,
    dispatcher: Arc<ExecutionDispatcher>,
    factory: ProviderFactory,
    executor: ExecutorConfig,
}

pub(crate) fn shared(workspace: Workspace) -> SharedWorkspace {
    Arc::new(Mutex::new(workspace))
}

pub(crate) fn lock(workspace: &SharedWorkspace) -> Result<MutexGuard<'_, Workspace>> {
    workspace.lock().map_err(|e| {
        CodeboxError::new(
            CodeboxErrorType::InternalError,
            format!("Workspace lock poisoned: {}", e),
        )
    })
}

impl Workspace {
    pub(crate) fn new(
        store: Arc<dyn SnapshotStore>,
        default_base_url: &str,
        executor: ExecutorConfig,
        factory: ProviderFactory,
    ) -> Workspace {
        let settings = Settings::load(store.as_ref(), default_base_url);
        let provider = factory(&settings.ollama_base_url);
        let dispatcher = Arc::new(ExecutionDispatcher::new(provider.clone(), executor));
        tracing::info!("Workspace ready, Ollama at {}", settings.ollama_base_url);
        Workspace {
            files: VirtualFileSystem::load(store.clone()),
            buffer: EditorBuffer::default(),
            settings,
            conversation: Conversation::default(),
            store,
            provider,
            dispatcher,
            factory,
            executor,
        }
    }

    pub(crate) fn files(&self) -> &VirtualFileSystem {
        &self.files
    }

    pub(crate) fn files_mut(&mut self) -> &mut VirtualFileSystem {
        &mut self.files
    }

    pub(crate) fn buffer(&self) -> &EditorBuffer {
        &self.buffer
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.settings
    }

    pub(crate) fn history(&self) -> &[ChatMessage] {
        self.conversation.messages()
    }

    fn apply_load(&mut self, load: BufferLoad) {
        tracing::debug!("Loading {} into the editor", load.path);
        self.buffer.code = load.content;
        self.buffer.language = load.language;
    }

    pub(crate) fn select_file(&mut self, path: &str) -> Result<EditorBuffer> {
        let load = self.files.select_file(path)?;
        self.apply_load(load);
        Ok(self.buffer.clone())
    }

    pub(crate) fn close_file(&mut self, path: &str) -> EditorBuffer {
        if let Some(load) = self.files.close_file(path) {
            self.apply_load(load);
        }
        self.buffer.clone()
    }

    pub(crate) fn create_file(&mut self) -> Result<EditorBuffer> {
        let load = self.files.create_file()?;
        self.apply_load(load);
        Ok(self.buffer.clone())
    }

    pub(crate) fn create_folder(&mut self) -> Result<String> {
        self.files.create_folder()
    }

    pub(crate) fn save_file_content(&mut self, path: &str, content: &str) -> Result<()> {
        self.files.save_file_content(path, content)
    }

    /// Writes the buffer back into the active file.
    #[instrument(skip(self))]
    pub(crate) fn save_active_file(&mut self) -> Result<String> {
        let path = self
            .files
            .session()
            .active_file
            .clone()
            .ok_or_else(|| CodeboxError::not_found("No file is open"))?;
        let code = self.buffer.code.clone();
        self.files.save_file_content(&path, &code)?;
        Ok(path)
    }

    pub(crate) fn update_buffer(&mut self, update: BufferUpdate) -> EditorBuffer {
        if let Some(code) = update.code {
            self.buffer.code = code;
        }
        if let Some(language) = update.language {
            self.buffer.language = language;
        }
        self.buffer.clone()
    }

    pub(crate) fn save_code(&self) {
        persist_or_log(self.store.as_ref(), SnapshotKey::Code, &self.buffer.code);
        persist_or_log(
            self.store.as_ref(),
            SnapshotKey::Language,
            self.buffer.language.as_str(),
        );
        tracing::info!("Saved editor code");
    }

    pub(crate) fn load_code(&mut self) -> Result<EditorBuffer> {
        let code = load_or_log(self.store.as_ref(), SnapshotKey::Code)
            .ok_or_else(|| CodeboxError::not_found("No saved code found"))?;
        self.buffer.code = code;
        if let Some(tag) = load_or_log(self.store.as_ref(), SnapshotKey::Language) {
            self.buffer.language = Language::from_tag(&tag);
        }
        Ok(self.buffer.clone())
    }

    pub(crate) fn toggle_theme(&mut self) -> Theme {
        self.settings.theme = self.settings.theme.toggled();
        persist_or_log(
            self.store.as_ref(),
            SnapshotKey::Theme,
            self.settings.theme.as_str(),
        );
        self.settings.theme
    }

    #[instrument(skip(self, update))]
    pub(crate) fn update_settings(&mut self, update: SettingsUpdate) -> Settings {
        if self.settings.apply(update) {
            tracing::info!("Ollama endpoint is now {}", self.settings.ollama_base_url);
            self.provider = (self.factory)(&self.settings.ollama_base_url);
            self.dispatcher = Arc::new(ExecutionDispatcher::new(
                self.provider.clone(),
                self.executor,
            ));
        }
        self.settings.persist(self.store.as_ref());
        self.settings.clone()
    }
}

/// Clears the busy flag when a run ends, however it ends.
struct ProcessingGuard {
    workspace: SharedWorkspace,
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        match self.workspace.lock() {
            Ok(mut workspace) => workspace.buffer.processing = false,
            Err(poisoned) => poisoned.into_inner().buffer.processing = false,
        }
    }
}

/// Runs the buffer. The mode comes from the `useOllama` setting at the time
/// the run starts.
#[instrument(skip(workspace))]
pub(crate) async fn run(workspace: &SharedWorkspace) -> Result<ExecutionResult> {
    let (dispatcher, code, language, mode) = {
        let mut ws = lock(workspace)?;
        if ws.buffer.processing {
            return Err(CodeboxError::new(
                CodeboxErrorType::Busy,
                "A run is already in progress".to_string(),
            ));
        }
        ws.buffer.processing = true;
        ws.buffer.output.clear();
        (
            ws.dispatcher.clone(),
            ws.buffer.code.clone(),
            ws.buffer.language,
            ExecutionMode::from_ollama_flag(ws.settings.use_ollama),
        )
    };
    let _guard = ProcessingGuard {
        workspace: workspace.clone(),
    };
    let result = dispatcher.execute(&code, language, mode).await;
    lock(workspace)?.buffer.output = result.output.clone();
    Ok(result)
}

struct PreparedQuestion {
    provider: Arc<dyn CompletionProvider>,
    model: String,
    prompt: String,
}

fn prepare_question(
    workspace: &SharedWorkspace,
    prompt: &str,
    include_code: bool,
) -> Result<PreparedQuestion> {
    if prompt.trim().is_empty() {
        return Err(CodeboxError::invalid_input("Prompt is empty"));
    }
    let mut ws = lock(workspace)?;
    ws.conversation.record_user(prompt);
    let full_prompt = build_prompt(prompt, &ws.buffer.code, ws.buffer.language, include_code);
    Ok(PreparedQuestion {
        provider: ws.provider.clone(),
        model: ws.settings.selected_model.clone(),
        prompt: full_prompt,
    })
}

fn record_failure(workspace: &SharedWorkspace, error: CodeboxError) -> CodeboxError {
    tracing::error!("Assistant request failed: {}", error);
    if let Ok(mut ws) = lock(workspace) {
        ws.conversation.record_assistant(APOLOGY);
    }
    CodeboxError::new(CodeboxErrorType::ProviderError, error.message)
}

#[instrument(skip(workspace, prompt))]
pub(crate) async fn ask(
    workspace: &SharedWorkspace,
    prompt: &str,
    include_code: bool,
) -> Result<ChatMessage> {
    let question = prepare_question(workspace, prompt, include_code)?;
    match question
        .provider
        .complete(&question.prompt, &question.model, None)
        .await
    {
        Ok(reply) => {
            let mut ws = lock(workspace)?;
            Ok(ws.conversation.record_assistant(&reply).clone())
        }
        Err(e) => Err(record_failure(workspace, e)),
    }
}

/// Like [`ask`], but the reply is streamed. The assembled reply is added to
/// the history once the stream is drained.
#[instrument(skip(workspace, prompt))]
pub(crate) async fn ask_streaming(
    workspace: &SharedWorkspace,
    prompt: &str,
    include_code: bool,
) -> Result<TextStream> {
    let question = prepare_question(workspace, prompt, include_code)?;
    let stream = match question
        .provider
        .complete_streaming(&question.prompt, &question.model, None)
        .await
    {
        Ok(stream) => stream,
        Err(e) => return Err(record_failure(workspace, e)),
    };

    let reply = Arc::new(Mutex::new(StreamedReply {
        workspace: workspace.clone(),
        text: String::new(),
        recorded: false,
    }));
    let sink = reply.clone();
    let finish = futures_util::stream::once(async move {
        if let Ok(mut reply) = reply.lock() {
            reply.record();
        }
    })
    .filter_map(|()| futures_util::future::ready(None::<Result<String>>));

    Ok(stream
        .inspect(move |chunk| {
            if let (Ok(text), Ok(mut reply)) = (chunk, sink.lock()) {
                reply.text.push_str(text);
            }
        })
        .chain(finish)
        .boxed())
}

/// A streamed answer being assembled. It is written to the history exactly
/// once: when the stream ends, or when the client drops it part way through.
struct StreamedReply {
    workspace: SharedWorkspace,
    text: String,
    recorded: bool,
}

impl StreamedReply {
    fn record(&mut self) {
        if self.recorded {
            return;
        }
        self.recorded = true;
        let reply = std::mem::take(&mut self.text);
        match lock(&self.workspace) {
            Ok(mut ws) => {
                ws.conversation.record_assistant(&reply);
            }
            Err(e) => tracing::error!("Streamed reply was not recorded: {}", e),
        }
    }
}

impl Drop for StreamedReply {
    fn drop(&mut self) {
        if self.recorded {
            return;
        }
        tracing::warn!("Reply stream dropped after {} bytes", self.text.len());
        if self.text.is_empty() {
            self.text = APOLOGY.to_string();
        }
        self.record();
    }
}

pub(crate) async fn list_models(workspace: &SharedWorkspace) -> Result<Vec<String>> {
    let provider = lock(workspace)?.provider.clone();
    provider.list_models().await
}

/// Asks the model for code from a catalogue template and loads the result
/// into the editor buffer.
#[instrument(skip(workspace, details))]
pub(crate) async fn generate_from_template(
    workspace: &SharedWorkspace,
    name: &str,
    details: &str,
) -> Result<EditorBuffer> {
    let template = templates::find(name)?;
    let prompt = templates::generation_prompt(template, details);
    let (provider, model) = {
        let ws = lock(workspace)?;
        (ws.provider.clone(), ws.settings.selected_model.clone())
    };
    let reply = provider.complete(&prompt, &model, None).await?;
    let extracted = templates::extract_code(&reply);
    let mut ws = lock(workspace)?;
    ws.buffer.code = extracted.code;
    if let Some(language) = extracted.language {
        ws.buffer.language = language;
    }
    tracing::info!("Generated code from template {}", name);
    Ok(ws.buffer.clone())
}

/// Asks for tests of `code` (the buffer when absent) and appends them to it.
#[instrument(skip(workspace, code))]
pub(crate) async fn generate_tests(
    workspace: &SharedWorkspace,
    code: Option<String>,
    language: Option<Language>,
) -> Result<EditorBuffer> {
    let (provider, model, code, language) = {
        let ws = lock(workspace)?;
        (
            ws.provider.clone(),
            ws.settings.selected_model.clone(),
            code.unwrap_or_else(|| ws.buffer.code.clone()),
            language.unwrap_or(ws.buffer.language),
        )
    };
    if code.trim().is_empty() {
        return Err(CodeboxError::invalid_input(
            "There is no code to write tests for",
        ));
    }
    let tests = provider
        .complete(&templates::tests_prompt(&code, language), &model, None)
        .await?;
    let mut ws = lock(workspace)?;
    ws.buffer.code = templates::append_tests(&code, &tests);
    ws.buffer.language = language;
    Ok(ws.buffer.clone())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::assistant::Role;
    use crate::provider::tests::ScriptedProvider;
    use crate::script::Limits;
    use crate::storage::MemoryStore;
    use std::time::Duration;

    pub(crate) fn executor() -> ExecutorConfig {
        ExecutorConfig {
            local_delay: Duration::ZERO,
            limits: Limits::default(),
        }
    }

    pub(crate) fn factory_for(provider: Arc<ScriptedProvider>) -> ProviderFactory {
        Arc::new(move |_url: &str| provider.clone() as Arc<dyn CompletionProvider>)
    }

    pub(crate) fn workspace_with(provider: Arc<ScriptedProvider>) -> SharedWorkspace {
        let store: Arc<dyn SnapshotStore> = Arc::new(MemoryStore::new());
        shared(Workspace::new(
            store,
            "http://localhost:11434/api",
            executor(),
            factory_for(provider),
        ))
    }

    #[test]
    fn selecting_loads_buffer() {
        let workspace = workspace_with(Arc::new(ScriptedProvider::replying("")));
        let mut ws = lock(&workspace).unwrap();
        assert_eq!(ws.buffer().code, DEFAULT_CODE);
        let buffer = ws.select_file("index.html").unwrap();
        assert_eq!(buffer.language, Language::Html);
        assert!(ws.select_file("missing.js").is_err());
        assert_eq!(ws.buffer().language, Language::Html);
    }

    #[test]
    fn closing_replays_successor() {
        let workspace = workspace_with(Arc::new(ScriptedProvider::replying("")));
        let mut ws = lock(&workspace).unwrap();
        ws.select_file("index.html").unwrap();
        ws.create_file().unwrap();
        assert_eq!(ws.buffer().code, "// New file content");
        let buffer = ws.close_file("newFile.js");
        assert_eq!(buffer.language, Language::Html);
    }

    #[test]
    fn save_active_file_writes_buffer() {
        let workspace = workspace_with(Arc::new(ScriptedProvider::replying("")));
        let mut ws = lock(&workspace).unwrap();
        assert_eq!(
            ws.save_active_file().unwrap_err().error_type,
            CodeboxErrorType::NotFound
        );
        ws.create_file().unwrap();
        ws.update_buffer(BufferUpdate {
            code: Some("let saved = true;".to_string()),
            language: None,
        });
        assert_eq!(ws.save_active_file().unwrap(), "newFile.js");
        assert_eq!(
            ws.files().get_file_content("newFile.js").unwrap(),
            "let saved = true;"
        );
    }

    #[test]
    fn save_and_load_code() {
        let workspace = workspace_with(Arc::new(ScriptedProvider::replying("")));
        let mut ws = lock(&workspace).unwrap();
        let err = ws.load_code().unwrap_err();
        assert_eq!(err.message, "No saved code found");
        ws.update_buffer(BufferUpdate {
            code: Some("body {}".to_string()),
            language: Some(Language::Css),
        });
        ws.save_code();
        ws.update_buffer(BufferUpdate {
            code: Some("changed".to_string()),
            language: Some(Language::Javascript),
        });
        let restored = ws.load_code().unwrap();
        assert_eq!(restored.code, "body {}");
        assert_eq!(restored.language, Language::Css);
    }

    #[test]
    fn changing_url_rebuilds_provider() {
        let urls = Arc::new(Mutex::new(Vec::new()));
        let seen = urls.clone();
        let factory: ProviderFactory = Arc::new(move |url: &str| {
            seen.lock().unwrap().push(url.to_string());
            Arc::new(ScriptedProvider::replying("")) as Arc<dyn CompletionProvider>
        });
        let store: Arc<dyn SnapshotStore> = Arc::new(MemoryStore::new());
        let mut ws = Workspace::new(store, "http://a/api", executor(), factory);
        ws.update_settings(SettingsUpdate {
            use_ollama: Some(true),
            ..SettingsUpdate::default()
        });
        ws.update_settings(SettingsUpdate {
            ollama_base_url: Some("http://b/api".to_string()),
            ..SettingsUpdate::default()
        });
        assert_eq!(*urls.lock().unwrap(), vec!["http://a/api", "http://b/api"]);
        assert_eq!(ws.toggle_theme(), Theme::Light);
    }

    #[tokio::test]
    async fn run_uses_local_mode_by_default() {
        let provider = Arc::new(ScriptedProvider::replying("model output"));
        let workspace = workspace_with(provider.clone());
        let result = run(&workspace).await.unwrap();
        assert_eq!(result, ExecutionResult::succeeded("Hello, world!"));
        let ws = lock(&workspace).unwrap();
        assert_eq!(ws.buffer().output, "Hello, world!");
        assert!(!ws.buffer().processing);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn run_uses_assisted_mode_when_enabled() {
        let provider = Arc::new(ScriptedProvider::replying("model output"));
        let workspace = workspace_with(provider.clone());
        lock(&workspace).unwrap().update_settings(SettingsUpdate {
            use_ollama: Some(true),
            ..SettingsUpdate::default()
        });
        let result = run(&workspace).await.unwrap();
        assert_eq!(result, ExecutionResult::succeeded("model output"));
        assert_eq!(provider.calls().len(), 1);
    }

    #[tokio::test]
    async fn second_run_while_busy_is_rejected() {
        let provider = Arc::new(ScriptedProvider::replying(""));
        let store: Arc<dyn SnapshotStore> = Arc::new(MemoryStore::new());
        let workspace = shared(Workspace::new(
            store,
            "http://localhost:11434/api",
            ExecutorConfig {
                local_delay: Duration::from_millis(50),
                limits: Limits::default(),
            },
            factory_for(provider),
        ));
        let (first, second) = tokio::join!(run(&workspace), run(&workspace));
        assert!(first.is_ok());
        assert_eq!(second.unwrap_err().error_type, CodeboxErrorType::Busy);
        assert!(run(&workspace).await.is_ok());
    }

    #[tokio::test]
    async fn ask_records_both_turns() {
        let provider = Arc::new(ScriptedProvider::replying("It greets."));
        let workspace = workspace_with(provider.clone());
        let reply = ask(&workspace, "What does this do?", true).await.unwrap();
        assert_eq!(reply.content, "It greets.");
        let calls = provider.calls();
        assert!(calls[0].prompt.starts_with("Answer by examining the following javascript code"));
        assert!(calls[0].prompt.ends_with("What does this do?"));
        assert_eq!(calls[0].model, "llama3");
        let ws = lock(&workspace).unwrap();
        let roles: Vec<Role> = ws.history().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::Assistant, Role::User, Role::Assistant]);
    }

    #[tokio::test]
    async fn ask_failure_records_apology() {
        let provider = Arc::new(ScriptedProvider::failing(CodeboxError::new(
            CodeboxErrorType::ProviderUnreachable,
            "connection refused".to_string(),
        )));
        let workspace = workspace_with(provider);
        let err = ask(&workspace, "hi", false).await.unwrap_err();
        assert_eq!(err.error_type, CodeboxErrorType::ProviderError);
        let ws = lock(&workspace).unwrap();
        assert_eq!(ws.history().last().unwrap().content, APOLOGY);
    }

    #[tokio::test]
    async fn blank_prompt_is_rejected() {
        let provider = Arc::new(ScriptedProvider::replying("unused"));
        let workspace = workspace_with(provider.clone());
        let err = ask(&workspace, "   ", true).await.unwrap_err();
        assert_eq!(err.error_type, CodeboxErrorType::InvalidInput);
        assert!(provider.calls().is_empty());
        assert_eq!(lock(&workspace).unwrap().history().len(), 1);
    }

    #[tokio::test]
    async fn streamed_reply_is_recorded_when_drained() {
        let provider = Arc::new(ScriptedProvider::replying("one two three"));
        let workspace = workspace_with(provider);
        let stream = ask_streaming(&workspace, "count", false).await.unwrap();
        let chunks: Vec<String> = stream.map(|chunk| chunk.unwrap()).collect().await;
        assert_eq!(chunks.concat(), "one two three");
        let ws = lock(&workspace).unwrap();
        assert_eq!(ws.history().last().unwrap().content, "one two three");
    }

    #[tokio::test]
    async fn abandoned_stream_still_answers_the_question() {
        let provider = Arc::new(ScriptedProvider::replying("one two three"));
        let workspace = workspace_with(provider);
        let mut stream = ask_streaming(&workspace, "count", false).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), "one ");
        drop(stream);
        {
            let ws = lock(&workspace).unwrap();
            let history = ws.history();
            assert_eq!(history[history.len() - 2].content, "count");
            assert_eq!(history[history.len() - 1].role, Role::Assistant);
            assert_eq!(history[history.len() - 1].content, "one ");
        }

        let stream = ask_streaming(&workspace, "again", false).await.unwrap();
        drop(stream);
        let ws = lock(&workspace).unwrap();
        assert_eq!(ws.history().last().unwrap().content, APOLOGY);
        assert_eq!(ws.history().len(), 5);
    }

    #[tokio::test]
    async fn template_generation_loads_buffer() {
        let provider = Arc::new(ScriptedProvider::replying(
            "Sure:\n```tsx\ninterface Props { rows: number }\n```",
        ));
        let workspace = workspace_with(provider);
        let buffer = generate_from_template(&workspace, "Basic Table Component", "")
            .await
            .unwrap();
        assert_eq!(buffer.code, "interface Props { rows: number }");
        assert_eq!(buffer.language, Language::Typescript);

        let err = generate_from_template(&workspace, "Nope", "").await.unwrap_err();
        assert_eq!(err.error_type, CodeboxErrorType::NotFound);
    }

    #[tokio::test]
    async fn tests_are_appended_to_buffer() {
        let provider = Arc::new(ScriptedProvider::replying("test('greet')"));
        let workspace = workspace_with(provider);
        let buffer = generate_tests(&workspace, None, None).await.unwrap();
        assert_eq!(
            buffer.code,
            format!("{}\n\n// TEST CODE:\ntest('greet')", DEFAULT_CODE)
        );
        let err = generate_tests(&workspace, Some(" ".to_string()), None)
            .await
            .unwrap_err();
        assert_eq!(err.error_type, CodeboxErrorType::InvalidInput);
    }
}
