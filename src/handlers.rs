use crate::errors::{CodeboxError, Result};
use crate::fsystem::Language;
use crate::settings::SettingsUpdate;
use crate::templates::{self, TemplateKind};
use crate::workspace::{self, lock, BufferUpdate, SharedWorkspace};

use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use tracing::instrument;
use warp::http::header::CONTENT_TYPE;
use warp::http::StatusCode;
use warp::reply::Reply;
use warp::{http::Response, hyper::Body};

type HandlerResult = std::result::Result<Response<Body>, Infallible>;

fn respond<T: Serialize>(result: Result<T>) -> HandlerResult {
    match result {
        Ok(value) => Ok(warp::reply::json(&value).into_response()),
        Err(e) => {
            tracing::error!("{}", e);
            Ok(e.into_response())
        }
    }
}

fn message(text: String) -> HandlerResult {
    Ok(warp::reply::with_status(warp::reply::json(&text), StatusCode::OK).into_response())
}

#[instrument(name = "handlers.get_version", level = "info")]
pub(crate) fn get_version() -> HandlerResult {
    message(env!("CARGO_PKG_VERSION").to_string())
}

#[instrument(name = "handlers.get_files", level = "info", skip(workspace))]
pub(crate) fn get_files(workspace: SharedWorkspace) -> HandlerResult {
    respond(lock(&workspace).map(|ws| ws.files().tree().clone()))
}

#[derive(Serialize)]
struct FileContent {
    path: String,
    content: String,
}

#[instrument(name = "handlers.get_file_content", level = "info", skip(workspace))]
pub(crate) fn get_file_content(workspace: SharedWorkspace, path: String) -> HandlerResult {
    let result = lock(&workspace).and_then(|ws| {
        let content = ws.files().get_file_content(&path)?.to_string();
        Ok(FileContent { path, content })
    });
    respond(result)
}

#[instrument(name = "handlers.save_file_content", level = "info", skip(workspace, content))]
pub(crate) fn save_file_content(workspace: SharedWorkspace, path: String, content: String) -> HandlerResult {
    let result = lock(&workspace).and_then(|mut ws| ws.save_file_content(&path, &content));
    match result {
        Ok(()) => message(format!("Saved {}", path)),
        Err(e) => respond::<()>(Err(e)),
    }
}

#[instrument(name = "handlers.create_file", level = "info", skip(workspace))]
pub(crate) fn create_file(workspace: SharedWorkspace) -> HandlerResult {
    respond(lock(&workspace).and_then(|mut ws| ws.create_file()))
}

#[instrument(name = "handlers.create_folder", level = "info", skip(workspace))]
pub(crate) fn create_folder(workspace: SharedWorkspace) -> HandlerResult {
    respond(lock(&workspace).and_then(|mut ws| ws.create_folder()))
}

#[instrument(name = "handlers.get_session", level = "info", skip(workspace))]
pub(crate) fn get_session(workspace: SharedWorkspace) -> HandlerResult {
    respond(lock(&workspace).map(|ws| ws.files().session().clone()))
}

#[instrument(name = "handlers.select_file", level = "info", skip(workspace))]
pub(crate) fn select_file(workspace: SharedWorkspace, path: String) -> HandlerResult {
    respond(lock(&workspace).and_then(|mut ws| ws.select_file(&path)))
}

#[instrument(name = "handlers.close_file", level = "info", skip(workspace))]
pub(crate) fn close_file(workspace: SharedWorkspace, path: String) -> HandlerResult {
    respond(lock(&workspace).map(|mut ws| ws.close_file(&path)))
}

#[derive(Serialize)]
struct FolderState {
    path: String,
    expanded: bool,
}

#[instrument(name = "handlers.toggle_folder", level = "info", skip(workspace))]
pub(crate) fn toggle_folder(workspace: SharedWorkspace, path: String) -> HandlerResult {
    let result = lock(&workspace).map(|mut ws| {
        let expanded = ws.files_mut().toggle_folder_expand(&path);
        FolderState { path, expanded }
    });
    respond(result)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExplorerState {
    explorer_visible: bool,
}

#[instrument(name = "handlers.toggle_explorer", level = "info", skip(workspace))]
pub(crate) fn toggle_explorer(workspace: SharedWorkspace) -> HandlerResult {
    let result = lock(&workspace).map(|mut ws| ExplorerState {
        explorer_visible: ws.files_mut().toggle_explorer_visibility(),
    });
    respond(result)
}

#[instrument(name = "handlers.rename_project", level = "info", skip(workspace))]
pub(crate) fn rename_project(workspace: SharedWorkspace, name: String) -> HandlerResult {
    if name.trim().is_empty() {
        return respond::<()>(Err(CodeboxError::invalid_input("Project name is empty")));
    }
    match lock(&workspace) {
        Ok(mut ws) => {
            ws.files_mut().rename_project(&name);
            message(format!("Project renamed to {}", name))
        }
        Err(e) => respond::<()>(Err(e)),
    }
}

#[instrument(name = "handlers.get_editor", level = "info", skip(workspace))]
pub(crate) fn get_editor(workspace: SharedWorkspace) -> HandlerResult {
    respond(lock(&workspace).map(|ws| ws.buffer().clone()))
}

#[instrument(name = "handlers.update_editor", level = "info", skip(workspace, update))]
pub(crate) fn update_editor(workspace: SharedWorkspace, update: BufferUpdate) -> HandlerResult {
    respond(lock(&workspace).map(|mut ws| ws.update_buffer(update)))
}

#[instrument(name = "handlers.save_code", level = "info", skip(workspace))]
pub(crate) fn save_code(workspace: SharedWorkspace) -> HandlerResult {
    match lock(&workspace) {
        Ok(ws) => {
            ws.save_code();
            message("Code saved".to_string())
        }
        Err(e) => respond::<()>(Err(e)),
    }
}

#[instrument(name = "handlers.load_code", level = "info", skip(workspace))]
pub(crate) fn load_code(workspace: SharedWorkspace) -> HandlerResult {
    respond(lock(&workspace).and_then(|mut ws| ws.load_code()))
}

#[instrument(name = "handlers.save_active_file", level = "info", skip(workspace))]
pub(crate) fn save_active_file(workspace: SharedWorkspace) -> HandlerResult {
    match lock(&workspace).and_then(|mut ws| ws.save_active_file()) {
        Ok(path) => message(format!("Saved {}", path)),
        Err(e) => respond::<()>(Err(e)),
    }
}

#[instrument(name = "handlers.run", level = "info", skip(workspace))]
pub(crate) async fn run(workspace: SharedWorkspace) -> HandlerResult {
    respond(workspace::run(&workspace).await)
}

#[instrument(name = "handlers.get_settings", level = "info", skip(workspace))]
pub(crate) fn get_settings(workspace: SharedWorkspace) -> HandlerResult {
    respond(lock(&workspace).map(|ws| ws.settings().view()))
}

#[instrument(name = "handlers.update_settings", level = "info", skip(workspace, update))]
pub(crate) fn update_settings(workspace: SharedWorkspace, update: SettingsUpdate) -> HandlerResult {
    respond(lock(&workspace).map(|mut ws| ws.update_settings(update).view()))
}

#[instrument(name = "handlers.toggle_theme", level = "info", skip(workspace))]
pub(crate) fn toggle_theme(workspace: SharedWorkspace) -> HandlerResult {
    respond(lock(&workspace).map(|mut ws| ws.toggle_theme()))
}

#[instrument(name = "handlers.list_models", level = "info", skip(workspace))]
pub(crate) async fn list_models(workspace: SharedWorkspace) -> HandlerResult {
    respond(workspace::list_models(&workspace).await)
}

#[instrument(name = "handlers.ask", level = "info", skip(workspace, prompt))]
pub(crate) async fn ask(workspace: SharedWorkspace, prompt: String, include_code: bool) -> HandlerResult {
    respond(workspace::ask(&workspace, &prompt, include_code).await)
}

/// Streams the reply as plain text chunks.
#[instrument(name = "handlers.ask_streaming", level = "info", skip(workspace, prompt))]
pub(crate) async fn ask_streaming(
    workspace: SharedWorkspace,
    prompt: String,
    include_code: bool,
) -> HandlerResult {
    let stream = match workspace::ask_streaming(&workspace, &prompt, include_code).await {
        Ok(stream) => stream,
        Err(e) => return respond::<()>(Err(e)),
    };
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::wrap_stream(stream));
    match response {
        Ok(response) => Ok(response),
        Err(e) => {
            tracing::error!("Unable to build streaming response: {}", e);
            Ok(StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}

#[instrument(name = "handlers.get_history", level = "info", skip(workspace))]
pub(crate) fn get_history(workspace: SharedWorkspace) -> HandlerResult {
    respond(lock(&workspace).map(|ws| ws.history().to_vec()))
}

#[instrument(name = "handlers.list_templates", level = "info")]
pub(crate) fn list_templates(params: HashMap<String, String>) -> HandlerResult {
    let query = params.get("q").map(String::as_str).unwrap_or("");
    let kinds = match params.get("kind").filter(|kind| !kind.is_empty()) {
        Some(kind) => match TemplateKind::from_tag(kind) {
            Some(kind) => vec![kind],
            None => {
                return respond::<()>(Err(CodeboxError::invalid_input(format!(
                    "Invalid template kind {}",
                    kind
                ))))
            }
        },
        None => TemplateKind::ALL.to_vec(),
    };
    let found: Vec<_> = kinds
        .into_iter()
        .flat_map(|kind| templates::filter(kind, query))
        .collect();
    respond(Ok(found))
}

#[instrument(name = "handlers.generate_from_template", level = "info", skip(workspace, details))]
pub(crate) async fn generate_from_template(
    workspace: SharedWorkspace,
    name: String,
    details: String,
) -> HandlerResult {
    respond(workspace::generate_from_template(&workspace, &name, &details).await)
}

#[instrument(name = "handlers.generate_tests", level = "info", skip(workspace, code))]
pub(crate) async fn generate_tests(
    workspace: SharedWorkspace,
    code: Option<String>,
    language: Option<Language>,
) -> HandlerResult {
    respond(workspace::generate_tests(&workspace, code, language).await)
}
