use super::{json_body, with_workspace};
use crate::errors::CodeboxError;
use crate::handlers;
use crate::workspace::SharedWorkspace;
use serde::Deserialize;
use std::collections::HashMap;
use warp::Filter;
use warp::Reply;

#[derive(Debug, Deserialize)]
struct PathRequest {
    path: String,
}

#[derive(Debug, Deserialize)]
struct FileWrite {
    path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ProjectName {
    name: String,
}

pub(super) fn routes(
    workspace: SharedWorkspace,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    files_get(workspace.clone())
        .or(file_content_get(workspace.clone()))
        .or(file_content_put(workspace.clone()))
        .or(file_create(workspace.clone()))
        .or(folder_create(workspace.clone()))
        .or(session_get(workspace.clone()))
        .or(session_select(workspace.clone()))
        .or(session_close(workspace.clone()))
        .or(folder_toggle(workspace.clone()))
        .or(explorer_toggle(workspace.clone()))
        .or(project_rename(workspace))
}

fn files_get(
    workspace: SharedWorkspace,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("files")
        .and(warp::get())
        .and(with_workspace(workspace))
        .map(handlers::get_files)
}

fn file_content_get(
    workspace: SharedWorkspace,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("files" / "content")
        .and(warp::get())
        .and(warp::query::<HashMap<String, String>>())
        .map(move |mut params: HashMap<String, String>| match params.remove("path") {
            Some(path) => handlers::get_file_content(workspace.clone(), path),
            None => {
                tracing::error!("Query missing path argument");
                Ok(CodeboxError::invalid_input("Missing path argument").into_response())
            }
        })
}

fn file_content_put(
    workspace: SharedWorkspace,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("files" / "content")
        .and(warp::put())
        .and(json_body::<FileWrite>())
        .map(move |write: FileWrite| {
            handlers::save_file_content(workspace.clone(), write.path, write.content)
        })
}

fn file_create(
    workspace: SharedWorkspace,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("files")
        .and(warp::post())
        .and(with_workspace(workspace))
        .map(handlers::create_file)
}

fn folder_create(
    workspace: SharedWorkspace,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("folders")
        .and(warp::post())
        .and(with_workspace(workspace))
        .map(handlers::create_folder)
}

fn session_get(
    workspace: SharedWorkspace,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("session")
        .and(warp::get())
        .and(with_workspace(workspace))
        .map(handlers::get_session)
}

fn session_select(
    workspace: SharedWorkspace,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("session" / "select")
        .and(warp::post())
        .and(json_body::<PathRequest>())
        .map(move |request: PathRequest| handlers::select_file(workspace.clone(), request.path))
}

fn session_close(
    workspace: SharedWorkspace,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("session" / "close")
        .and(warp::post())
        .and(json_body::<PathRequest>())
        .map(move |request: PathRequest| handlers::close_file(workspace.clone(), request.path))
}

fn folder_toggle(
    workspace: SharedWorkspace,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("session" / "folders" / "toggle")
        .and(warp::post())
        .and(json_body::<PathRequest>())
        .map(move |request: PathRequest| handlers::toggle_folder(workspace.clone(), request.path))
}

fn explorer_toggle(
    workspace: SharedWorkspace,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("session" / "explorer" / "toggle")
        .and(warp::post())
        .and(with_workspace(workspace))
        .map(handlers::toggle_explorer)
}

fn project_rename(
    workspace: SharedWorkspace,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("project" / "name")
        .and(warp::put())
        .and(json_body::<ProjectName>())
        .map(move |request: ProjectName| handlers::rename_project(workspace.clone(), request.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::tests::ScriptedProvider;
    use crate::workspace::tests::workspace_with;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use warp::http::StatusCode;

    fn workspace() -> SharedWorkspace {
        workspace_with(Arc::new(ScriptedProvider::replying("")))
    }

    fn body(response: &warp::http::Response<bytes::Bytes>) -> Value {
        serde_json::from_slice(response.body()).unwrap()
    }

    #[tokio::test]
    async fn tree_is_listed_in_front_end_shape() {
        let response = warp::test::request()
            .method("GET")
            .path("/files")
            .reply(&routes(workspace()))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let tree = body(&response);
        assert_eq!(tree[0]["type"], "folder");
        assert_eq!(tree[0]["name"], "src");
    }

    #[tokio::test]
    async fn content_read_and_write() {
        let workspace = workspace();
        let filter = routes(workspace.clone());
        let response = warp::test::request()
            .method("PUT")
            .path("/files/content")
            .json(&json!({"path": "src/styles.css", "content": "p {}"}))
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = warp::test::request()
            .method("GET")
            .path("/files/content?path=src/styles.css")
            .reply(&filter)
            .await;
        assert_eq!(body(&response)["content"], "p {}");

        let response = warp::test::request()
            .method("GET")
            .path("/files/content")
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = warp::test::request()
            .method("GET")
            .path("/files/content?path=src/nope.css")
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn second_new_file_conflicts() {
        let filter = routes(workspace());
        let first = warp::test::request()
            .method("POST")
            .path("/files")
            .reply(&filter)
            .await;
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(body(&first)["code"], "// New file content");
        let second = warp::test::request()
            .method("POST")
            .path("/files")
            .reply(&filter)
            .await;
        assert_eq!(second.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn select_close_and_session() {
        let filter = routes(workspace());
        let response = warp::test::request()
            .method("POST")
            .path("/session/select")
            .json(&json!({"path": "package.json"}))
            .reply(&filter)
            .await;
        assert_eq!(body(&response)["language"], "json");

        let response = warp::test::request()
            .method("GET")
            .path("/session")
            .reply(&filter)
            .await;
        let session = body(&response);
        assert_eq!(session["activeFile"], "package.json");
        assert_eq!(session["openFiles"], json!(["package.json"]));

        warp::test::request()
            .method("POST")
            .path("/session/close")
            .json(&json!({"path": "package.json"}))
            .reply(&filter)
            .await;
        let response = warp::test::request()
            .method("GET")
            .path("/session")
            .reply(&filter)
            .await;
        assert_eq!(body(&response)["activeFile"], Value::Null);
    }

    #[tokio::test]
    async fn toggles_and_rename() {
        let filter = routes(workspace());
        let response = warp::test::request()
            .method("POST")
            .path("/session/folders/toggle")
            .json(&json!({"path": "src"}))
            .reply(&filter)
            .await;
        assert_eq!(body(&response)["expanded"], false);

        let response = warp::test::request()
            .method("POST")
            .path("/session/explorer/toggle")
            .reply(&filter)
            .await;
        assert_eq!(body(&response)["explorerVisible"], false);

        let response = warp::test::request()
            .method("PUT")
            .path("/project/name")
            .json(&json!({"name": "Demo"}))
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let response = warp::test::request()
            .method("PUT")
            .path("/project/name")
            .json(&json!({"name": "  "}))
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
