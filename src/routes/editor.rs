use super::{json_body, with_workspace};
use crate::handlers;
use crate::settings::SettingsUpdate;
use crate::workspace::{BufferUpdate, SharedWorkspace};
use warp::Filter;

pub(super) fn routes(
    workspace: SharedWorkspace,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    editor_get(workspace.clone())
        .or(editor_put(workspace.clone()))
        .or(editor_save(workspace.clone()))
        .or(editor_load(workspace.clone()))
        .or(editor_save_file(workspace.clone()))
        .or(run(workspace.clone()))
        .or(settings_get(workspace.clone()))
        .or(settings_put(workspace.clone()))
        .or(theme_toggle(workspace))
}

fn editor_get(
    workspace: SharedWorkspace,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("editor")
        .and(warp::get())
        .and(with_workspace(workspace))
        .map(handlers::get_editor)
}

fn editor_put(
    workspace: SharedWorkspace,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("editor")
        .and(warp::put())
        .and(with_workspace(workspace))
        .and(json_body::<BufferUpdate>())
        .map(handlers::update_editor)
}

fn editor_save(
    workspace: SharedWorkspace,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("editor" / "save")
        .and(warp::post())
        .and(with_workspace(workspace))
        .map(handlers::save_code)
}

fn editor_load(
    workspace: SharedWorkspace,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("editor" / "load")
        .and(warp::post())
        .and(with_workspace(workspace))
        .map(handlers::load_code)
}

fn editor_save_file(
    workspace: SharedWorkspace,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("editor" / "save-file")
        .and(warp::post())
        .and(with_workspace(workspace))
        .map(handlers::save_active_file)
}

fn run(
    workspace: SharedWorkspace,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("run")
        .and(warp::post())
        .and(with_workspace(workspace))
        .and_then(handlers::run)
}

fn settings_get(
    workspace: SharedWorkspace,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("settings")
        .and(warp::get())
        .and(with_workspace(workspace))
        .map(handlers::get_settings)
}

fn settings_put(
    workspace: SharedWorkspace,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("settings")
        .and(warp::put())
        .and(with_workspace(workspace))
        .and(json_body::<SettingsUpdate>())
        .map(handlers::update_settings)
}

fn theme_toggle(
    workspace: SharedWorkspace,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("settings" / "theme" / "toggle")
        .and(warp::post())
        .and(with_workspace(workspace))
        .map(handlers::toggle_theme)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::tests::ScriptedProvider;
    use crate::workspace::tests::workspace_with;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use warp::http::StatusCode;

    fn body(response: &warp::http::Response<bytes::Bytes>) -> Value {
        serde_json::from_slice(response.body()).unwrap()
    }

    #[tokio::test]
    async fn edit_and_run_locally() {
        let filter = routes(workspace_with(Arc::new(ScriptedProvider::replying("unused"))));
        let response = warp::test::request()
            .method("PUT")
            .path("/editor")
            .json(&json!({"code": "console.log(6 * 7)"}))
            .reply(&filter)
            .await;
        assert_eq!(body(&response)["language"], "javascript");

        let response = warp::test::request()
            .method("POST")
            .path("/run")
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(&response), json!({"output": "42", "success": true}));

        let response = warp::test::request()
            .method("GET")
            .path("/editor")
            .reply(&filter)
            .await;
        let editor = body(&response);
        assert_eq!(editor["output"], "42");
        assert_eq!(editor["processing"], false);
    }

    #[tokio::test]
    async fn run_fault_is_a_successful_response() {
        let filter = routes(workspace_with(Arc::new(ScriptedProvider::replying("unused"))));
        warp::test::request()
            .method("PUT")
            .path("/editor")
            .json(&json!({"code": "throw new TypeError('bad')"}))
            .reply(&filter)
            .await;
        let response = warp::test::request()
            .method("POST")
            .path("/run")
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(&response), json!({"output": "Error: bad", "success": false}));
    }

    #[tokio::test]
    async fn save_and_load_round() {
        let filter = routes(workspace_with(Arc::new(ScriptedProvider::replying(""))));
        let response = warp::test::request()
            .method("POST")
            .path("/editor/load")
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body(&response), json!("No saved code found"));

        warp::test::request()
            .method("POST")
            .path("/editor/save")
            .reply(&filter)
            .await;
        let response = warp::test::request()
            .method("POST")
            .path("/editor/load")
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = warp::test::request()
            .method("POST")
            .path("/editor/save-file")
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn settings_update_and_theme() {
        let filter = routes(workspace_with(Arc::new(ScriptedProvider::replying(""))));
        let response = warp::test::request()
            .method("GET")
            .path("/settings")
            .reply(&filter)
            .await;
        let settings = body(&response);
        assert_eq!(settings["theme"], "dark");
        assert_eq!(settings["useOllama"], false);

        let response = warp::test::request()
            .method("PUT")
            .path("/settings")
            .json(&json!({"useOllama": true, "selectedModel": "mistral"}))
            .reply(&filter)
            .await;
        let settings = body(&response);
        assert_eq!(settings["useOllama"], true);
        assert_eq!(settings["selectedModel"], "mistral");

        let response = warp::test::request()
            .method("POST")
            .path("/settings/theme/toggle")
            .reply(&filter)
            .await;
        assert_eq!(body(&response), json!("light"));
    }
}
