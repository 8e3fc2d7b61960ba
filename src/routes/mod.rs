mod assistant;
mod editor;
mod files;

use crate::handlers;
use crate::workspace::SharedWorkspace;
use serde::de::DeserializeOwned;
use std::convert::Infallible;
use warp::Filter;

const MAX_BODY_BYTES: u64 = 4 * 1024 * 1024;

/// Every endpoint. Browsers may only call in from `allowed_origins`, which
/// must already be normalized to `scheme://host[:port]`.
pub(crate) fn routes(
    workspace: SharedWorkspace,
    allowed_origins: &[String],
) -> impl warp::Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let cors = warp::cors()
        .allow_origins(allowed_origins.iter().map(String::as_str))
        .allow_methods(vec!["GET", "POST", "PUT"])
        .allow_header("content-type");
    version()
        .or(files::routes(workspace.clone()))
        .or(editor::routes(workspace.clone()))
        .or(assistant::routes(workspace))
        .with(cors)
        .with(warp::trace::request())
}

fn version() -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("version")
        .and(warp::get())
        .map(handlers::get_version)
}

fn with_workspace(
    workspace: SharedWorkspace,
) -> impl Filter<Extract = (SharedWorkspace,), Error = Infallible> + Clone {
    warp::any().map(move || workspace.clone())
}

fn json_body<T: DeserializeOwned + Send>(
) -> impl Filter<Extract = (T,), Error = warp::Rejection> + Clone {
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::tests::ScriptedProvider;
    use crate::workspace::tests::workspace_with;
    use std::sync::Arc;
    use warp::http::StatusCode;

    const FRONT_END: &str = "http://localhost:5173";

    fn app() -> impl warp::Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
        let workspace = workspace_with(Arc::new(ScriptedProvider::replying("")));
        routes(workspace, &[FRONT_END.to_string()])
    }

    #[tokio::test]
    async fn version_is_reported() {
        let response = warp::test::request()
            .method("GET")
            .path("/version")
            .reply(&app())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: String = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn unknown_path_is_rejected() {
        let response = warp::test::request()
            .method("GET")
            .path("/nowhere")
            .reply(&app())
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn only_configured_origins_pass_cors() {
        let filter = app();
        let response = warp::test::request()
            .method("GET")
            .path("/settings")
            .header("origin", FRONT_END)
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["access-control-allow-origin"], FRONT_END);

        let response = warp::test::request()
            .method("GET")
            .path("/settings")
            .header("origin", "https://attacker.example")
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = warp::test::request()
            .method("OPTIONS")
            .path("/settings")
            .header("origin", "https://attacker.example")
            .header("access-control-request-method", "PUT")
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn settings_never_echo_the_api_key() {
        let filter = app();
        let response = warp::test::request()
            .method("PUT")
            .path("/settings")
            .json(&serde_json::json!({"apiKey": "sk-secret"}))
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let response = warp::test::request()
            .method("GET")
            .path("/settings")
            .reply(&filter)
            .await;
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["hasApiKey"], true);
        assert!(body.get("apiKey").is_none());
        assert!(!String::from_utf8_lossy(response.body()).contains("sk-secret"));
    }
}
