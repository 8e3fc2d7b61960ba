use super::{json_body, with_workspace};
use crate::fsystem::Language;
use crate::handlers;
use crate::workspace::SharedWorkspace;
use serde::Deserialize;
use std::collections::HashMap;
use warp::Filter;

fn include_code_default() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AskRequest {
    prompt: String,
    #[serde(default = "include_code_default")]
    include_code: bool,
}

#[derive(Debug, Deserialize)]
struct TemplateRequest {
    name: String,
    #[serde(default)]
    details: String,
}

#[derive(Debug, Default, Deserialize)]
struct TestsRequest {
    code: Option<String>,
    language: Option<Language>,
}

pub(super) fn routes(
    workspace: SharedWorkspace,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    models(workspace.clone())
        .or(ask(workspace.clone()))
        .or(ask_streaming(workspace.clone()))
        .or(history(workspace.clone()))
        .or(templates_list())
        .or(template_generate(workspace.clone()))
        .or(template_tests(workspace))
}

fn models(
    workspace: SharedWorkspace,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("models")
        .and(warp::get())
        .and(with_workspace(workspace))
        .and_then(handlers::list_models)
}

fn ask(
    workspace: SharedWorkspace,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("assistant" / "ask")
        .and(warp::post())
        .and(with_workspace(workspace))
        .and(json_body::<AskRequest>())
        .and_then(|workspace, request: AskRequest| {
            handlers::ask(workspace, request.prompt, request.include_code)
        })
}

fn ask_streaming(
    workspace: SharedWorkspace,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("assistant" / "stream")
        .and(warp::post())
        .and(with_workspace(workspace))
        .and(json_body::<AskRequest>())
        .and_then(|workspace, request: AskRequest| {
            handlers::ask_streaming(workspace, request.prompt, request.include_code)
        })
}

fn history(
    workspace: SharedWorkspace,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("assistant" / "history")
        .and(warp::get())
        .and(with_workspace(workspace))
        .map(handlers::get_history)
}

fn templates_list() -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("templates")
        .and(warp::get())
        .and(warp::query::<HashMap<String, String>>())
        .map(handlers::list_templates)
}

fn template_generate(
    workspace: SharedWorkspace,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("templates" / "generate")
        .and(warp::post())
        .and(with_workspace(workspace))
        .and(json_body::<TemplateRequest>())
        .and_then(|workspace, request: TemplateRequest| {
            handlers::generate_from_template(workspace, request.name, request.details)
        })
}

fn template_tests(
    workspace: SharedWorkspace,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("templates" / "tests")
        .and(warp::post())
        .and(with_workspace(workspace))
        .and(json_body::<TestsRequest>())
        .and_then(|workspace, request: TestsRequest| {
            handlers::generate_tests(workspace, request.code, request.language)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{CodeboxError, CodeboxErrorType};
    use crate::provider::tests::ScriptedProvider;
    use crate::workspace::tests::workspace_with;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use warp::http::StatusCode;

    fn body(response: &warp::http::Response<bytes::Bytes>) -> Value {
        serde_json::from_slice(response.body()).unwrap()
    }

    #[tokio::test]
    async fn models_are_listed() {
        let filter = routes(workspace_with(Arc::new(ScriptedProvider::replying(""))));
        let response = warp::test::request()
            .method("GET")
            .path("/models")
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(&response), json!(["llama3", "codellama"]));
    }

    #[tokio::test]
    async fn unreachable_provider_maps_to_503() {
        let provider = Arc::new(ScriptedProvider::failing(CodeboxError::new(
            CodeboxErrorType::ProviderUnreachable,
            "connection refused".to_string(),
        )));
        let filter = routes(workspace_with(provider));
        let response = warp::test::request()
            .method("GET")
            .path("/models")
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = warp::test::request()
            .method("POST")
            .path("/assistant/ask")
            .json(&json!({"prompt": "hello"}))
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn ask_and_history() {
        let provider = Arc::new(ScriptedProvider::replying("Use a loop."));
        let filter = routes(workspace_with(provider.clone()));
        let response = warp::test::request()
            .method("POST")
            .path("/assistant/ask")
            .json(&json!({"prompt": "How?", "includeCode": false}))
            .reply(&filter)
            .await;
        assert_eq!(body(&response)["content"], "Use a loop.");
        assert_eq!(provider.calls()[0].prompt, "How?");

        let response = warp::test::request()
            .method("GET")
            .path("/assistant/history")
            .reply(&filter)
            .await;
        let history = body(&response);
        assert_eq!(history.as_array().unwrap().len(), 3);
        assert_eq!(history[1]["role"], "user");
    }

    #[tokio::test]
    async fn stream_returns_plain_text() {
        let filter = routes(workspace_with(Arc::new(ScriptedProvider::replying("a b c"))));
        let response = warp::test::request()
            .method("POST")
            .path("/assistant/stream")
            .json(&json!({"prompt": "letters"}))
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body().as_ref(), b"a b c");
    }

    #[tokio::test]
    async fn template_listing_and_generation() {
        let provider = Arc::new(ScriptedProvider::replying("```javascript\nconst form = {};\n```"));
        let filter = routes(workspace_with(provider));
        let response = warp::test::request()
            .method("GET")
            .path("/templates?kind=component&q=form")
            .reply(&filter)
            .await;
        let listed = body(&response);
        assert_eq!(listed.as_array().unwrap().len(), 1);
        assert_eq!(listed[0]["name"], "Form Builder");

        let response = warp::test::request()
            .method("GET")
            .path("/templates?kind=widget")
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = warp::test::request()
            .method("POST")
            .path("/templates/generate")
            .json(&json!({"name": "Form Builder"}))
            .reply(&filter)
            .await;
        assert_eq!(body(&response)["code"], "const form = {};");

        let response = warp::test::request()
            .method("POST")
            .path("/templates/generate")
            .json(&json!({"name": "Rocket"}))
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn tests_are_appended() {
        let provider = Arc::new(ScriptedProvider::replying("assert(f() === 1)"));
        let filter = routes(workspace_with(provider));
        let response = warp::test::request()
            .method("POST")
            .path("/templates/tests")
            .json(&json!({"code": "function f() { return 1 }", "language": "javascript"}))
            .reply(&filter)
            .await;
        assert_eq!(
            body(&response)["code"],
            "function f() { return 1 }\n\n// TEST CODE:\nassert(f() === 1)"
        );
    }
}
