use super::tree::{PathNode, PathTree};

pub(crate) const DEFAULT_PROJECT_NAME: &str = "Untitled";
pub(crate) const NEW_FILE_NAME: &str = "newFile.js";
pub(crate) const NEW_FILE_CONTENT: &str = "// New file content";
pub(crate) const NEW_FOLDER_NAME: &str = "newFolder";

pub(crate) fn default_expanded_folders() -> Vec<String> {
    vec!["src".to_string(), "src/components".to_string()]
}

/// The project a fresh session starts with.
pub(crate) fn default_project() -> PathTree {
    PathTree::new(vec![
        PathNode::folder(
            "src",
            vec![
                PathNode::folder(
                    "components",
                    vec![
                        PathNode::file(
                            "App.js",
                            "function App() { return <div>Hello World</div>; }",
                        ),
                        PathNode::file(
                            "Button.js",
                            "function Button() { return <button>Click me</button>; }",
                        ),
                    ],
                ),
                PathNode::file(
                    "index.js",
                    "import React from \"react\";\nimport ReactDOM from \"react-dom\";\nimport App from \"./components/App\";\n\nReactDOM.render(<App />, document.getElementById(\"root\"));",
                ),
                PathNode::file(
                    "styles.css",
                    "body { font-family: sans-serif; margin: 0; padding: 0; }",
                ),
            ],
        ),
        PathNode::file(
            "index.html",
            "<!DOCTYPE html>\n<html>\n<head>\n  <title>My App</title>\n</head>\n<body>\n  <div id=\"root\"></div>\n</body>\n</html>",
        ),
        PathNode::file(
            "package.json",
            "{\n  \"name\": \"my-app\",\n  \"version\": \"1.0.0\",\n  \"dependencies\": {\n    \"react\": \"^17.0.2\",\n    \"react-dom\": \"^17.0.2\"\n  }\n}",
        ),
    ])
}
