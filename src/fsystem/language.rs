use serde::{Deserialize, Serialize};
use std::fmt;

/// Language tag attached to an editor buffer. Derived from a file extension,
/// or chosen explicitly by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Language {
    Javascript,
    Typescript,
    Html,
    Css,
    Json,
    Markdown,
    Plaintext,
}

impl Language {
    pub(crate) fn from_extension(extension: &str) -> Language {
        match extension.to_ascii_lowercase().as_str() {
            "js" | "jsx" => Language::Javascript,
            "ts" | "tsx" => Language::Typescript,
            "html" => Language::Html,
            "css" => Language::Css,
            "json" => Language::Json,
            "md" => Language::Markdown,
            _ => Language::Plaintext,
        }
    }

    /// Parse a tag as sent by the front end. Extensions are accepted too, so
    /// `jsx` and `tsx` resolve to their base language.
    pub(crate) fn from_tag(tag: &str) -> Language {
        match tag.to_ascii_lowercase().as_str() {
            "javascript" => Language::Javascript,
            "typescript" => Language::Typescript,
            "markdown" => Language::Markdown,
            other => Language::from_extension(other),
        }
    }

    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Language::Javascript => "javascript",
            Language::Typescript => "typescript",
            Language::Html => "html",
            Language::Css => "css",
            Language::Json => "json",
            Language::Markdown => "markdown",
            Language::Plaintext => "plaintext",
        }
    }

    pub(crate) fn is_locally_executable(&self) -> bool {
        matches!(self, Language::Javascript)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Language of the file at `path`, from its last extension only.
pub(crate) fn language_for_path(path: &str) -> Language {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rsplit_once('.') {
        Some((_, extension)) => Language::from_extension(extension),
        None => Language::Plaintext,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_table() {
        assert_eq!(language_for_path("src/App.tsx"), Language::Typescript);
        assert_eq!(language_for_path("src/components/App.js"), Language::Javascript);
        assert_eq!(language_for_path("Button.JSX"), Language::Javascript);
        assert_eq!(language_for_path("index.html"), Language::Html);
        assert_eq!(language_for_path("src/styles.css"), Language::Css);
        assert_eq!(language_for_path("package.json"), Language::Json);
        assert_eq!(language_for_path("notes.md"), Language::Markdown);
        assert_eq!(language_for_path("types.d.ts"), Language::Typescript);
    }

    #[test]
    fn unmapped_or_missing_extension_is_plaintext() {
        assert_eq!(language_for_path("README"), Language::Plaintext);
        assert_eq!(language_for_path("Cargo.toml"), Language::Plaintext);
        assert_eq!(language_for_path("v1.2/Makefile"), Language::Plaintext);
    }

    #[test]
    fn tags_round_trip_through_serde() {
        let json = serde_json::to_string(&Language::Typescript).unwrap();
        assert_eq!(json, "\"typescript\"");
        let parsed: Language = serde_json::from_str("\"css\"").unwrap();
        assert_eq!(parsed, Language::Css);
    }

    #[test]
    fn front_end_tags() {
        assert_eq!(Language::from_tag("jsx"), Language::Javascript);
        assert_eq!(Language::from_tag("JavaScript"), Language::Javascript);
        assert_eq!(Language::from_tag("python"), Language::Plaintext);
        assert!(Language::Javascript.is_locally_executable());
        assert!(!Language::Css.is_locally_executable());
    }
}
