// Template catalogue for model-driven code generation, plus the helpers that
// turn a model reply into editor code.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{CodeboxError, Result};
use crate::fsystem::Language;

static CODE_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:jsx|tsx|javascript|typescript)?\s*(.*?)```")
        .expect("code block pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum TemplateKind {
    Component,
    Module,
    Application,
}

impl TemplateKind {
    pub(crate) const ALL: [TemplateKind; 3] = [
        TemplateKind::Component,
        TemplateKind::Module,
        TemplateKind::Application,
    ];

    pub(crate) fn from_tag(tag: &str) -> Option<TemplateKind> {
        match tag.to_ascii_lowercase().as_str() {
            "component" => Some(TemplateKind::Component),
            "module" => Some(TemplateKind::Module),
            "application" => Some(TemplateKind::Application),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Complexity {
    Basic,
    Intermediate,
    Advanced,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct ProjectTemplate {
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
    #[serde(rename = "type")]
    pub(crate) kind: TemplateKind,
    pub(crate) complexity: Complexity,
    pub(crate) tags: &'static [&'static str],
}

impl ProjectTemplate {
    fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.name.to_lowercase().contains(&query)
            || self.description.to_lowercase().contains(&query)
            || self.tags.iter().any(|tag| tag.to_lowercase().contains(&query))
    }
}

static CATALOGUE: &[ProjectTemplate] = &[
    ProjectTemplate {
        name: "Basic Table Component",
        description: "A sortable, paginated data table with column definitions",
        kind: TemplateKind::Component,
        complexity: Complexity::Basic,
        tags: &["react", "table", "ui"],
    },
    ProjectTemplate {
        name: "Form Builder",
        description: "A form component generated from a field schema, with validation",
        kind: TemplateKind::Component,
        complexity: Complexity::Intermediate,
        tags: &["react", "form", "validation"],
    },
    ProjectTemplate {
        name: "ERP Customer Module",
        description: "Customer records with search, detail view and create/edit flows",
        kind: TemplateKind::Module,
        complexity: Complexity::Intermediate,
        tags: &["erp", "crm", "customers"],
    },
    ProjectTemplate {
        name: "ERP Stock Management",
        description: "Inventory tracking with stock movements and low-stock alerts",
        kind: TemplateKind::Module,
        complexity: Complexity::Advanced,
        tags: &["erp", "inventory", "stock"],
    },
    ProjectTemplate {
        name: "Task Board",
        description: "A kanban style task board with columns and card moves",
        kind: TemplateKind::Application,
        complexity: Complexity::Intermediate,
        tags: &["kanban", "tasks", "productivity"],
    },
    ProjectTemplate {
        name: "Sales Dashboard",
        description: "An application shell with summary cards, chart data and a sales list",
        kind: TemplateKind::Application,
        complexity: Complexity::Advanced,
        tags: &["dashboard", "sales", "erp"],
    },
];

/// Templates of `kind` whose name, description or any tag contains `query`,
/// ignoring case. An empty query matches everything of that kind.
pub(crate) fn filter(kind: TemplateKind, query: &str) -> Vec<&'static ProjectTemplate> {
    CATALOGUE
        .iter()
        .filter(|template| template.kind == kind && template.matches(query))
        .collect()
}

pub(crate) fn find(name: &str) -> Result<&'static ProjectTemplate> {
    CATALOGUE
        .iter()
        .find(|template| template.name == name)
        .ok_or_else(|| CodeboxError::not_found(format!("No template named {}", name)))
}

pub(crate) fn generation_prompt(template: &ProjectTemplate, details: &str) -> String {
    let mut prompt = format!(
        "Generate code for the \"{}\" template: {}.\nTags: {}.\n",
        template.name,
        template.description,
        template.tags.join(", ")
    );
    if !details.trim().is_empty() {
        prompt.push_str(&format!("Additional requirements: {}\n", details.trim()));
    }
    prompt.push_str("Return the complete code in fenced code blocks.");
    prompt
}

pub(crate) fn tests_prompt(code: &str, language: Language) -> String {
    format!(
        "Write unit tests for the following {language} code. Return only the test code.\n\n```{language}\n{code}\n```"
    )
}

/// Code pulled out of a generation reply, with the language it looks like.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ExtractedCode {
    pub(crate) code: String,
    pub(crate) language: Option<Language>,
}

/// Joins every fenced block of `reply`. Without any block the whole reply is
/// the code and the language is left to the caller.
pub(crate) fn extract_code(reply: &str) -> ExtractedCode {
    let mut joined = String::new();
    for captures in CODE_BLOCK.captures_iter(reply) {
        if let Some(block) = captures.get(1) {
            joined.push_str(block.as_str());
            joined.push_str("\n\n");
        }
    }
    if joined.trim().is_empty() {
        return ExtractedCode {
            code: reply.to_string(),
            language: None,
        };
    }
    ExtractedCode {
        language: infer_language(&joined),
        code: joined.trim().to_string(),
    }
}

fn infer_language(code: &str) -> Option<Language> {
    if code.contains("import React") || code.contains("jsx") {
        Some(Language::Javascript)
    } else if code.contains("typescript") || code.contains("interface") || code.contains(':') {
        Some(Language::Typescript)
    } else {
        None
    }
}

pub(crate) fn append_tests(code: &str, tests: &str) -> String {
    format!("{}\n\n// TEST CODE:\n{}", code, tests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CodeboxErrorType;

    #[test]
    fn filter_by_kind_and_query() {
        let components = filter(TemplateKind::Component, "");
        assert_eq!(components.len(), 2);
        let stock = filter(TemplateKind::Module, "INVENTORY");
        assert_eq!(stock.len(), 1);
        assert_eq!(stock[0].name, "ERP Stock Management");
        assert!(filter(TemplateKind::Component, "inventory").is_empty());
        let total: usize = TemplateKind::ALL.iter().map(|k| filter(*k, "").len()).sum();
        assert_eq!(total, CATALOGUE.len());
        assert_eq!(TemplateKind::from_tag("Module"), Some(TemplateKind::Module));
        assert_eq!(TemplateKind::from_tag("widget"), None);
    }

    #[test]
    fn unknown_template_is_not_found() {
        assert_eq!(find("Form Builder").unwrap().kind, TemplateKind::Component);
        let err = find("Spaceship").unwrap_err();
        assert_eq!(err.error_type, CodeboxErrorType::NotFound);
    }

    #[test]
    fn blocks_are_joined_and_language_inferred() {
        let reply = "Here you go:\n```jsx\nimport React from 'react';\n```\nand\n```\nexport default App;\n```";
        let extracted = extract_code(reply);
        assert_eq!(
            extracted.code,
            "import React from 'react';\n\n\nexport default App;"
        );
        assert_eq!(extracted.language, Some(Language::Javascript));

        let typed = extract_code("```typescript\ninterface Row { id: number }\n```");
        assert_eq!(typed.code, "interface Row { id: number }");
        assert_eq!(typed.language, Some(Language::Typescript));
    }

    #[test]
    fn reply_without_blocks_is_used_whole() {
        let extracted = extract_code("function f() { return 1 }");
        assert_eq!(extracted.code, "function f() { return 1 }");
        assert_eq!(extracted.language, None);
    }

    #[test]
    fn prompts_and_test_appending() {
        let template = find("Task Board").unwrap();
        let prompt = generation_prompt(template, "  dark mode ");
        assert!(prompt.contains("\"Task Board\""));
        assert!(prompt.contains("Additional requirements: dark mode"));
        assert!(!generation_prompt(template, "").contains("Additional requirements"));
        assert!(tests_prompt("f()", Language::Javascript).contains("```javascript\nf()\n```"));
        assert_eq!(append_tests("a()", "test(a)"), "a()\n\n// TEST CODE:\ntest(a)");
    }

    #[test]
    fn templates_serialize_kind_as_type() {
        let json = serde_json::to_value(find("Form Builder").unwrap()).unwrap();
        assert_eq!(json["type"], "component");
        assert_eq!(json["complexity"], "intermediate");
    }
}
