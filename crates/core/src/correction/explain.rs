use std::collections::HashMap;

use super::RuleId;

/// Resolves a learner-facing explanation for a mismatch.
pub trait ExplanationCatalog: Send + Sync {
    fn explain(&self, rule: RuleId, heard: &str, expected: &str, detail: Option<&str>) -> String;
}

/// Catalog backed by string templates with `{heard}`, `{expected}` and
/// `{detail}` placeholders.
#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    templates: HashMap<RuleId, String>,
}

impl TemplateCatalog {
    #[must_use]
    pub fn with_template(mut self, rule: RuleId, template: impl Into<String>) -> Self {
        self.templates.insert(rule, template.into());
        self
    }

    fn default_template(rule: RuleId) -> &'static str {
        match rule {
            RuleId::ToneMarker => {
                "You said \"{heard}\" with a different tone. Listen again and match the tone of \"{expected}\"."
            }
            RuleId::ConsonantClass => {
                "\"{heard}\" uses a different consonant than \"{expected}\".{detail}"
            }
            RuleId::Lexical => "You said \"{heard}\"; the word here is \"{expected}\".",
            RuleId::MissingToken => "You left out \"{expected}\".",
            RuleId::ExtraToken => "\"{heard}\" is not part of this phrase.",
            RuleId::EmptyInput => "I didn't catch that. Try saying \"{expected}\".",
        }
    }
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        let templates = RuleId::ALL
            .iter()
            .map(|rule| (*rule, Self::default_template(*rule).to_owned()))
            .collect();
        Self { templates }
    }
}

impl ExplanationCatalog for TemplateCatalog {
    fn explain(&self, rule: RuleId, heard: &str, expected: &str, detail: Option<&str>) -> String {
        let template = self
            .templates
            .get(&rule)
            .map_or_else(|| Self::default_template(rule), String::as_str);
        let detail = detail.map(|d| format!(" {d}")).unwrap_or_default();
        template
            .replace("{heard}", heard)
            .replace("{expected}", expected)
            .replace("{detail}", &detail)
    }
}
