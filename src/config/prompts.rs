//! Prompt templates for Lectern.
//!
//! Prompts can be customized by placing TOML files in the custom prompts directory.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Collection of all prompt templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Prompts {
    /// Prompts for the situational prefix written in front of each chunk.
    pub context: ContextPrompts,
    /// Custom variables from config, available in all prompts.
    #[serde(skip)]
    pub variables: HashMap<String, String>,
}

/// Prompts for chunk context generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextPrompts {
    pub system: String,
    pub user: String,
    /// Used when the model cannot produce a prefix.
    pub fallback: String,
}

impl Default for ContextPrompts {
    fn default() -> Self {
        Self {
            system: "You write short situational context for excerpts of recorded lecture transcripts.".to_string(),

            user: r#"You are analysing a lecture video transcript. Write a short context (at most {{token_budget}} tokens) for the excerpt below.

Keep it brief. One or two sentences.

Video information:
- {{chapter}}
- Video: {{title}}
- Timestamp: {{start}}s to {{end}}s

Excerpt:
{{text}}
{{previous}}
{{next}}

Examples of the expected output:

"Chapter 8, Part 1: LSTM networks - Explains the LSTM cell with its forget and input gates and how they address vanishing gradients. Follows the introduction to RNNs."

"Chapter 6, Part 4: Word2Vec - Presents the skip-gram model and how it predicts context words from a target word. Word embeddings were introduced just before."

Write a similarly short context (at most {{token_budget}} tokens) for the excerpt above. Focus on the main topic and where it sits in the lecture."#.to_string(),

            fallback: "{{chapter}}, Video: {{title}}, Timestamp: {{start}}s-{{end}}s".to_string(),
        }
    }
}

impl Prompts {
    /// Load prompts from the default location, with optional custom directory and variables.
    pub fn load(
        custom_dir: Option<&str>,
        custom_variables: Option<&HashMap<String, String>>,
    ) -> crate::error::Result<Self> {
        let mut prompts = Prompts::default();

        if let Some(vars) = custom_variables {
            prompts.variables = vars.clone();
        }

        if let Some(dir) = custom_dir {
            let custom_path = PathBuf::from(shellexpand::tilde(dir).to_string());

            let context_path = custom_path.join("context.toml");
            if context_path.exists() {
                let content = std::fs::read_to_string(&context_path)?;
                prompts.context = toml::from_str(&content)?;
            }
        }

        Ok(prompts)
    }

    /// Render a prompt template with the given variables.
    pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
        let mut result = template.to_string();
        for (key, value) in vars {
            result = result.replace(&format!("{{{{{}}}}}", key), value);
        }
        result
    }

    /// Render a prompt template with both provided variables and custom config variables.
    /// Provided variables take precedence over custom config variables.
    pub fn render_with_custom(&self, template: &str, vars: &HashMap<String, String>) -> String {
        let mut merged = self.variables.clone();
        for (key, value) in vars {
            merged.insert(key.clone(), value.clone());
        }
        Self::render(template, &merged)
    }
}
