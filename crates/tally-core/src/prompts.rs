//! Prompt library for language model calls
//!
//! Prompts are loaded with a two-layer resolution:
//! 1. Check for override in data dir (~/.local/share/tally/prompts/overrides/)
//! 2. Fall back to embedded defaults (compiled into binary)
//!
//! This allows prompt tuning without rebuilding, while upgrades still ship
//! new defaults.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Embedded default prompts (compiled into binary)
mod defaults {
    pub const ASK: &str = include_str!("../../../prompts/ask.md");
    pub const REPORT_NARRATIVE: &str = include_str!("../../../prompts/report_narrative.md");
}

/// Known prompt IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptId {
    /// Free-form question answering over assembled cost context
    Ask,
    /// One-sentence executive summary for the optimization report
    ReportNarrative,
}

impl PromptId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ask => "ask",
            Self::ReportNarrative => "report_narrative",
        }
    }

    pub fn all() -> &'static [PromptId] {
        &[Self::Ask, Self::ReportNarrative]
    }

    fn default_content(&self) -> &'static str {
        match self {
            Self::Ask => defaults::ASK,
            Self::ReportNarrative => defaults::REPORT_NARRATIVE,
        }
    }
}

/// Prompt frontmatter metadata
#[derive(Debug, Clone, Deserialize)]
pub struct PromptMetadata {
    pub id: String,
    /// Version number for tracking changes
    pub version: u32,
}

/// A loaded prompt with metadata and content
#[derive(Debug, Clone)]
pub struct Prompt {
    pub metadata: PromptMetadata,
    /// The prompt content (system + user sections)
    pub content: String,
    /// Whether this came from an override file
    pub is_override: bool,
}

impl Prompt {
    pub fn system_section(&self) -> Option<&str> {
        extract_section(&self.content, "# System")
    }

    pub fn user_section(&self) -> Option<&str> {
        extract_section(&self.content, "# User")
    }

    /// Render the full prompt with `{{var}}` substitution and
    /// `{{#if var}}...{{/if}}` conditional blocks
    pub fn render(&self, vars: &HashMap<&str, &str>) -> String {
        let mut result = remove_unmatched_conditionals(&self.content, vars);
        for (key, value) in vars {
            let pattern = format!("{{{{{}}}}}", key);
            result = result.replace(&pattern, value);
        }
        result
    }
}

/// Prompt library for loading and caching prompts
pub struct PromptLibrary {
    override_dir: Option<PathBuf>,
    cache: HashMap<PromptId, Prompt>,
}

impl PromptLibrary {
    pub fn new() -> Self {
        Self {
            override_dir: default_prompts_dir(),
            cache: HashMap::new(),
        }
    }

    /// Library with a custom override directory
    pub fn with_override_dir(path: PathBuf) -> Self {
        Self {
            override_dir: Some(path),
            cache: HashMap::new(),
        }
    }

    /// Library with no override directory (embedded only)
    pub fn embedded_only() -> Self {
        Self {
            override_dir: None,
            cache: HashMap::new(),
        }
    }

    /// Get a prompt by ID, loading from override or default
    pub fn get(&mut self, id: PromptId) -> Result<&Prompt> {
        if !self.cache.contains_key(&id) {
            let prompt = self.load(id)?;
            self.cache.insert(id, prompt);
        }
        self.cache
            .get(&id)
            .ok_or_else(|| Error::InvalidData(format!("Prompt not cached: {}", id.as_str())))
    }

    fn load(&self, id: PromptId) -> Result<Prompt> {
        if let Some(ref override_dir) = self.override_dir {
            let override_path = override_dir.join(format!("{}.md", id.as_str()));
            if override_path.exists() {
                let content = fs::read_to_string(&override_path).map_err(|e| {
                    Error::InvalidData(format!("Failed to read prompt override: {}", e))
                })?;
                let (metadata, body) = parse_prompt(&content)?;
                return Ok(Prompt {
                    metadata,
                    content: body,
                    is_override: true,
                });
            }
        }

        let (metadata, body) = parse_prompt(id.default_content())?;
        Ok(Prompt {
            metadata,
            content: body,
            is_override: false,
        })
    }

    pub fn has_override(&self, id: PromptId) -> bool {
        self.override_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.md", id.as_str())).exists())
            .unwrap_or(false)
    }

    pub fn override_dir(&self) -> Option<&PathBuf> {
        self.override_dir.as_ref()
    }
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self::new()
    }
}

/// Default prompts override directory
pub fn default_prompts_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("tally").join("prompts").join("overrides"))
}

/// Parse a prompt file into metadata and body
fn parse_prompt(content: &str) -> Result<(PromptMetadata, String)> {
    let content = content.trim();

    if !content.starts_with("---") {
        return Err(Error::InvalidData(
            "Prompt must start with YAML frontmatter (---)".into(),
        ));
    }

    let rest = &content[3..];
    let end = rest.find("---").ok_or_else(|| {
        Error::InvalidData("Prompt frontmatter not closed (missing second ---)".into())
    })?;

    let frontmatter = rest[..end].trim();
    let body = rest[end + 3..].trim();

    let metadata: PromptMetadata = serde_yaml::from_str(frontmatter)
        .map_err(|e| Error::InvalidData(format!("Invalid prompt frontmatter: {}", e)))?;

    Ok((metadata, body.to_string()))
}

/// Extract a `# Header` section from the prompt content
fn extract_section<'a>(content: &'a str, header: &str) -> Option<&'a str> {
    let start = content.find(header)?;
    let after_header = &content[start + header.len()..];
    let end = after_header.find("\n# ").unwrap_or(after_header.len());
    Some(after_header[..end].trim())
}

/// Remove conditional blocks whose variable is absent or empty; unwrap the
/// rest
fn remove_unmatched_conditionals(content: &str, vars: &HashMap<&str, &str>) -> String {
    let mut result = content.to_string();

    loop {
        if let Some(if_start) = result.find("{{#if ") {
            let var_start = if_start + 6;
            if let Some(var_end) = result[var_start..].find("}}") {
                let var_name = &result[var_start..var_start + var_end];
                let block_start = var_start + var_end + 2;

                if let Some(endif_pos) = result[block_start..].find("{{/if}}") {
                    let block_content = &result[block_start..block_start + endif_pos];
                    let full_end = block_start + endif_pos + 7;

                    let should_include = vars.get(var_name).is_some_and(|v| !v.is_empty());

                    if should_include {
                        result = format!(
                            "{}{}{}",
                            &result[..if_start],
                            block_content,
                            &result[full_end..]
                        );
                    } else {
                        result = format!("{}{}", &result[..if_start], &result[full_end..]);
                    }
                    continue;
                }
            }
        }
        break;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prompt() {
        let content = r#"---
id: test_prompt
version: 2
---

# System
Test system prompt.

# User
Test user prompt with {{variable}}.
"#;

        let (metadata, body) = parse_prompt(content).unwrap();
        assert_eq!(metadata.id, "test_prompt");
        assert_eq!(metadata.version, 2);
        assert!(body.contains("# System"));
        assert!(body.contains("# User"));
    }

    #[test]
    fn test_parse_rejects_missing_frontmatter() {
        assert!(parse_prompt("# System\nNo frontmatter here.").is_err());
    }

    #[test]
    fn test_extract_section() {
        let content = "# System\nSystem content here.\n\n# User\nUser content here.";

        assert_eq!(
            extract_section(content, "# System"),
            Some("System content here.")
        );
        assert_eq!(
            extract_section(content, "# User"),
            Some("User content here.")
        );
    }

    #[test]
    fn test_prompt_render() {
        let content = "---\nid: test\nversion: 1\n---\nQuestion: {{question}}";
        let (metadata, body) = parse_prompt(content).unwrap();
        let prompt = Prompt {
            metadata,
            content: body,
            is_override: false,
        };

        let mut vars = HashMap::new();
        vars.insert("question", "what changed?");

        assert_eq!(prompt.render(&vars), "Question: what changed?");
    }

    #[test]
    fn test_conditional_blocks() {
        let content = "Start{{#if insights}}\nInsights: {{insights}}{{/if}}\nEnd";

        let mut vars = HashMap::new();
        vars.insert("insights", "two findings");
        let result = remove_unmatched_conditionals(content, &vars);
        assert!(result.contains("Insights: {{insights}}"));

        let empty_vars: HashMap<&str, &str> = HashMap::new();
        let result = remove_unmatched_conditionals(content, &empty_vars);
        assert!(!result.contains("Insights:"));
        assert!(result.contains("Start"));
        assert!(result.contains("End"));
    }

    #[test]
    fn test_conditional_with_empty_value_removed() {
        let content = "{{#if history}}History:\n{{history}}{{/if}}Question";

        let mut vars = HashMap::new();
        vars.insert("history", "");
        let result = remove_unmatched_conditionals(content, &vars);
        assert_eq!(result, "Question");
    }

    #[test]
    fn test_default_prompts_parse() {
        for id in PromptId::all() {
            let result = parse_prompt(id.default_content());
            assert!(
                result.is_ok(),
                "Failed to parse {}: {:?}",
                id.as_str(),
                result.err()
            );

            let (metadata, _) = result.unwrap();
            assert_eq!(metadata.id, id.as_str());
        }
    }

    #[test]
    fn test_prompt_library_embedded() {
        let mut lib = PromptLibrary::embedded_only();
        for id in PromptId::all() {
            let prompt = lib.get(*id).unwrap();
            assert!(!prompt.is_override);
        }
    }

    #[test]
    fn test_ask_prompt_renders_question() {
        let mut lib = PromptLibrary::embedded_only();
        let prompt = lib.get(PromptId::Ask).unwrap();

        let mut vars = HashMap::new();
        vars.insert("summary", "Total spend: $100");
        vars.insert("question", "what is my highest cost service?");

        let rendered = prompt.render(&vars);
        assert!(rendered.contains("Total spend: $100"));
        assert!(rendered.contains("what is my highest cost service?"));
        // Unset conditionals disappear entirely
        assert!(!rendered.contains("{{#if"));
        assert!(!rendered.contains("Relevant cost records"));
    }
}
