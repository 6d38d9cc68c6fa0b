//! Prompt templates.
//!
//! Templates are markdown files whose stem is the template key. Placeholders
//! are written as `{name}` and substituted verbatim; the core never inspects
//! template text beyond that.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub const JUDGE: &str = "judge";
pub const PHASE: &str = "phase";
pub const DISCUSSION: &str = "discussion";
pub const CODING: &str = "coding";

/// The templates the LLM-backed oracles need.
#[derive(Debug, Clone)]
pub struct PromptSet {
    pub judge: String,
    pub phase: String,
    pub discussion: String,
    pub coding: String,
}

impl PromptSet {
    /// Picks the required templates out of `prompts`.
    pub fn from_map(prompts: &HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| {
            prompts
                .get(key)
                .cloned()
                .with_context(|| format!("Missing prompt template: '{key}'"))
        };
        Ok(Self {
            judge: get(JUDGE)?,
            phase: get(PHASE)?,
            discussion: get(DISCUSSION)?,
            coding: get(CODING)?,
        })
    }

    pub fn load(prompts_path: &Path) -> Result<Self> {
        Self::from_map(&load_prompts(prompts_path)?)
    }
}

/// Loads every `*.md` file in a directory, keyed by file stem.
pub fn load_prompts(prompts_path: &Path) -> Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    let entries = fs::read_dir(prompts_path)
        .with_context(|| format!("Failed to read prompts directory {}", prompts_path.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?
                .to_string();
            let content = fs::read_to_string(&path)?;
            prompts.insert(prompt_key, content);
        }
    }
    Ok(prompts)
}

/// Replaces each `{key}` in `template` with its value. Substituted values are
/// never scanned again, so braces inside student text are left alone.
pub fn render(template: &str, vars: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let key = &after[..close];
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (v, close))
        });
        match value {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
