//! Mode-specific instruction blocks for the assistant.
//!
//! `instructions-header.md` opens a new session; `instructions-<mode>.md`
//! is sent with every request. Files in the configured template directory
//! override the copies built into the binary.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::engine::commands::AgentMode;
use crate::template::render_template_str;

const HEADER: &str = "instructions-header.md";

const BUILTIN_HEADER: &str = include_str!("../../../prompts/instructions-header.md");
const BUILTIN_ASK: &str = include_str!("../../../prompts/instructions-ask.md");
const BUILTIN_PLAN: &str = include_str!("../../../prompts/instructions-plan.md");
const BUILTIN_IMPLEMENT: &str = include_str!("../../../prompts/instructions-implement.md");

/// Values interpolated into the templates.
#[derive(Debug, Clone)]
pub struct PromptVars {
    pub pr_number: u64,
    pub thread_id: String,
    pub branch: String,
    pub mode: AgentMode,
    pub timestamp: String,
}

impl PromptVars {
    fn as_map(&self) -> HashMap<&'static str, String> {
        HashMap::from([
            ("PR_NUMBER", self.pr_number.to_string()),
            ("THREAD_ID", self.thread_id.clone()),
            ("BRANCH", self.branch.clone()),
            ("MODE", self.mode.as_str().to_string()),
            ("TIMESTAMP", self.timestamp.clone()),
        ])
    }
}

pub struct Instructions {
    template_dir: Option<PathBuf>,
}

impl Instructions {
    pub fn new(template_dir: Option<PathBuf>) -> Self {
        Self { template_dir }
    }

    fn mode_file(mode: AgentMode) -> String {
        format!("instructions-{}.md", mode.as_str())
    }

    fn builtin(name: &str) -> &'static str {
        match name {
            HEADER => BUILTIN_HEADER,
            "instructions-ask.md" => BUILTIN_ASK,
            "instructions-plan.md" => BUILTIN_PLAN,
            "instructions-implement.md" => BUILTIN_IMPLEMENT,
            _ => "",
        }
    }

    /// Template text: override file if present and readable, else built-in.
    fn template(&self, name: &str) -> String {
        if let Some(dir) = &self.template_dir {
            let path = dir.join(name);
            match std::fs::read_to_string(&path) {
                Ok(text) => return text,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(path = %path.display(), "template override not found, using built-in");
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "cannot read template, using built-in");
                }
            }
        }
        Self::builtin(name).to_string()
    }

    /// Render the instruction block; the header only opens new sessions.
    pub fn build(&self, vars: &PromptVars, include_header: bool) -> String {
        let map = vars.as_map();
        let mut names = Vec::with_capacity(2);
        if include_header {
            names.push(HEADER.to_string());
        }
        names.push(Self::mode_file(vars.mode));

        names
            .iter()
            .map(|name| render_template_str(&self.template(name), &map).trim().to_string())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// The document handed to the assistant CLI.
pub fn combine(instructions: &str, context: &str) -> String {
    format!("# Instructions\n\n{instructions}\n\n---\n\n# Context\n\n{context}")
}
