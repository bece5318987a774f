/*
   Manages the risk-scan prompt with a built-in template and optional
   user-provided overrides stored in the application data directory.
*/

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::warn;
use crate::config::Config;

const BUILTIN_SCAN_PROMPT: &str = include_str!("templates/risk_scan_prompt.md");

#[derive(Clone)]
pub struct PromptLoader {
    prompts_dir: PathBuf,
}

impl PromptLoader {
    pub fn new(prompts_dir: impl Into<PathBuf>) -> Self {
        Self {
            prompts_dir: prompts_dir.into(),
        }
    }

    /// Loader rooted at `<data dir>/prompts`, seeding `default.md` with the
    /// built-in template so users have something to copy from.
    pub fn from_app_dirs() -> Result<Self> {
        let project_dirs = Config::get_app_dirs()?;
        let prompts_dir = project_dirs.data_dir().join("prompts");

        std::fs::create_dir_all(&prompts_dir)?;

        let default_prompt_path = prompts_dir.join("default.md");
        if !default_prompt_path.exists() {
            std::fs::write(&default_prompt_path, BUILTIN_SCAN_PROMPT)?;
        }

        Ok(Self { prompts_dir })
    }

    pub fn builtin() -> &'static str {
        BUILTIN_SCAN_PROMPT
    }

    pub fn prompts_dir(&self) -> &Path {
        &self.prompts_dir
    }

    pub fn load_prompt(&self, template_name: Option<&str>) -> String {
        match template_name {
            None => BUILTIN_SCAN_PROMPT.to_string(),
            Some(name) => {
                let prompt_path = self.prompts_dir.join(format!("{}.md", name));
                match std::fs::read_to_string(&prompt_path) {
                    Ok(content) if content.contains("{text}") => content,
                    Ok(_) => {
                        warn!("Prompt template '{}' has no {{text}} marker, using built-in", name);
                        BUILTIN_SCAN_PROMPT.to_string()
                    }
                    Err(_) => {
                        warn!("Prompt template '{}' not found, using built-in", name);
                        BUILTIN_SCAN_PROMPT.to_string()
                    }
                }
            }
        }
    }

    pub fn format_prompt(template: &str, text: &str) -> String {
        template.replace("{text}", text)
    }
}
