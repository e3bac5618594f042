//! Skills: directory-packaged bundles of instructions plus scripts.
//!
//! A skill lives in its own subdirectory of the skills root and carries a
//! `skill.yaml` manifest:
//!
//! ```yaml
//! name: unit-conversion
//! description: Convert between measurement units
//! instructions: |
//!   Use convert() from the injected scripts for unit conversion.
//! scripts:
//!   - convert.py
//! ```
//!
//! At agent setup the manager scans the root, parses manifests, and exposes
//! (a) the enabled skills' instructions for the system prompt and (b) their
//! scripts for injection into the interpreter namespace. A `skill` tool loads
//! a skill's full content on demand.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::warn;
use walkdir::WalkDir;

use crate::tools::{ParamSpec, Tool, ToolError, ToolSpec};

use super::ToolCollection;

/// Tool name for loading a skill's content.
pub const TOOL_SKILL: &str = "skill";

#[derive(Debug, Deserialize)]
struct SkillManifest {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    instructions: String,
    #[serde(default)]
    scripts: Vec<String>,
}

/// One loaded skill.
#[derive(Clone, Debug)]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub instructions: String,
    /// (file name, source) pairs injected into the interpreter namespace.
    pub scripts: Vec<(String, String)>,
}

/// Scans a skills root and owns the loaded skill set.
pub struct SkillManager {
    root: PathBuf,
    skills: RwLock<Vec<Skill>>,
    healthy: AtomicBool,
    set_up: AtomicBool,
    ignore_setup_errors: bool,
}

impl SkillManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            skills: RwLock::new(Vec::new()),
            healthy: AtomicBool::new(false),
            set_up: AtomicBool::new(false),
            ignore_setup_errors: false,
        }
    }

    pub fn with_ignore_setup_errors(mut self, ignore: bool) -> Self {
        self.ignore_setup_errors = ignore;
        self
    }

    fn load_skill(dir: &Path) -> Result<Skill, ToolError> {
        let manifest_path = dir.join("skill.yaml");
        let raw = std::fs::read_to_string(&manifest_path)
            .map_err(|e| ToolError::Transport(format!("read {}: {e}", manifest_path.display())))?;
        let manifest: SkillManifest = serde_yaml::from_str(&raw)
            .map_err(|e| ToolError::InvalidInput(format!("parse {}: {e}", manifest_path.display())))?;

        let mut scripts = Vec::with_capacity(manifest.scripts.len());
        for script in &manifest.scripts {
            let path = dir.join(script);
            let source = std::fs::read_to_string(&path)
                .map_err(|e| ToolError::Transport(format!("read {}: {e}", path.display())))?;
            scripts.push((script.clone(), source));
        }

        Ok(Skill {
            name: manifest.name,
            description: manifest.description,
            instructions: manifest.instructions,
            scripts,
        })
    }

    fn scan(&self) -> Result<Vec<Skill>, ToolError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut skills = Vec::new();
        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(Result::ok)
        {
            let dir = entry.path();
            if !dir.is_dir() || !dir.join("skill.yaml").is_file() {
                continue;
            }
            match Self::load_skill(dir) {
                Ok(skill) => skills.push(skill),
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "skipping unparseable skill");
                }
            }
        }
        skills.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(skills)
    }

    /// Snapshot of the loaded skills.
    pub async fn skills(&self) -> Vec<Skill> {
        self.skills.read().await.clone()
    }

    /// Combined instruction block appended to the agent's system prompt.
    pub async fn instructions(&self) -> String {
        let skills = self.skills.read().await;
        let mut out = String::new();
        for skill in skills.iter().filter(|s| !s.instructions.is_empty()) {
            out.push_str(&format!(
                "## Skill: {}\n{}\n",
                skill.name,
                skill.instructions.trim_end()
            ));
        }
        out
    }

    /// All (file name, source) pairs, for interpreter namespace injection.
    pub async fn scripts(&self) -> Vec<(String, String)> {
        self.skills
            .read()
            .await
            .iter()
            .flat_map(|s| s.scripts.iter().cloned())
            .collect()
    }
}

#[async_trait]
impl ToolCollection for SkillManager {
    fn name(&self) -> &str {
        "skills"
    }

    async fn setup(&self) -> Result<(), ToolError> {
        if self.set_up.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match self.scan() {
            Ok(skills) => {
                *self.skills.write().await = skills;
                self.healthy.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(e) if self.ignore_setup_errors => {
                warn!(error = %e, "skills setup failed, collection disabled");
                self.healthy.store(false, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn close(&self) -> Result<(), ToolError> {
        self.healthy.store(false, Ordering::SeqCst);
        self.skills.write().await.clear();
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        if !self.is_healthy() {
            return Vec::new();
        }
        vec![Arc::new(SkillTool {
            skills: self
                .skills
                .try_read()
                .map(|s| s.clone())
                .unwrap_or_default(),
        })]
    }
}

/// Tool that returns a skill's full content by name.
pub struct SkillTool {
    skills: Vec<Skill>,
}

#[async_trait]
impl Tool for SkillTool {
    fn name(&self) -> &str {
        TOOL_SKILL
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            TOOL_SKILL,
            "Load a skill by name. Use when a task matches a known skill; returns \
             the skill's instructions and script sources.",
        )
        .with_input("name", ParamSpec::required("string", "Skill name."))
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let name = args
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidInput("missing name".to_string()))?;
        let Some(skill) = self.skills.iter().find(|s| s.name == name) else {
            let available: Vec<&str> = self.skills.iter().map(|s| s.name.as_str()).collect();
            return Err(ToolError::InvalidInput(format!(
                "skill '{}' not found. Available: {}",
                name,
                available.join(", ")
            )));
        };
        let mut content = format!(
            "<skill_content name=\"{}\">\n{}\n",
            skill.name, skill.instructions
        );
        for (file, source) in &skill.scripts {
            content.push_str(&format!("\n# {file}\n{source}\n"));
        }
        content.push_str("</skill_content>");
        Ok(json!(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_skill(root: &Path, name: &str, scripts: &[(&str, &str)]) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        let script_list = scripts
            .iter()
            .map(|(f, _)| format!("  - {f}"))
            .collect::<Vec<_>>()
            .join("\n");
        let manifest = format!(
            "name: {name}\ndescription: test skill\ninstructions: |\n  Use {name} helpers.\nscripts:\n{script_list}\n"
        );
        std::fs::write(dir.join("skill.yaml"), manifest).unwrap();
        for (file, source) in scripts {
            std::fs::write(dir.join(file), source).unwrap();
        }
    }

    #[tokio::test]
    async fn setup_scans_skill_directories() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(dir.path(), "conversion", &[("convert.py", "def convert(x):\n    return x\n")]);
        write_skill(dir.path(), "analysis", &[]);

        let manager = SkillManager::new(dir.path());
        manager.setup().await.unwrap();
        let skills = manager.skills().await;
        assert_eq!(skills.len(), 2);
        // sorted by name
        assert_eq!(skills[0].name, "analysis");
        assert_eq!(skills[1].name, "conversion");
        assert_eq!(skills[1].scripts.len(), 1);
    }

    #[tokio::test]
    async fn instructions_concatenate_enabled_skills() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(dir.path(), "conversion", &[]);
        let manager = SkillManager::new(dir.path());
        manager.setup().await.unwrap();
        let text = manager.instructions().await;
        assert!(text.contains("## Skill: conversion"));
        assert!(text.contains("Use conversion helpers."));
    }

    #[tokio::test]
    async fn skill_tool_returns_content_and_lists_available_on_miss() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(dir.path(), "conversion", &[("convert.py", "X = 1\n")]);
        let manager = SkillManager::new(dir.path());
        manager.setup().await.unwrap();
        let tool = manager.tools().into_iter().next().unwrap();

        let out = tool.call(json!({"name": "conversion"})).await.unwrap();
        let text = out.as_str().unwrap();
        assert!(text.contains("<skill_content name=\"conversion\">"));
        assert!(text.contains("X = 1"));

        let err = tool.call(json!({"name": "missing"})).await.unwrap_err();
        assert!(err.to_string().contains("Available: conversion"));
    }

    #[tokio::test]
    async fn missing_root_yields_empty_healthy_collection() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SkillManager::new(dir.path().join("absent"));
        manager.setup().await.unwrap();
        assert!(manager.is_healthy());
        assert!(manager.skills().await.is_empty());
    }

    #[tokio::test]
    async fn close_disables_tools() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(dir.path(), "conversion", &[]);
        let manager = SkillManager::new(dir.path());
        manager.setup().await.unwrap();
        manager.close().await.unwrap();
        assert!(!manager.is_healthy());
        assert!(manager.tools().is_empty());
    }
}
