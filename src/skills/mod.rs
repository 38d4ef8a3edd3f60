//! Skill bundles: directories of documentation (and helper scripts)
//! identified by a `SKILL.md` manifest with YAML frontmatter.
//!
//! The core never executes skills. They are mounted into session
//! workspaces so the agent can read them with ordinary file tools.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const MANIFEST_FILE: &str = "SKILL.md";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Skill {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    /// Source directory the skill is mounted from.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct SkillFrontmatter {
    #[serde(default)]
    id: Option<String>,
    name: String,
    description: String,
    #[serde(default = "default_version")]
    version: String,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

#[derive(Default)]
pub struct SkillRegistry {
    skills: HashMap<String, Skill>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self {
            skills: HashMap::new(),
        }
    }

    /// Scan `roots` for skill directories. Later roots override earlier on
    /// id collision (user skills shadow shipped ones).
    pub fn load_all(&mut self, roots: &[impl AsRef<Path>]) -> Result<()> {
        self.skills.clear();
        for root in roots {
            let root = root.as_ref();
            let entries = match std::fs::read_dir(root) {
                Ok(e) => e,
                Err(_) => continue, // missing root is fine
            };
            for entry in entries.flatten() {
                let dir = entry.path();
                if !dir.is_dir() {
                    continue;
                }
                match Self::parse_skill_dir(&dir) {
                    Ok(Some(skill)) => {
                        self.skills.insert(skill.id.clone(), skill);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!("Skipping invalid skill at {}: {}", dir.display(), e);
                    }
                }
            }
        }
        Ok(())
    }

    fn parse_skill_dir(dir: &Path) -> Result<Option<Skill>> {
        let manifest = dir.join(MANIFEST_FILE);
        if !manifest.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&manifest)?;
        if !content.starts_with("---") {
            anyhow::bail!("manifest must start with YAML frontmatter (---)");
        }
        let parts: Vec<&str> = content.splitn(3, "---").collect();
        if parts.len() < 3 {
            anyhow::bail!("manifest missing closing frontmatter delimiter (---)");
        }
        let front: SkillFrontmatter = serde_yml::from_str(parts[1])?;
        let id = front.id.unwrap_or_else(|| {
            dir.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default()
        });
        Ok(Some(Skill {
            id,
            name: front.name,
            description: front.description,
            version: front.version,
            path: dir.to_path_buf(),
        }))
    }

    pub fn get(&self, id: &str) -> Option<&Skill> {
        self.skills.get(id)
    }

    pub fn list(&self) -> Vec<&Skill> {
        let mut skills: Vec<&Skill> = self.skills.values().collect();
        skills.sort_by(|a, b| a.id.cmp(&b.id));
        skills
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_skill(root: &Path, dir_name: &str, id_line: &str, name: &str) {
        let dir = root.join(dir_name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(MANIFEST_FILE),
            format!(
                "---\n{}name: {}\ndescription: handles {} documents\n---\n# Usage\nRead the docs.\n",
                id_line, name, name
            ),
        )
        .unwrap();
    }

    #[test]
    fn test_load_all_parses_manifests() {
        let root = tempfile::tempdir().unwrap();
        write_skill(root.path(), "pdf", "id: pdf\nversion: \"1.2.0\"\n", "pdf");
        write_skill(root.path(), "sheets", "", "sheets");
        // A directory without a manifest is ignored.
        std::fs::create_dir_all(root.path().join("not-a-skill")).unwrap();

        let mut registry = SkillRegistry::new();
        registry.load_all(&[root.path()]).unwrap();
        assert_eq!(registry.len(), 2);
        let pdf = registry.get("pdf").unwrap();
        assert_eq!(pdf.version, "1.2.0");
        // id defaults to the directory name.
        assert!(registry.get("sheets").is_some());
    }

    #[test]
    fn test_later_roots_override() {
        let shipped = tempfile::tempdir().unwrap();
        let user = tempfile::tempdir().unwrap();
        write_skill(shipped.path(), "pdf", "id: pdf\n", "shipped-pdf");
        write_skill(user.path(), "pdf", "id: pdf\n", "user-pdf");

        let mut registry = SkillRegistry::new();
        registry.load_all(&[shipped.path(), user.path()]).unwrap();
        assert_eq!(registry.get("pdf").unwrap().name, "user-pdf");
    }

    #[test]
    fn test_invalid_manifest_skipped() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("broken");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(MANIFEST_FILE), "no frontmatter here").unwrap();
        let mut registry = SkillRegistry::new();
        registry.load_all(&[root.path()]).unwrap();
        assert!(registry.is_empty());
    }
}
