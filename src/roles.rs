//! Data-driven agent roles
//!
//! A role is persona text plus the capabilities it may call. Built-in roles
//! can be overridden, and new ones added, from the config file or from YAML
//! files in `.boardroom/roles/`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

use crate::config::{Config, RoleConfig};
use crate::workspace::{validate_role, WorkspaceStore};
use crate::{Error, Result};

/// Persona and capability surface of one agent role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleDescriptor {
    pub name: String,
    pub description: String,
    /// Persona template; `{project_id}`, `{role}` and `{workspace_path}` are substituted
    pub persona: String,
    /// Module or capability names this role may call (empty = all)
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl RoleDescriptor {
    fn from_config(name: &str, config: &RoleConfig) -> Self {
        Self {
            name: name.to_string(),
            description: config.description.clone(),
            persona: config.persona.clone(),
            tools: config.tools.clone(),
            model: config.model.clone(),
        }
    }

    /// Persona text with placeholders filled in for one workspace
    ///
    /// Unknown `{placeholders}` are left as written.
    pub fn render_persona(&self, workspace: &WorkspaceStore) -> String {
        let root = workspace.root().display().to_string();
        let re = match Regex::new(r"\{(project_id|role|workspace_path)\}") {
            Ok(re) => re,
            Err(_) => return self.persona.clone(),
        };

        re.replace_all(&self.persona, |caps: &regex::Captures| match &caps[1] {
            "project_id" => workspace.project_id().to_string(),
            "role" => self.name.clone(),
            _ => root.clone(),
        })
        .into_owned()
    }
}

/// All roles known to a runtime
#[derive(Debug, Clone)]
pub struct RoleCatalog {
    roles: BTreeMap<String, RoleDescriptor>,
}

impl RoleCatalog {
    /// The four built-in roles
    pub fn builtin() -> Self {
        let roles = builtin_roles()
            .into_iter()
            .map(|role| (role.name.clone(), role))
            .collect();
        Self { roles }
    }

    /// Built-ins, then `[roles]` from config, then `*.yaml` in `roles_dir`
    pub fn load(config: &Config, roles_dir: Option<&Path>) -> Result<Self> {
        let mut catalog = Self::builtin();

        for (name, role) in &config.roles {
            catalog.insert_checked(RoleDescriptor::from_config(name, role));
        }

        if let Some(dir) = roles_dir.filter(|d| d.is_dir()) {
            catalog.load_dir(dir)?;
        }

        Ok(catalog)
    }

    /// Add or replace a role
    pub fn insert(&mut self, role: RoleDescriptor) {
        debug!(role = %role.name, "Registered role");
        self.roles.insert(role.name.clone(), role);
    }

    /// Insert unless the name cannot serve as a memory directory
    fn insert_checked(&mut self, role: RoleDescriptor) {
        match validate_role(&role.name) {
            Ok(()) => self.insert(role),
            Err(e) => warn!("Skipping role '{}': {}", role.name, e),
        }
    }

    pub fn get(&self, name: &str) -> Result<&RoleDescriptor> {
        self.roles
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("Unknown role '{}'", name)))
    }

    /// Role names in sorted order
    pub fn names(&self) -> Vec<&str> {
        self.roles.keys().map(String::as_str).collect()
    }

    fn load_dir(&mut self, dir: &Path) -> Result<()> {
        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("yaml" | "yml")))
            .collect();
        paths.sort();

        for path in paths {
            let content = std::fs::read_to_string(&path)?;
            match serde_yaml::from_str::<RoleConfig>(&content) {
                Ok(role) => {
                    let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                        continue;
                    };
                    self.insert_checked(RoleDescriptor::from_config(name, &role));
                }
                Err(e) => warn!("Skipping role file {}: {}", path.display(), e),
            }
        }

        Ok(())
    }
}

fn builtin_roles() -> Vec<RoleDescriptor> {
    vec![
        RoleDescriptor {
            name: "ceo".to_string(),
            description: "Strategy, priorities and team coordination".to_string(),
            persona: "You are the CEO agent for project {project_id}. You set product \
                      strategy, break goals into tasks for the frontend, backend and devops \
                      agents, and record key decisions. Coordinate through the team board \
                      and shared notes. Your workspace is {workspace_path}."
                .to_string(),
            tools: vec!["team".into(), "filesystem".into(), "github".into()],
            model: None,
        },
        RoleDescriptor {
            name: "frontend".to_string(),
            description: "User interface and client-side implementation".to_string(),
            persona: "You are the {role} engineer for project {project_id}. You build and \
                      maintain the user interface in the repository under repo/. Read the \
                      team board for assignments and report progress there."
                .to_string(),
            tools: vec!["filesystem".into(), "git".into(), "team".into()],
            model: None,
        },
        RoleDescriptor {
            name: "backend".to_string(),
            description: "Services, data model and APIs".to_string(),
            persona: "You are the {role} engineer for project {project_id}. You design \
                      services, data models and APIs in the repository under repo/. Read the \
                      team board for assignments and report progress there."
                .to_string(),
            tools: vec!["filesystem".into(), "git".into(), "team".into()],
            model: None,
        },
        RoleDescriptor {
            name: "devops".to_string(),
            description: "Build, release and repository hygiene".to_string(),
            persona: "You are the {role} engineer for project {project_id}. You own the \
                      build, CI, releases and issue tracking. Keep the repository healthy \
                      and milestones current."
                .to_string(),
            tools: vec![
                "filesystem".into(),
                "git".into(),
                "github".into(),
                "team".into(),
            ],
            model: None,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_roles() {
        let catalog = RoleCatalog::builtin();
        assert_eq!(catalog.names(), vec!["backend", "ceo", "devops", "frontend"]);
        assert!(matches!(catalog.get("intern"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_render_persona() {
        let base = tempfile::tempdir().unwrap();
        let ws = WorkspaceStore::create(base.path(), "p1").unwrap();
        let role = RoleDescriptor {
            name: "qa".to_string(),
            description: String::new(),
            persona: "{role} on {project_id} at {workspace_path}, keep {unknown}".to_string(),
            tools: vec![],
            model: None,
        };

        let rendered = role.render_persona(&ws);
        assert!(rendered.starts_with("qa on p1 at "));
        assert!(rendered.contains(&ws.root().display().to_string()));
        assert!(rendered.ends_with("keep {unknown}"));
    }

    #[test]
    fn test_config_and_yaml_overrides() {
        let mut config = Config::default();
        config.roles.insert(
            "ceo".to_string(),
            RoleConfig {
                description: "Custom".to_string(),
                persona: "Lead {project_id}".to_string(),
                tools: vec!["team".to_string()],
                model: Some("gpt-4o-mini".to_string()),
            },
        );

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("qa.yaml"),
            "description: Quality\npersona: Test everything\ntools: [filesystem]\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.yaml"), ": : :").unwrap();
        std::fs::write(
            dir.path().join("shared.yaml"),
            "description: Clash\npersona: Overwrite the activity log\n",
        )
        .unwrap();

        let catalog = RoleCatalog::load(&config, Some(dir.path())).unwrap();
        let ceo = catalog.get("ceo").unwrap();
        assert_eq!(ceo.description, "Custom");
        assert_eq!(ceo.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(catalog.get("qa").unwrap().tools, vec!["filesystem"]);
        assert!(catalog.get("broken").is_err());
        assert!(catalog.get("shared").is_err());
    }
}
