//! Activation and invocation surface
//!
//! [`AgentRuntime`] owns every open project: its workspace, board,
//! capability registry and the loaded memory of each agent role. One turn at
//! a time runs per (project, role); different roles and projects run
//! concurrently.

use futures::stream::BoxStream;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::board::CoordinationBoard;
use crate::completion::{CompletionClient, OpenAiClient};
use crate::config::Config;
use crate::memory::{AgentMemoryStore, AgentRecord, DecisionEntry};
use crate::orchestrator::{StreamingOrchestrator, TurnEvent, TurnOutcome, TurnSpec};
use crate::roles::RoleCatalog;
use crate::tools::{
    standard_modules, CapabilityDescriptor, CapabilityRegistry, ToolContext,
};
use crate::workspace::{ActivityLog, WorkspaceStore};
use crate::Result;

/// Directory of extra role definitions, relative to the working directory
const ROLES_DIR: &str = ".boardroom/roles";

type AgentHandle = Arc<Mutex<AgentMemoryStore>>;

/// Everything open for one project
struct ProjectContext {
    workspace: WorkspaceStore,
    board: Arc<CoordinationBoard>,
    orchestrator: Arc<StreamingOrchestrator>,
    agents: Mutex<HashMap<String, AgentHandle>>,
}

/// Process-wide entry point for agents
pub struct AgentRuntime {
    config: Config,
    client: Arc<dyn CompletionClient>,
    roles: RoleCatalog,
    projects: Mutex<HashMap<String, Arc<ProjectContext>>>,
}

impl AgentRuntime {
    pub fn new(config: Config, client: Arc<dyn CompletionClient>, roles: RoleCatalog) -> Self {
        Self {
            config,
            client,
            roles,
            projects: Mutex::new(HashMap::new()),
        }
    }

    /// Runtime backed by the configured OpenAI-compatible service
    pub fn from_config(config: Config) -> Result<Self> {
        let client = Arc::new(OpenAiClient::new(&config.completion)?);
        let roles = RoleCatalog::load(&config, Some(Path::new(ROLES_DIR)))?;
        Ok(Self::new(config, client, roles))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn roles(&self) -> &RoleCatalog {
        &self.roles
    }

    /// Create the role's record if needed and store its context
    pub async fn initialize(&self, project_id: &str, role: &str, context: Value) -> Result<AgentRecord> {
        let project = self.project(project_id, true).await?;
        let agent = self.agent(&project, role).await?;

        let mut memory = agent.lock().await;
        if !context.is_null() {
            memory.set_context(context).await?;
        }
        project.workspace.touch()?;

        info!(project = project_id, role, "Agent initialized");
        Ok(memory.status())
    }

    /// Run one turn to completion
    pub async fn invoke(&self, project_id: &str, role: &str, message: &str) -> Result<TurnOutcome> {
        let project = self.project(project_id, true).await?;
        let spec = self.turn_spec(&project, role)?;
        let agent = self.agent(&project, role).await?;

        let mut memory = agent.lock().await;
        let outcome = project
            .orchestrator
            .invoke(&mut memory, &spec, message)
            .await?;
        project.workspace.touch()?;
        Ok(outcome)
    }

    /// Run one turn, yielding events as they are produced
    ///
    /// Waits for any turn already running for this agent before starting.
    pub async fn invoke_streaming(
        &self,
        project_id: &str,
        role: &str,
        message: &str,
    ) -> Result<BoxStream<'static, TurnEvent>> {
        let project = self.project(project_id, true).await?;
        let spec = self.turn_spec(&project, role)?;
        let agent = self.agent(&project, role).await?;

        let memory = agent.lock_owned().await;
        project.workspace.touch()?;
        Ok(Arc::clone(&project.orchestrator).invoke_streaming(memory, spec, message.to_string()))
    }

    /// Snapshot of one agent; the project must exist
    ///
    /// Never creates a record: a role that was not activated reports
    /// `uninitialized`.
    pub async fn status(&self, project_id: &str, role: &str) -> Result<AgentRecord> {
        let project = self.project(project_id, false).await?;
        self.roles.get(role)?;

        let loaded = project.agents.lock().await.get(role).cloned();
        match loaded {
            Some(agent) => Ok(agent.lock().await.status()),
            None => Ok(AgentMemoryStore::load(&project.workspace, role)?.status()),
        }
    }

    /// Append to an agent's decision log, activating it if needed
    pub async fn record_decision(
        &self,
        project_id: &str,
        role: &str,
        entry: DecisionEntry,
    ) -> Result<AgentRecord> {
        let project = self.project(project_id, false).await?;
        let agent = self.agent(&project, role).await?;

        let mut memory = agent.lock().await;
        memory.record_decision(entry).await?;
        project.workspace.touch()?;
        Ok(memory.status())
    }

    /// Capabilities offered to `role`, or all of them
    pub async fn capabilities(
        &self,
        project_id: &str,
        role: Option<&str>,
    ) -> Result<Vec<CapabilityDescriptor>> {
        let project = self.project(project_id, true).await?;
        let registry = project.orchestrator.registry();
        match role {
            Some(role) => Ok(registry.list_permitted(&self.roles.get(role)?.tools)),
            None => Ok(registry.list_capabilities()),
        }
    }

    /// The project's coordination board; the project must exist
    pub async fn board(&self, project_id: &str) -> Result<Arc<CoordinationBoard>> {
        let project = self.project(project_id, false).await?;
        Ok(Arc::clone(&project.board))
    }

    /// Workspace handle; the project must exist
    pub async fn workspace(&self, project_id: &str) -> Result<WorkspaceStore> {
        let project = self.project(project_id, false).await?;
        Ok(project.workspace.clone())
    }

    /// Close the project and delete its workspace
    ///
    /// Waits for running turns of loaded agents to finish first.
    pub async fn teardown(&self, project_id: &str) -> Result<()> {
        let project = self.project(project_id, false).await?;
        self.projects.lock().await.remove(project_id);

        let agents: Vec<AgentHandle> = project.agents.lock().await.values().cloned().collect();
        for agent in agents {
            drop(agent.lock().await);
        }

        project.workspace.clone().teardown()
    }

    fn turn_spec(&self, project: &ProjectContext, role: &str) -> Result<TurnSpec> {
        let descriptor = self.roles.get(role)?;
        Ok(TurnSpec::for_role(
            descriptor,
            &project.workspace,
            &self.config.completion.model,
        ))
    }

    /// Open (or with `create`, create) the project and cache it
    async fn project(&self, project_id: &str, create: bool) -> Result<Arc<ProjectContext>> {
        let mut projects = self.projects.lock().await;
        if let Some(project) = projects.get(project_id) {
            return Ok(Arc::clone(project));
        }

        let base = self.config.workspace_base();
        let workspace = if create {
            WorkspaceStore::create(&base, project_id)?
        } else {
            WorkspaceStore::open(&base, project_id)?
        };

        let board = Arc::new(CoordinationBoard::new(
            workspace.clone(),
            self.config.board.capacity,
        ));

        let ctx = ToolContext {
            workspace: workspace.clone(),
            board: Arc::clone(&board),
            config: self.config.clone(),
        };
        let mut registry =
            CapabilityRegistry::new().with_activity_log(ActivityLog::new(workspace.clone()));
        for module in standard_modules(&ctx)? {
            registry.register_module(module)?;
        }
        debug!(project = project_id, capabilities = registry.len(), "Opened project");

        let orchestrator = Arc::new(StreamingOrchestrator::new(
            Arc::clone(&self.client),
            Arc::new(registry),
            self.config.completion.clone(),
            self.config.orchestrator.clone(),
        ));

        let project = Arc::new(ProjectContext {
            workspace,
            board,
            orchestrator,
            agents: Mutex::new(HashMap::new()),
        });
        projects.insert(project_id.to_string(), Arc::clone(&project));
        Ok(project)
    }

    /// Load an agent's memory once and share the handle
    async fn agent(&self, project: &ProjectContext, role: &str) -> Result<AgentHandle> {
        self.roles.get(role)?;

        let mut agents = project.agents.lock().await;
        if let Some(agent) = agents.get(role) {
            return Ok(Arc::clone(agent));
        }

        let memory = AgentMemoryStore::activate(&project.workspace, role)?;
        let agent = Arc::new(Mutex::new(memory));
        agents.insert(role.to_string(), Arc::clone(&agent));
        Ok(agent)
    }
}

impl std::fmt::Debug for AgentRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRuntime")
            .field("client", &self.client.name())
            .field("roles", &self.roles.names())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::ScriptedClient;
    use crate::memory::AgentStatus;
    use crate::Error;
    use futures::StreamExt;
    use serde_json::json;

    fn runtime(client: &ScriptedClient) -> (tempfile::TempDir, AgentRuntime) {
        let base = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.workspace.base_dir = base.path().to_path_buf();
        let runtime = AgentRuntime::new(config, Arc::new(client.clone()), RoleCatalog::builtin());
        (base, runtime)
    }

    #[tokio::test]
    async fn test_initialize_stores_context() {
        let client = ScriptedClient::new();
        let (_base, runtime) = runtime(&client);

        let record = runtime
            .initialize("p1", "ceo", json!({"company": "Acme"}))
            .await
            .unwrap();
        assert_eq!(record.status, AgentStatus::Initialized);
        assert_eq!(record.context["company"], "Acme");

        let status = runtime.status("p1", "ceo").await.unwrap();
        assert_eq!(status.project_id, "p1");
    }

    #[tokio::test]
    async fn test_unknown_role_and_project() {
        let client = ScriptedClient::new();
        let (_base, runtime) = runtime(&client);

        assert!(matches!(
            runtime.initialize("p1", "intern", Value::Null).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            runtime.status("missing", "ceo").await,
            Err(Error::NotFound(_))
        ));
        tokio_test::assert_err!(runtime.initialize("../p1", "ceo", Value::Null).await);
    }

    #[tokio::test]
    async fn test_capabilities_follow_role() {
        let client = ScriptedClient::new();
        let (_base, runtime) = runtime(&client);

        let all = runtime.capabilities("p1", None).await.unwrap();
        let ceo = runtime.capabilities("p1", Some("ceo")).await.unwrap();
        assert!(all.iter().any(|c| c.name == "commit_changes"));
        assert!(!ceo.iter().any(|c| c.module == "git"));
        assert!(ceo.iter().any(|c| c.name == "team_write_message"));
    }

    #[tokio::test]
    async fn test_streaming_turns_for_one_agent_are_serialized() {
        let client = ScriptedClient::new()
            .then_text("first answer")
            .then_text("second answer")
            .with_fragment_delay(std::time::Duration::from_millis(5));
        let (_base, runtime) = runtime(&client);

        let first = runtime.invoke_streaming("p1", "ceo", "one").await.unwrap();
        let second = async {
            let stream = runtime.invoke_streaming("p1", "ceo", "two").await.unwrap();
            stream.collect::<Vec<_>>().await
        };
        let (_, _) = tokio::join!(first.collect::<Vec<_>>(), second);

        let record = runtime.status("p1", "ceo").await.unwrap();
        let texts: Vec<_> = record.conversation.iter().filter_map(|t| t.text()).collect();
        assert_eq!(texts, vec!["one", "first answer", "two", "second answer"]);
    }

    #[tokio::test]
    async fn test_status_does_not_activate() {
        let client = ScriptedClient::new();
        let (base, runtime) = runtime(&client);

        runtime.initialize("p1", "ceo", Value::Null).await.unwrap();
        let record = runtime.status("p1", "devops").await.unwrap();
        assert_eq!(record.status, AgentStatus::Uninitialized);
        assert!(!base.path().join("p1/memory/devops").exists());

        assert!(matches!(
            runtime.status("p1", "intern").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_record_decision_persists() {
        let client = ScriptedClient::new();
        let (base, runtime) = runtime(&client);
        runtime.initialize("p1", "ceo", Value::Null).await.unwrap();

        let record = runtime
            .record_decision(
                "p1",
                "ceo",
                DecisionEntry::new("Pricing", "Freemium tier").with_rationale("growth"),
            )
            .await
            .unwrap();
        assert_eq!(record.decisions.len(), 1);

        // A fresh runtime reads it back from disk
        let mut config = Config::default();
        config.workspace.base_dir = base.path().to_path_buf();
        let fresh = AgentRuntime::new(config, Arc::new(client.clone()), RoleCatalog::builtin());
        let record = fresh.status("p1", "ceo").await.unwrap();
        assert_eq!(record.decisions[0].title, "Pricing");
        assert_eq!(record.decisions[0].rationale.as_deref(), Some("growth"));

        tokio_test::assert_err!(
            runtime
                .record_decision("missing", "ceo", DecisionEntry::new("x", "y"))
                .await
        );
    }

    #[tokio::test]
    async fn test_teardown_removes_workspace() {
        let client = ScriptedClient::new();
        let (base, runtime) = runtime(&client);

        runtime.initialize("p1", "ceo", Value::Null).await.unwrap();
        assert!(base.path().join("p1").exists());

        tokio_test::assert_ok!(runtime.teardown("p1").await);
        assert!(!base.path().join("p1").exists());
        tokio_test::assert_err!(runtime.board("p1").await);
    }
}
