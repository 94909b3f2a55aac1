//! Per-agent persistent memory
//!
//! One record per (project, role), stored under `memory/<role>/`:
//!
//! ```text
//! conversation.jsonl   ordered turns, the causal history fed back to the model
//! decisions.jsonl      structured business decisions
//! status.json          status, initialization context, timestamps
//! ```
//!
//! Every mutation rewrites the affected file atomically before returning, so
//! a crash can lose at most the in-flight change and never corrupts earlier
//! turns. Unreadable files are moved aside and replaced by an empty record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::tools::DispatchOutcome;
use crate::workspace::{validate_role, WorkspaceStore, MEMORY_DIR};
use crate::Result;

const CONVERSATION_FILE: &str = "conversation.jsonl";
const DECISIONS_FILE: &str = "decisions.jsonl";
const STATUS_FILE: &str = "status.json";

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Agent,
    Tool,
}

/// A tool call and its outcome, as recorded in history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExchange {
    pub call_id: String,
    pub capability: String,
    pub arguments: Value,
    pub outcome: DispatchOutcome,
}

/// Turn payload: plain text or a structured tool exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnContent {
    Text(String),
    Tool(ToolExchange),
}

/// One entry of an agent's conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: TurnContent,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: TurnContent::Text(text.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Agent,
            content: TurnContent::Text(text.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn tool(exchange: ToolExchange) -> Self {
        Self {
            role: TurnRole::Tool,
            content: TurnContent::Tool(exchange),
            timestamp: Utc::now(),
        }
    }

    /// Text content, if this is a text turn
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            TurnContent::Text(text) => Some(text),
            TurnContent::Tool(_) => None,
        }
    }
}

/// Auditable business decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionEntry {
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl DecisionEntry {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            rationale: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }
}

/// Agent lifecycle status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Uninitialized,
    Initialized,
    Active,
    Error,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentStatus::Uninitialized => "uninitialized",
            AgentStatus::Initialized => "initialized",
            AgentStatus::Active => "active",
            AgentStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Full state of one agent within one project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_role: String,
    pub project_id: String,
    pub status: AgentStatus,
    /// Context supplied at initialization
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub conversation: Vec<ConversationTurn>,
    #[serde(default)]
    pub decisions: Vec<DecisionEntry>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_active: Option<DateTime<Utc>>,
}

/// Persisted status document
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StatusSnapshot {
    agent_role: String,
    project_id: String,
    status: AgentStatus,
    #[serde(default)]
    context: Value,
    created_at: DateTime<Utc>,
    #[serde(default)]
    last_active: Option<DateTime<Utc>>,
}

/// Loaded memory of one agent, flushed on every mutation
#[derive(Debug)]
pub struct AgentMemoryStore {
    workspace: WorkspaceStore,
    dir: PathBuf,
    record: AgentRecord,
}

impl AgentMemoryStore {
    /// Load the record for `role`, or create an empty `initialized` one
    pub fn activate(workspace: &WorkspaceStore, role: &str) -> Result<Self> {
        let mut store = Self::load(workspace, role)?;

        if store.record.status == AgentStatus::Uninitialized {
            store.record.status = AgentStatus::Initialized;
            store.save_status()?;
            info!(project = %store.record.project_id, role, "Initialized agent memory");
        } else {
            debug!(
                project = %store.record.project_id,
                role,
                turns = store.record.conversation.len(),
                "Resumed agent memory"
            );
        }

        Ok(store)
    }

    /// Read whatever is persisted for `role` without creating anything
    ///
    /// A role that was never activated comes back `uninitialized`.
    pub fn load(workspace: &WorkspaceStore, role: &str) -> Result<Self> {
        validate_role(role)?;
        let dir = Path::new(MEMORY_DIR).join(role);

        let mut store = Self {
            workspace: workspace.clone(),
            dir,
            record: AgentRecord {
                agent_role: role.to_string(),
                project_id: workspace.project_id().to_string(),
                status: AgentStatus::Uninitialized,
                context: Value::Null,
                conversation: Vec::new(),
                decisions: Vec::new(),
                created_at: Utc::now(),
                last_active: None,
            },
        };

        if let Some(snapshot) = store.load_status() {
            store.record.status = snapshot.status;
            store.record.context = snapshot.context;
            store.record.created_at = snapshot.created_at;
            store.record.last_active = snapshot.last_active;
        }
        store.record.conversation = store.load_lines(CONVERSATION_FILE);
        store.record.decisions = store.load_lines(DECISIONS_FILE);

        Ok(store)
    }

    pub fn role(&self) -> &str {
        &self.record.agent_role
    }

    pub fn project_id(&self) -> &str {
        &self.record.project_id
    }

    pub fn record(&self) -> &AgentRecord {
        &self.record
    }

    /// Snapshot for external status queries
    pub fn status(&self) -> AgentRecord {
        self.record.clone()
    }

    /// The most recent `n` turns, oldest first
    pub fn recent_turns(&self, n: usize) -> &[ConversationTurn] {
        let conversation = &self.record.conversation;
        &conversation[conversation.len().saturating_sub(n)..]
    }

    /// Append one turn and flush it durably
    pub async fn append(&mut self, turn: ConversationTurn) -> Result<()> {
        self.append_all(vec![turn]).await
    }

    /// Append the turns of one exchange with a single atomic write
    pub async fn append_all(&mut self, turns: Vec<ConversationTurn>) -> Result<()> {
        let previous = self.record.conversation.len();
        self.record.conversation.extend(turns);

        if let Err(e) = self
            .workspace
            .write_jsonl_async(self.dir.join(CONVERSATION_FILE), &self.record.conversation)
            .await
        {
            self.record.conversation.truncate(previous);
            return Err(e);
        }
        Ok(())
    }

    /// Append to the decision log
    pub async fn record_decision(&mut self, entry: DecisionEntry) -> Result<()> {
        self.record.decisions.push(entry);

        if let Err(e) = self
            .workspace
            .write_jsonl_async(self.dir.join(DECISIONS_FILE), &self.record.decisions)
            .await
        {
            self.record.decisions.pop();
            return Err(e);
        }
        info!(
            project = %self.record.project_id,
            role = %self.record.agent_role,
            decisions = self.record.decisions.len(),
            "Recorded decision"
        );
        Ok(())
    }

    /// Update status and touch `last_active`
    pub async fn set_status(&mut self, status: AgentStatus) -> Result<()> {
        self.record.status = status;
        self.record.last_active = Some(Utc::now());
        self.workspace
            .write_json_async(self.dir.join(STATUS_FILE), &self.snapshot())
            .await
    }

    /// Replace the initialization context
    pub async fn set_context(&mut self, context: Value) -> Result<()> {
        self.record.context = context;
        self.workspace
            .write_json_async(self.dir.join(STATUS_FILE), &self.snapshot())
            .await
    }

    fn save_status(&self) -> Result<()> {
        self.workspace
            .write_json(self.dir.join(STATUS_FILE), &self.snapshot())
    }

    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            agent_role: self.record.agent_role.clone(),
            project_id: self.record.project_id.clone(),
            status: self.record.status,
            context: self.record.context.clone(),
            created_at: self.record.created_at,
            last_active: self.record.last_active,
        }
    }

    fn load_status(&self) -> Option<StatusSnapshot> {
        let rel = self.dir.join(STATUS_FILE);
        match self.workspace.read_json(&rel) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.quarantine(&rel, &e);
                None
            }
        }
    }

    fn load_lines<T: serde::de::DeserializeOwned>(&self, file: &str) -> Vec<T> {
        let rel = self.dir.join(file);
        match self.workspace.read_jsonl(&rel) {
            Ok(items) => items,
            Err(e) => {
                self.quarantine(&rel, &e);
                Vec::new()
            }
        }
    }

    /// Move an unreadable file aside so the next write starts clean
    fn quarantine(&self, rel: &Path, error: &crate::Error) {
        warn!(
            project = %self.record.project_id,
            role = %self.record.agent_role,
            file = %rel.display(),
            "Unreadable agent memory, starting empty: {}",
            error
        );

        let Ok(path) = self.workspace.resolve(rel) else {
            return;
        };
        let aside = path.with_extension(format!(
            "corrupt-{}",
            Utc::now().format("%Y%m%d%H%M%S")
        ));
        if let Err(e) = std::fs::rename(&path, &aside) {
            warn!("Failed to move {} aside: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn workspace() -> (tempfile::TempDir, WorkspaceStore) {
        let base = tempfile::tempdir().unwrap();
        let ws = WorkspaceStore::create(base.path(), "p1").unwrap();
        (base, ws)
    }

    #[tokio::test]
    async fn test_activate_fresh_record() {
        let (_base, ws) = workspace();
        let store = AgentMemoryStore::activate(&ws, "ceo").unwrap();

        let record = store.status();
        assert_eq!(record.status, AgentStatus::Initialized);
        assert!(record.conversation.is_empty());
        assert!(ws.root().join("memory/ceo/status.json").exists());
    }

    #[tokio::test]
    async fn test_append_order_survives_reload() {
        let (_base, ws) = workspace();
        let mut store = AgentMemoryStore::activate(&ws, "ceo").unwrap();

        for i in 0..25 {
            store.append(ConversationTurn::user(format!("turn {}", i))).await.unwrap();
        }
        store
            .record_decision(DecisionEntry::new("Stack", "Rust").with_rationale("speed"))
            .await
            .unwrap();
        store.set_status(AgentStatus::Active).await.unwrap();
        drop(store);

        let store = AgentMemoryStore::activate(&ws, "ceo").unwrap();
        let texts: Vec<_> = store
            .record()
            .conversation
            .iter()
            .filter_map(|t| t.text())
            .collect();
        let expected: Vec<String> = (0..25).map(|i| format!("turn {}", i)).collect();
        assert_eq!(texts, expected);
        assert_eq!(store.record().decisions[0].rationale.as_deref(), Some("speed"));
        assert_eq!(store.record().status, AgentStatus::Active);

        let recent = store.recent_turns(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].text(), Some("turn 22"));
    }

    #[tokio::test]
    async fn test_tool_turns_roundtrip() {
        let (_base, ws) = workspace();
        let mut store = AgentMemoryStore::activate(&ws, "backend").unwrap();

        let exchange = ToolExchange {
            call_id: "call_1".to_string(),
            capability: "add".to_string(),
            arguments: json!({"a": 1, "b": 2}),
            outcome: DispatchOutcome::succeeded(json!(3), 1),
        };
        store.append(ConversationTurn::tool(exchange.clone())).await.unwrap();

        let store = AgentMemoryStore::activate(&ws, "backend").unwrap();
        assert_eq!(
            store.record().conversation[0].content,
            TurnContent::Tool(exchange)
        );
    }

    #[tokio::test]
    async fn test_corrupt_conversation_degrades_to_empty() {
        let (_base, ws) = workspace();
        let mut store = AgentMemoryStore::activate(&ws, "ceo").unwrap();
        store.append(ConversationTurn::user("hello")).await.unwrap();
        store.set_context(json!({"goal": "launch"})).await.unwrap();
        drop(store);

        std::fs::write(ws.root().join("memory/ceo/conversation.jsonl"), "{broken\n").unwrap();

        let mut store = AgentMemoryStore::activate(&ws, "ceo").unwrap();
        assert!(store.record().conversation.is_empty());
        assert_eq!(store.record().context["goal"], "launch");

        store.append(ConversationTurn::user("again")).await.unwrap();
        let store = AgentMemoryStore::activate(&ws, "ceo").unwrap();
        assert_eq!(store.record().conversation.len(), 1);
    }

    #[tokio::test]
    async fn test_roles_are_isolated_and_validated() {
        let (_base, ws) = workspace();
        let mut ceo = AgentMemoryStore::activate(&ws, "ceo").unwrap();
        ceo.append(ConversationTurn::user("private")).await.unwrap();

        let frontend = AgentMemoryStore::activate(&ws, "frontend").unwrap();
        assert!(frontend.record().conversation.is_empty());

        assert!(AgentMemoryStore::activate(&ws, "../ceo").is_err());
        for reserved in ["shared", "team_chat", "shared_notes", "tasks"] {
            assert!(AgentMemoryStore::activate(&ws, reserved).is_err(), "{}", reserved);
        }
    }

    #[tokio::test]
    async fn test_load_does_not_create_records() {
        let (_base, ws) = workspace();

        let store = AgentMemoryStore::load(&ws, "devops").unwrap();
        assert_eq!(store.status().status, AgentStatus::Uninitialized);
        assert!(!ws.root().join("memory/devops").exists());

        let mut store = AgentMemoryStore::activate(&ws, "devops").unwrap();
        store
            .record_decision(DecisionEntry::new("Hosting", "Use one region"))
            .await
            .unwrap();

        let loaded = AgentMemoryStore::load(&ws, "devops").unwrap();
        assert_eq!(loaded.status().status, AgentStatus::Initialized);
        assert_eq!(loaded.record().decisions[0].title, "Hosting");
    }
}
