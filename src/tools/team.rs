//! Team coordination capabilities backed by the [`CoordinationBoard`]

use serde_json::{json, Value};
use std::sync::Arc;

use super::{arg_str, arg_str_list, require_str, Capability, ParamKind, ParamSchema, ToolModule};
use crate::board::{
    BoardFilter, BoardMessage, CoordinationBoard, NewTask, Priority, TaskStatus,
};
use crate::Result;

const DEFAULT_READ_LIMIT: u64 = 10;

/// Message board, shared notes and team tasks
pub struct TeamTools {
    board: Arc<CoordinationBoard>,
}

impl TeamTools {
    pub fn new(board: Arc<CoordinationBoard>) -> Self {
        Self { board }
    }

    async fn write_message(&self, args: Value) -> Result<Value> {
        let priority = match arg_str(&args, "priority") {
            Some(p) => p.parse()?,
            None => Priority::Normal,
        };
        let message = BoardMessage::new(require_str(&args, "author")?, require_str(&args, "message")?)
            .with_priority(priority)
            .with_tags(arg_str_list(&args, "tags"));

        let id = message.id.clone();
        let timestamp = message.timestamp;
        let total = self.board.post(message).await?;

        Ok(json!({
            "message_id": id,
            "timestamp": timestamp,
            "total_messages": total,
        }))
    }

    async fn read_messages(&self, args: Value) -> Result<Value> {
        let limit = args
            .get("limit")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_READ_LIMIT) as usize;
        let filter = BoardFilter {
            priority: arg_str(&args, "priority_filter")
                .map(str::parse::<Priority>)
                .transpose()?,
            author: arg_str(&args, "author_filter").map(str::to_string),
        };

        let page = self.board.read(limit, &filter).await?;
        Ok(serde_json::to_value(page)?)
    }

    async fn write_note(&self, args: Value) -> Result<Value> {
        let note = self
            .board
            .write_note(
                require_str(&args, "note_name")?,
                require_str(&args, "content")?,
                require_str(&args, "author")?,
            )
            .await?;

        Ok(json!({
            "note_name": note.name,
            "timestamp": note.updated_at,
        }))
    }

    async fn read_note(&self, args: Value) -> Result<Value> {
        let name = require_str(&args, "note_name")?;
        match self.board.read_note(name).await? {
            Some(note) => Ok(json!({ "note": note })),
            None => Err(crate::Error::NotFound(format!("Shared note '{}'", name))),
        }
    }

    async fn list_notes(&self) -> Result<Value> {
        let notes = self.board.list_notes().await?;
        Ok(json!({
            "total_count": notes.len(),
            "notes": notes,
        }))
    }

    async fn create_task(&self, args: Value) -> Result<Value> {
        let priority = match arg_str(&args, "priority") {
            Some(p) => p.parse()?,
            None => Priority::Normal,
        };
        let task = self
            .board
            .create_task(NewTask {
                title: require_str(&args, "title")?.to_string(),
                description: require_str(&args, "description")?.to_string(),
                assigned_to: require_str(&args, "assigned_to")?.to_string(),
                priority,
                due_date: arg_str(&args, "due_date").map(str::to_string),
            })
            .await?;

        Ok(json!({
            "task_id": task.id,
            "timestamp": task.created_at,
        }))
    }

    async fn list_tasks(&self, args: Value) -> Result<Value> {
        let status = arg_str(&args, "status")
            .map(str::parse::<TaskStatus>)
            .transpose()?;
        let tasks = self
            .board
            .list_tasks(arg_str(&args, "assigned_to"), status)
            .await?;

        Ok(json!({
            "total_count": tasks.len(),
            "tasks": tasks,
        }))
    }
}

impl ToolModule for TeamTools {
    fn name(&self) -> &str {
        "team"
    }

    fn capabilities(self: Arc<Self>) -> Vec<Capability> {
        vec![
            Capability::bound(
                &self,
                "team_write_message",
                "Post a message to the team board for other agents to see",
                ParamSchema::new()
                    .required("message", ParamKind::String, "Message body")
                    .required("author", ParamKind::String, "Posting agent, e.g. 'ceo'")
                    .optional("priority", ParamKind::String, "Priority level")
                    .one_of(&Priority::ALL)
                    .optional("tags", ParamKind::Array, "Tags for categorizing the message"),
                |team, args| async move { team.write_message(args).await },
            ),
            Capability::bound(
                &self,
                "team_read_messages",
                "Read recent messages from the team board",
                ParamSchema::new()
                    .optional("limit", ParamKind::Integer, "Maximum messages (default 10)")
                    .optional("priority_filter", ParamKind::String, "Only this priority")
                    .one_of(&Priority::ALL)
                    .optional("author_filter", ParamKind::String, "Only this author"),
                |team, args| async move { team.read_messages(args).await },
            ),
            Capability::bound(
                &self,
                "team_write_shared_note",
                "Create or replace a shared note",
                ParamSchema::new()
                    .required("note_name", ParamKind::String, "Note identifier")
                    .required("content", ParamKind::String, "Note content")
                    .required("author", ParamKind::String, "Writing agent"),
                |team, args| async move { team.write_note(args).await },
            ),
            Capability::bound(
                &self,
                "team_read_shared_note",
                "Read a shared note",
                ParamSchema::new().required("note_name", ParamKind::String, "Note identifier"),
                |team, args| async move { team.read_note(args).await },
            ),
            Capability::bound(
                &self,
                "team_list_shared_notes",
                "List all shared notes",
                ParamSchema::new(),
                |team, _args| async move { team.list_notes().await },
            ),
            Capability::bound(
                &self,
                "team_create_task",
                "Create a task for another agent",
                ParamSchema::new()
                    .required("title", ParamKind::String, "Task title")
                    .required("description", ParamKind::String, "What needs to be done")
                    .required("assigned_to", ParamKind::String, "Assigned agent role")
                    .optional("priority", ParamKind::String, "Priority level")
                    .one_of(&Priority::ALL)
                    .optional("due_date", ParamKind::String, "Due date (ISO 8601)"),
                |team, args| async move { team.create_task(args).await },
            ),
            Capability::bound(
                &self,
                "team_list_tasks",
                "List team tasks",
                ParamSchema::new()
                    .optional("assigned_to", ParamKind::String, "Only tasks for this agent")
                    .optional("status", ParamKind::String, "Only tasks in this status")
                    .one_of(&TaskStatus::ALL),
                |team, args| async move { team.list_tasks(args).await },
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::CapabilityRegistry;
    use crate::workspace::WorkspaceStore;
    use crate::ErrorKind;

    fn setup() -> (tempfile::TempDir, CapabilityRegistry) {
        let base = tempfile::tempdir().unwrap();
        let ws = WorkspaceStore::create(base.path(), "p1").unwrap();
        let board = Arc::new(CoordinationBoard::new(ws, 100));
        let mut registry = CapabilityRegistry::new();
        registry
            .register_module(Arc::new(TeamTools::new(board)))
            .unwrap();
        (base, registry)
    }

    #[tokio::test]
    async fn test_message_roundtrip() {
        let (_base, registry) = setup();

        let out = registry
            .dispatch(
                "team_write_message",
                json!({"message": "Sprint starts", "author": "ceo", "priority": "urgent", "tags": ["sprint"]}),
            )
            .await;
        assert!(out.success, "{:?}", out.error);

        let out = registry
            .dispatch("team_read_messages", json!({"priority_filter": "urgent"}))
            .await;
        let result = out.result.unwrap();
        assert_eq!(result["filtered_count"], 1);
        assert_eq!(result["messages"][0]["body"], "Sprint starts");
        assert_eq!(result["messages"][0]["tags"], json!(["sprint"]));
    }

    #[tokio::test]
    async fn test_bad_priority_is_invalid_arguments() {
        let (_base, registry) = setup();
        let out = registry
            .dispatch(
                "team_write_message",
                json!({"message": "x", "author": "ceo", "priority": "whenever"}),
            )
            .await;
        assert_eq!(out.error_kind, Some(ErrorKind::InvalidArguments));
    }

    #[tokio::test]
    async fn test_notes_and_tasks() {
        let (_base, registry) = setup();

        registry
            .dispatch(
                "team_write_shared_note",
                json!({"note_name": "stack", "content": "Rust + Postgres", "author": "backend"}),
            )
            .await;
        let out = registry
            .dispatch("team_read_shared_note", json!({"note_name": "stack"}))
            .await;
        assert_eq!(out.result.unwrap()["note"]["content"], "Rust + Postgres");

        let out = registry
            .dispatch("team_read_shared_note", json!({"note_name": "nope"}))
            .await;
        assert!(!out.success);

        let out = registry
            .dispatch(
                "team_create_task",
                json!({"title": "Set up CI", "description": "GitHub Actions", "assigned_to": "devops"}),
            )
            .await;
        assert!(out.success);

        let out = registry
            .dispatch("team_list_tasks", json!({"status": "pending"}))
            .await;
        let result = out.result.unwrap();
        assert_eq!(result["total_count"], 1);
        assert_eq!(result["tasks"][0]["assigned_to"], "devops");
    }
}
