//! Team tasks: one JSON document per task under `memory/tasks/`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};
use uuid::Uuid;

use super::{CoordinationBoard, Priority};
use crate::workspace::validate_segment;
use crate::{Error, Result};

const TASKS_DIR: &str = "memory/tasks";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [&'static str; 4] = ["pending", "in_progress", "completed", "cancelled"];
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(Error::InvalidArguments(format!(
                "Unknown task status '{}'",
                other
            ))),
        }
    }
}

/// A unit of work assigned to an agent role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamTask {
    pub id: String,
    pub title: String,
    pub description: String,
    pub assigned_to: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when creating a task
#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub assigned_to: String,
    pub priority: Priority,
    pub due_date: Option<String>,
}

impl CoordinationBoard {
    /// Persist a new pending task
    pub async fn create_task(&self, new: NewTask) -> Result<TeamTask> {
        let now = Utc::now();
        let task = TeamTask {
            id: format!("task_{}", Uuid::new_v4().simple()),
            title: new.title,
            description: new.description,
            assigned_to: new.assigned_to,
            priority: new.priority,
            due_date: new.due_date,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        };

        let _guard = self.write_lock.lock().await;
        self.workspace
            .write_json_async(task_path(&task.id)?, &task)
            .await?;

        info!(task = %task.id, assigned_to = %task.assigned_to, "Created team task");
        Ok(task)
    }

    /// Tasks matching the filters, oldest first
    pub async fn list_tasks(
        &self,
        assigned_to: Option<&str>,
        status: Option<TaskStatus>,
    ) -> Result<Vec<TeamTask>> {
        let mut tasks: Vec<TeamTask> = self
            .json_files(TASKS_DIR)?
            .into_iter()
            .filter_map(|rel| match self.workspace.read_json::<TeamTask>(&rel) {
                Ok(task) => task,
                Err(e) => {
                    warn!(file = %rel.display(), "Skipping unreadable task: {}", e);
                    None
                }
            })
            .filter(|t| assigned_to.map_or(true, |a| t.assigned_to == a))
            .filter(|t| status.map_or(true, |s| t.status == s))
            .collect();

        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(tasks)
    }
}

fn task_path(id: &str) -> Result<std::path::PathBuf> {
    validate_segment("task id", id)?;
    Ok(Path::new(TASKS_DIR).join(format!("{}.json", id)))
}
