//! Code-hosting capabilities over the GitHub REST API
//!
//! Auth, permission and rate-limit failures (401, 403, 429) surface as
//! [`Error::Transport`] so the model sees a structured tool error instead of
//! the turn aborting.

use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

use super::{arg_str, arg_str_list, require_str, Capability, ParamKind, ParamSchema, ToolModule};
use crate::config::ToolsConfig;
use crate::workspace::WorkspaceStore;
use crate::{Error, Result};

const REPOSITORY_FILE: &str = "memory/shared/github.json";
const DEFAULT_MAX_ISSUES: u64 = 20;
const DEFAULT_MAX_COMMITS: u64 = 10;

/// Repository binding persisted in the workspace
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RepositoryBinding {
    repository: String,
}

/// Issues, milestones and commits for the project's repository
pub struct GitHubTools {
    workspace: WorkspaceStore,
    client: reqwest::Client,
    api_base: String,
    token: Option<String>,
}

impl GitHubTools {
    pub fn new(workspace: WorkspaceStore, config: &ToolsConfig) -> Result<Self> {
        let token = config
            .github_token
            .clone()
            .or_else(|| std::env::var("GITHUB_TOKEN").ok());

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("boardroom"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            workspace,
            client,
            api_base: config.github_api_base.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn repository(&self) -> Result<String> {
        self.workspace
            .read_json::<RepositoryBinding>(REPOSITORY_FILE)?
            .map(|b| b.repository)
            .ok_or_else(|| {
                Error::ToolExecution(
                    "Repository not set. Call github_set_repository first.".to_string(),
                )
            })
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<Value> {
        let url = format!("{}{}", self.api_base, path);
        debug!(%method, %url, "GitHub request");

        let mut request = self.client.request(method, &url).query(query);
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Transport(format!("GitHub request failed: {}", e)))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(status_error(status, &text));
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| Error::Transport(format!("Invalid GitHub response: {}", e)))
    }

    async fn set_repository(&self, args: Value) -> Result<Value> {
        let repository = parse_repository(require_str(&args, "repository")?)?;
        let repo = self
            .request(Method::GET, &format!("/repos/{}", repository), &[], None)
            .await?;

        self.workspace.write_json(
            REPOSITORY_FILE,
            &RepositoryBinding {
                repository: repository.clone(),
            },
        )?;
        info!(project = %self.workspace.project_id(), %repository, "Bound GitHub repository");

        Ok(json!({
            "repo_name": repo["full_name"],
            "repo_url": repo["html_url"],
            "default_branch": repo["default_branch"],
            "is_private": repo["private"],
            "description": repo["description"],
        }))
    }

    async fn create_issue(&self, args: Value) -> Result<Value> {
        let repository = self.repository()?;

        let mut body = Map::new();
        body.insert("title".into(), json!(require_str(&args, "title")?));
        if let Some(text) = arg_str(&args, "body") {
            body.insert("body".into(), json!(text));
        }
        body.insert("labels".into(), json!(arg_str_list(&args, "labels")));
        body.insert("assignees".into(), json!(arg_str_list(&args, "assignees")));
        if let Some(milestone) = args.get("milestone").and_then(Value::as_u64) {
            body.insert("milestone".into(), json!(milestone));
        }

        let issue = self
            .request(
                Method::POST,
                &format!("/repos/{}/issues", repository),
                &[],
                Some(Value::Object(body)),
            )
            .await?;

        Ok(summarize_issue(&issue))
    }

    async fn list_issues(&self, args: Value) -> Result<Value> {
        let repository = self.repository()?;
        let max_issues = args
            .get("max_issues")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_MAX_ISSUES);

        let mut query = vec![
            ("state", arg_str(&args, "state").unwrap_or("open").to_string()),
            ("sort", "updated".to_string()),
            ("direction", "desc".to_string()),
            ("per_page", max_issues.min(100).to_string()),
        ];
        let labels = arg_str_list(&args, "labels");
        if !labels.is_empty() {
            query.push(("labels", labels.join(",")));
        }
        if let Some(assignee) = arg_str(&args, "assignee") {
            query.push(("assignee", assignee.to_string()));
        }

        let issues = self
            .request(Method::GET, &format!("/repos/{}/issues", repository), &query, None)
            .await?;

        // The issues endpoint also returns pull requests
        let issues: Vec<Value> = issues
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter(|i| i.get("pull_request").is_none())
            .take(max_issues as usize)
            .map(summarize_issue)
            .collect();

        Ok(json!({
            "total_returned": issues.len(),
            "issues": issues,
        }))
    }

    async fn update_issue(&self, args: Value) -> Result<Value> {
        let repository = self.repository()?;
        let number = args
            .get("issue_number")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::InvalidArguments("issue_number must be a positive integer".into()))?;

        let mut body = Map::new();
        for field in ["title", "body", "state"] {
            if let Some(value) = arg_str(&args, field) {
                body.insert(field.into(), json!(value));
            }
        }
        if args.get("labels").is_some_and(|v| !v.is_null()) {
            body.insert("labels".into(), json!(arg_str_list(&args, "labels")));
        }
        let updated_fields: Vec<String> = body.keys().cloned().collect();

        let issue = self
            .request(
                Method::PATCH,
                &format!("/repos/{}/issues/{}", repository, number),
                &[],
                Some(Value::Object(body)),
            )
            .await?;

        let mut summary = summarize_issue(&issue);
        summary["updated_fields"] = json!(updated_fields);
        Ok(summary)
    }

    async fn create_milestone(&self, args: Value) -> Result<Value> {
        let repository = self.repository()?;

        let mut body = Map::new();
        body.insert("title".into(), json!(require_str(&args, "title")?));
        if let Some(description) = arg_str(&args, "description") {
            body.insert("description".into(), json!(description));
        }
        if let Some(due) = arg_str(&args, "due_date") {
            let date = NaiveDate::parse_from_str(due, "%Y-%m-%d").map_err(|e| {
                Error::InvalidArguments(format!("due_date '{}' is not YYYY-MM-DD: {}", due, e))
            })?;
            body.insert("due_on".into(), json!(format!("{}T00:00:00Z", date)));
        }

        let milestone = self
            .request(
                Method::POST,
                &format!("/repos/{}/milestones", repository),
                &[],
                Some(Value::Object(body)),
            )
            .await?;

        Ok(summarize_milestone(&milestone))
    }

    async fn list_milestones(&self, args: Value) -> Result<Value> {
        let repository = self.repository()?;
        let query = [("state", arg_str(&args, "state").unwrap_or("open").to_string())];

        let milestones = self
            .request(
                Method::GET,
                &format!("/repos/{}/milestones", repository),
                &query,
                None,
            )
            .await?;

        let milestones: Vec<Value> = milestones
            .as_array()
            .map(|items| items.iter().map(summarize_milestone).collect())
            .unwrap_or_default();

        Ok(json!({
            "total_count": milestones.len(),
            "milestones": milestones,
        }))
    }

    async fn list_commits(&self, args: Value) -> Result<Value> {
        let repository = self.repository()?;
        let max_commits = args
            .get("max_commits")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_MAX_COMMITS);

        let mut query = vec![("per_page", max_commits.min(100).to_string())];
        if let Some(branch) = arg_str(&args, "branch") {
            query.push(("sha", branch.to_string()));
        }

        let commits = self
            .request(Method::GET, &format!("/repos/{}/commits", repository), &query, None)
            .await?;

        let commits: Vec<Value> = commits
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|c| {
                        let sha = c["sha"].as_str().unwrap_or_default();
                        json!({
                            "sha": &sha[..sha.len().min(8)],
                            "message": c["commit"]["message"],
                            "author": c["commit"]["author"]["name"],
                            "date": c["commit"]["author"]["date"],
                            "url": c["html_url"],
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(json!({
            "total_returned": commits.len(),
            "commits": commits,
        }))
    }
}

impl ToolModule for GitHubTools {
    fn name(&self) -> &str {
        "github"
    }

    fn capabilities(self: Arc<Self>) -> Vec<Capability> {
        vec![
            Capability::bound(
                &self,
                "github_set_repository",
                "Bind the project to a GitHub repository",
                ParamSchema::new().required(
                    "repository",
                    ParamKind::String,
                    "Repository URL or owner/name",
                ),
                |gh, args| async move { gh.set_repository(args).await },
            ),
            Capability::bound(
                &self,
                "github_create_issue",
                "Create an issue for task tracking",
                ParamSchema::new()
                    .required("title", ParamKind::String, "Issue title")
                    .optional("body", ParamKind::String, "Issue description")
                    .optional("labels", ParamKind::Array, "Label names")
                    .optional("assignees", ParamKind::Array, "GitHub usernames")
                    .optional("milestone", ParamKind::Integer, "Milestone number"),
                |gh, args| async move { gh.create_issue(args).await },
            ),
            Capability::bound(
                &self,
                "github_list_issues",
                "List repository issues (pull requests excluded)",
                ParamSchema::new()
                    .optional("state", ParamKind::String, "Issue state")
                    .one_of(&["open", "closed", "all"])
                    .optional("labels", ParamKind::Array, "Only issues with these labels")
                    .optional("assignee", ParamKind::String, "Only issues for this user")
                    .optional("max_issues", ParamKind::Integer, "Maximum issues (default 20)"),
                |gh, args| async move { gh.list_issues(args).await },
            ),
            Capability::bound(
                &self,
                "github_update_issue",
                "Update an existing issue",
                ParamSchema::new()
                    .required("issue_number", ParamKind::Integer, "Issue number")
                    .optional("title", ParamKind::String, "New title")
                    .optional("body", ParamKind::String, "New body")
                    .optional("state", ParamKind::String, "New state")
                    .one_of(&["open", "closed"])
                    .optional("labels", ParamKind::Array, "Replacement label list"),
                |gh, args| async move { gh.update_issue(args).await },
            ),
            Capability::bound(
                &self,
                "github_create_milestone",
                "Create a project milestone",
                ParamSchema::new()
                    .required("title", ParamKind::String, "Milestone title")
                    .optional("description", ParamKind::String, "Milestone description")
                    .optional("due_date", ParamKind::String, "Due date (YYYY-MM-DD)"),
                |gh, args| async move { gh.create_milestone(args).await },
            ),
            Capability::bound(
                &self,
                "github_list_milestones",
                "List repository milestones",
                ParamSchema::new()
                    .optional("state", ParamKind::String, "Milestone state")
                    .one_of(&["open", "closed", "all"]),
                |gh, args| async move { gh.list_milestones(args).await },
            ),
            Capability::bound(
                &self,
                "github_list_commits",
                "Recent commits on the repository",
                ParamSchema::new()
                    .optional("max_commits", ParamKind::Integer, "Maximum commits (default 10)")
                    .optional("branch", ParamKind::String, "Branch or SHA to start from"),
                |gh, args| async move { gh.list_commits(args).await },
            ),
        ]
    }
}

/// Accept `owner/name`, `https://github.com/owner/name` or a `.git` URL
fn parse_repository(input: &str) -> Result<String> {
    let trimmed = input
        .trim()
        .trim_start_matches("https://github.com/")
        .trim_start_matches("git@github.com:")
        .trim_end_matches('/')
        .trim_end_matches(".git");

    let parts: Vec<&str> = trimmed.split('/').collect();
    match parts.as_slice() {
        [owner, name] if !owner.is_empty() && !name.is_empty() => {
            Ok(format!("{}/{}", owner, name))
        }
        _ => Err(Error::InvalidArguments(format!(
            "'{}' is not a GitHub repository (expected owner/name)",
            input
        ))),
    }
}

fn status_error(status: StatusCode, body: &str) -> Error {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.chars().take(200).collect());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
            Error::Transport(format!("GitHub API returned {}: {}", status, message))
        }
        StatusCode::NOT_FOUND => Error::NotFound(format!("GitHub resource: {}", message)),
        _ => Error::ToolExecution(format!("GitHub API returned {}: {}", status, message)),
    }
}

fn summarize_issue(issue: &Value) -> Value {
    let names = |key: &str, field: &str| -> Vec<Value> {
        issue[key]
            .as_array()
            .map(|items| items.iter().map(|i| i[field].clone()).collect())
            .unwrap_or_default()
    };

    json!({
        "issue_number": issue["number"],
        "title": issue["title"],
        "state": issue["state"],
        "url": issue["html_url"],
        "created_at": issue["created_at"],
        "updated_at": issue["updated_at"],
        "labels": names("labels", "name"),
        "assignees": names("assignees", "login"),
        "milestone": issue["milestone"]["title"],
    })
}

fn summarize_milestone(milestone: &Value) -> Value {
    json!({
        "number": milestone["number"],
        "title": milestone["title"],
        "description": milestone["description"],
        "state": milestone["state"],
        "url": milestone["html_url"],
        "due_on": milestone["due_on"],
        "open_issues": milestone["open_issues"],
        "closed_issues": milestone["closed_issues"],
    })
}
