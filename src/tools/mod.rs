//! Capabilities and the tool modules that provide them
//!
//! Each tool module hands the registry a static list of capabilities
//! (name, parameter schema, handler) at startup. There is no reflection:
//! the full calling surface is visible by listing the registry.
//!
//! Modules:
//! - `filesystem`: read, write, list and search files in the workspace
//! - `git`: clone, status, history, commit (subprocesses with a timeout)
//! - `team`: coordination board messages, shared notes, team tasks
//! - `github`: issues, milestones and commits over the GitHub REST API

mod filesystem;
mod git;
mod github;
mod registry;
mod schema;
mod team;

pub use filesystem::FilesystemTools;
pub use git::GitTools;
pub use github::GitHubTools;
pub use registry::{CapabilityRegistry, DispatchOutcome};
pub use schema::{ParamField, ParamKind, ParamSchema};
pub use team::TeamTools;

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use crate::board::CoordinationBoard;
use crate::workspace::WorkspaceStore;
use crate::{Config, Result};

/// Async handler bound to a tool module instance
pub type Handler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// A named, schema-checked operation
#[derive(Clone)]
pub struct Capability {
    /// Unique name within a registry
    pub name: String,
    /// Description shown to the model
    pub description: String,
    /// Declared parameters
    pub schema: ParamSchema,
    handler: Handler,
}

impl Capability {
    /// Create a capability from a free-standing async function
    pub fn new<F, Fut>(name: &str, description: &str, schema: ParamSchema, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            schema,
            handler: Arc::new(move |args| handler(args).boxed()),
        }
    }

    /// Create a capability whose handler is bound to a module instance
    pub fn bound<M, F, Fut>(
        module: &Arc<M>,
        name: &str,
        description: &str,
        schema: ParamSchema,
        handler: F,
    ) -> Self
    where
        M: Send + Sync + 'static,
        F: Fn(Arc<M>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let module = Arc::clone(module);
        Self::new(name, description, schema, move |args| {
            handler(Arc::clone(&module), args)
        })
    }

    pub(crate) fn invoke(&self, arguments: Value) -> BoxFuture<'static, Result<Value>> {
        (self.handler)(arguments)
    }
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

/// Capability as presented to the completion service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub description: String,
    /// Tool module that registered it
    pub module: String,
    /// JSON Schema of the parameters
    pub parameters: Value,
}

/// A pluggable group of capabilities
pub trait ToolModule: Send + Sync {
    /// Module name; also accepted in role tool lists
    fn name(&self) -> &str;

    /// Capabilities this module provides, bound to this instance
    fn capabilities(self: Arc<Self>) -> Vec<Capability>;
}

/// Everything a project's tool modules need
#[derive(Clone)]
pub struct ToolContext {
    pub workspace: WorkspaceStore,
    pub board: Arc<CoordinationBoard>,
    pub config: Config,
}

/// Build the standard tool modules for one project
pub fn standard_modules(ctx: &ToolContext) -> Result<Vec<Arc<dyn ToolModule>>> {
    let timeout = ctx.config.command_timeout()?;

    Ok(vec![
        Arc::new(FilesystemTools::new(ctx.workspace.clone())),
        Arc::new(GitTools::new(ctx.workspace.clone(), timeout)),
        Arc::new(TeamTools::new(Arc::clone(&ctx.board))),
        Arc::new(GitHubTools::new(ctx.workspace.clone(), &ctx.config.tools)?),
    ])
}

/// Read an optional string argument
pub(crate) fn arg_str<'a>(args: &'a Value, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}

/// Read a string argument the schema already marked as required
pub(crate) fn require_str<'a>(args: &'a Value, name: &str) -> Result<&'a str> {
    arg_str(args, name).ok_or_else(|| {
        crate::Error::InvalidArguments(format!("missing required field '{}'", name))
    })
}

/// Read an optional list of strings
pub(crate) fn arg_str_list(args: &Value, name: &str) -> Vec<String> {
    args.get(name)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
