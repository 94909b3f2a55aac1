//! Capability registry and dispatch

use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::{Capability, CapabilityDescriptor, ToolModule};
use crate::workspace::{ActivityEntry, ActivityLog};
use crate::{Error, ErrorKind, Result};

struct Entry {
    module: String,
    capability: Capability,
}

/// Result of one dispatch, in the shape handed back to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub duration_ms: u64,
}

impl DispatchOutcome {
    pub fn succeeded(result: Value, duration_ms: u64) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            error_kind: None,
            duration_ms,
        }
    }

    pub fn failed(error: &Error, duration_ms: u64) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            duration_ms,
        }
    }

    /// Serialized form fed back to the completion service
    pub fn to_content(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"success":{},"error":"unserializable result"}}"#, self.success)
        })
    }
}

/// Maps capability names to their module, schema and handler
pub struct CapabilityRegistry {
    entries: BTreeMap<String, Entry>,
    activity: Option<ActivityLog>,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityRegistry {
    /// Create an empty registry without an activity log
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            activity: None,
        }
    }

    /// Record every dispatch in the given activity log
    pub fn with_activity_log(mut self, log: ActivityLog) -> Self {
        self.activity = Some(log);
        self
    }

    /// Register every capability a tool module exposes
    pub fn register_module(&mut self, module: Arc<dyn ToolModule>) -> Result<usize> {
        let name = module.name().to_string();
        let capabilities = module.capabilities();
        let count = capabilities.len();

        for capability in capabilities {
            self.register(&name, capability)?;
        }

        info!(module = %name, count, "Registered tool module");
        Ok(count)
    }

    /// Register one capability on behalf of `module`.
    ///
    /// Re-registering a name from the same module is a no-op; a name owned by
    /// a different module is a configuration error.
    pub fn register(&mut self, module: &str, capability: Capability) -> Result<()> {
        if let Some(existing) = self.entries.get(&capability.name) {
            if existing.module == module {
                debug!(capability = %capability.name, "Capability already registered");
                return Ok(());
            }
            return Err(Error::DuplicateCapability {
                name: capability.name.clone(),
                owner: existing.module.clone(),
            });
        }

        self.entries.insert(
            capability.name.clone(),
            Entry {
                module: module.to_string(),
                capability,
            },
        );
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Module that owns a capability
    pub fn module_of(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(|e| e.module.as_str())
    }

    /// All capabilities, ordered by name
    pub fn list_capabilities(&self) -> Vec<CapabilityDescriptor> {
        self.entries
            .iter()
            .map(|(name, entry)| CapabilityDescriptor {
                name: name.clone(),
                description: entry.capability.description.clone(),
                module: entry.module.clone(),
                parameters: entry.capability.schema.to_json_schema(),
            })
            .collect()
    }

    /// Whether a role with tool list `allowed` may call `name`.
    ///
    /// An empty list allows everything; entries match module or capability names.
    pub fn permits(&self, name: &str, allowed: &[String]) -> bool {
        if allowed.is_empty() {
            return self.contains(name);
        }
        match self.entries.get(name) {
            Some(entry) => allowed.iter().any(|a| a == name || *a == entry.module),
            None => false,
        }
    }

    /// Capabilities visible to a role, ordered by name
    pub fn list_permitted(&self, allowed: &[String]) -> Vec<CapabilityDescriptor> {
        self.list_capabilities()
            .into_iter()
            .filter(|d| self.permits(&d.name, allowed))
            .collect()
    }

    /// Validate arguments and run the handler.
    ///
    /// Never fails: unknown names, schema violations, handler errors and
    /// handler panics all come back as a failed outcome.
    pub async fn dispatch(&self, name: &str, arguments: Value) -> DispatchOutcome {
        let start = Instant::now();
        let module = self.module_of(name).unwrap_or_default().to_string();

        let result = match self.entries.get(name) {
            None => Err(Error::UnknownCapability(name.to_string())),
            Some(entry) => match entry.capability.schema.validate(&arguments) {
                Err(msg) => Err(Error::InvalidArguments(format!("{}: {}", name, msg))),
                Ok(()) => {
                    let call = entry.capability.invoke(arguments.clone());
                    match AssertUnwindSafe(call).catch_unwind().await {
                        Ok(result) => result,
                        Err(panic) => Err(Error::ToolExecution(format!(
                            "handler for '{}' panicked: {}",
                            name,
                            panic_message(&panic)
                        ))),
                    }
                }
            },
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let outcome = match result {
            Ok(value) => DispatchOutcome::succeeded(value, duration_ms),
            Err(e) => {
                warn!(capability = name, kind = %e.kind(), "Dispatch failed: {}", e);
                DispatchOutcome::failed(&e, duration_ms)
            }
        };

        if let Some(log) = &self.activity {
            log.record(&ActivityEntry {
                timestamp: Utc::now(),
                project_id: log.project_id().to_string(),
                module,
                capability: name.to_string(),
                arguments,
                duration_ms,
                success: outcome.success,
                error_kind: outcome.error_kind,
                error: outcome.error.clone(),
            });
        }

        outcome
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
