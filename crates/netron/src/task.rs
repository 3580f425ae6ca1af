//! Task subsystem: RPC-over-RPC for bootstrap negotiation and ad-hoc
//! batched remote procedure execution.
//!
//! A task is a name plus an optional argument array, executed against a
//! target peer. Batch execution never aborts early: each entry resolves to
//! its own `{result}` or `{error}` record, and an unknown task name is a
//! per-entry `NotExists` error rather than a transport failure.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use netron_common::{ErrorDescriptor, NetronError, Result, Value};
use tracing::debug;

use crate::netron::Netron;

/// Built-in task names.
pub const TASK_GET_CONFIG: &str = "netronGetConfig";
pub const TASK_GET_CONTEXT_DEFS: &str = "netronGetContextDefs";
pub const TASK_REF_DEFINITION: &str = "netronRefDefinition";
pub const TASK_RELEASE_DEFINITION: &str = "netronReleaseDefinition";

/// A named remote procedure. Singleton tasks share one instance across all
/// invocations and must therefore be safe for concurrent `run` calls.
#[async_trait]
pub trait Task: Send + Sync {
    async fn run(&self, netron: &Arc<Netron>, origin: &str, args: Vec<Value>) -> Result<Value>;
}

/// One task invocation: a name plus an optional argument array.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSpec {
    pub name: String,
    pub args: Vec<Value>,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn to_value(&self) -> Value {
        Value::object([
            ("task".to_string(), Value::str(self.name.clone())),
            ("args".to_string(), Value::Array(self.args.clone())),
        ])
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| NetronError::InvalidArgument("task spec must be an object".into()))?;
        let name = map
            .get("task")
            .and_then(Value::as_str)
            .ok_or_else(|| NetronError::InvalidArgument("task spec without a name".into()))?;
        let args = match map.get("args") {
            Some(Value::Array(args)) => args.clone(),
            _ => Vec::new(),
        };
        Ok(Self {
            name: name.to_string(),
            args,
        })
    }
}

/// One or more task invocations addressed to a peer. `run_task` always
/// answers with a map keyed by task name, even for a single entry.
#[derive(Debug, Clone)]
pub struct TaskBatch {
    pub specs: Vec<TaskSpec>,
}

impl From<&str> for TaskBatch {
    fn from(name: &str) -> Self {
        Self {
            specs: vec![TaskSpec::new(name)],
        }
    }
}

impl From<TaskSpec> for TaskBatch {
    fn from(spec: TaskSpec) -> Self {
        Self { specs: vec![spec] }
    }
}

impl From<Vec<TaskSpec>> for TaskBatch {
    fn from(specs: Vec<TaskSpec>) -> Self {
        Self { specs }
    }
}

/// Per-task outcome inside a batch result map.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Result(Value),
    Error(ErrorDescriptor),
}

impl TaskOutcome {
    pub fn result(&self) -> Option<&Value> {
        match self {
            TaskOutcome::Result(value) => Some(value),
            TaskOutcome::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorDescriptor> {
        match self {
            TaskOutcome::Error(descriptor) => Some(descriptor),
            TaskOutcome::Result(_) => None,
        }
    }
}

pub type TaskResults = BTreeMap<String, TaskOutcome>;

pub(crate) fn results_to_value(results: &TaskResults) -> Value {
    let entries = results.iter().map(|(name, outcome)| {
        let record = match outcome {
            TaskOutcome::Result(value) => {
                Value::object([("result".to_string(), value.clone())])
            }
            TaskOutcome::Error(descriptor) => {
                Value::object([("error".to_string(), Value::Error(descriptor.clone()))])
            }
        };
        (name.clone(), record)
    });
    Value::object(entries)
}

pub(crate) fn results_from_value(value: &Value) -> Result<TaskResults> {
    let map = value
        .as_object()
        .ok_or_else(|| NetronError::Codec("task results must be an object".into()))?;
    let mut results = TaskResults::new();
    for (name, record) in map {
        let record = record
            .as_object()
            .ok_or_else(|| NetronError::Codec("task result entry must be an object".into()))?;
        let outcome = if let Some(Value::Error(descriptor)) = record.get("error") {
            TaskOutcome::Error(descriptor.clone())
        } else if let Some(result) = record.get("result") {
            TaskOutcome::Result(result.clone())
        } else {
            return Err(NetronError::Codec(format!(
                "task '{}' answered with neither result nor error",
                name
            )));
        };
        results.insert(name.clone(), outcome);
    }
    Ok(results)
}

/// Registration record for a custom task.
pub struct TaskRegistration {
    pub name: String,
    /// One shared instance serves all invocations when true; otherwise a
    /// fresh instance is built per call.
    pub singleton: bool,
    pub factory: Arc<dyn Fn() -> Arc<dyn Task> + Send + Sync>,
}

enum TaskEntry {
    Singleton(Arc<dyn Task>),
    Factory(Arc<dyn Fn() -> Arc<dyn Task> + Send + Sync>),
}

pub struct TaskManager {
    entries: RwLock<HashMap<String, TaskEntry>>,
}

impl TaskManager {
    pub fn new() -> Self {
        let manager = Self {
            entries: RwLock::new(HashMap::new()),
        };
        manager.install(TASK_GET_CONFIG, Arc::new(GetConfigTask));
        manager.install(TASK_GET_CONTEXT_DEFS, Arc::new(GetContextDefsTask));
        manager.install(TASK_REF_DEFINITION, Arc::new(RefDefinitionTask));
        manager.install(TASK_RELEASE_DEFINITION, Arc::new(ReleaseDefinitionTask));
        manager
    }

    fn install(&self, name: &str, task: Arc<dyn Task>) {
        self.entries
            .write()
            .expect("task registry poisoned")
            .insert(name.to_string(), TaskEntry::Singleton(task));
    }

    /// Registers a custom task. Fails with `Exists` for a name already
    /// taken, including the built-ins.
    pub fn register(&self, registration: TaskRegistration) -> Result<()> {
        let mut entries = self.entries.write().expect("task registry poisoned");
        if entries.contains_key(&registration.name) {
            return Err(NetronError::Exists(format!(
                "task '{}'",
                registration.name
            )));
        }
        let entry = if registration.singleton {
            TaskEntry::Singleton((registration.factory)())
        } else {
            TaskEntry::Factory(registration.factory)
        };
        entries.insert(registration.name, entry);
        Ok(())
    }

    fn resolve(&self, name: &str) -> Option<Arc<dyn Task>> {
        let entries = self.entries.read().expect("task registry poisoned");
        match entries.get(name)? {
            TaskEntry::Singleton(task) => Some(task.clone()),
            TaskEntry::Factory(factory) => Some(factory()),
        }
    }

    /// Executes a batch, isolating per-task failures: one failing entry
    /// never prevents the others from reporting their own outcome.
    pub async fn run_batch(
        &self,
        netron: &Arc<Netron>,
        origin: &str,
        specs: &[TaskSpec],
    ) -> TaskResults {
        let mut results = TaskResults::new();
        for spec in specs {
            let outcome = match self.resolve(&spec.name) {
                None => TaskOutcome::Error(
                    NetronError::NotExists(format!("task '{}'", spec.name)).to_descriptor(),
                ),
                Some(task) => match task.run(netron, origin, spec.args.clone()).await {
                    Ok(value) => TaskOutcome::Result(value),
                    Err(err) => TaskOutcome::Error(err.to_descriptor()),
                },
            };
            debug!(task = %spec.name, ok = outcome.error().is_none(), "task executed");
            results.insert(spec.name.clone(), outcome);
        }
        results
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

struct GetConfigTask;

#[async_trait]
impl Task for GetConfigTask {
    async fn run(&self, netron: &Arc<Netron>, _origin: &str, _args: Vec<Value>) -> Result<Value> {
        Ok(netron.options().to_value())
    }
}

struct GetContextDefsTask;

#[async_trait]
impl Task for GetContextDefsTask {
    async fn run(&self, netron: &Arc<Netron>, _origin: &str, _args: Vec<Value>) -> Result<Value> {
        Ok(netron.context_definitions_value())
    }
}

fn def_id_arg(args: &[Value]) -> Result<netron_common::DefinitionId> {
    match args.first() {
        Some(Value::Int(id)) if *id >= 0 => Ok(*id as u64),
        _ => Err(NetronError::InvalidArgument(
            "expected a definition id argument".into(),
        )),
    }
}

/// Wire half of interface materialization: the holding peer records itself
/// against the definition it now references.
struct RefDefinitionTask;

#[async_trait]
impl Task for RefDefinitionTask {
    async fn run(&self, netron: &Arc<Netron>, origin: &str, args: Vec<Value>) -> Result<Value> {
        let def_id = def_id_arg(&args)?;
        netron.add_definition_ref(origin, def_id);
        Ok(Value::Undefined)
    }
}

/// Wire half of interface release and the weak-context GC trigger.
struct ReleaseDefinitionTask;

#[async_trait]
impl Task for ReleaseDefinitionTask {
    async fn run(&self, netron: &Arc<Netron>, origin: &str, args: Vec<Value>) -> Result<Value> {
        let def_id = def_id_arg(&args)?;
        netron.release_definition(origin, def_id).await;
        Ok(Value::Undefined)
    }
}
