use serde::{Deserialize, Serialize};

use super::error::ErrorDescriptor;
use super::reference::DefinitionId;
use super::value::Value;

/// Peer-local monotonically increasing request id, echoed by the paired
/// response. Correlation is exact; no FIFO ordering across distinct
/// outstanding requests is implied.
pub type CorrelationId = u64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Invoke a method on a definition.
    Invoke,
    /// Read a property of a definition.
    Get,
    /// Write a property of a definition.
    Set,
    /// Successful reply carrying the result payload.
    Response,
    /// Failed reply carrying an error descriptor payload.
    Error,
    /// Reserved peer-scoped event notification.
    Event,
    /// Task frame: bootstrap negotiation and batched remote procedures.
    Task,
}

/// The message envelope exchanged between peers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Packet {
    pub action: Action,
    #[serde(default)]
    pub id: CorrelationId,
    /// Target definition for `invoke`/`get`/`set`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub def_id: Option<DefinitionId>,
    /// Target member for `invoke`/`get`/`set`, or the event name for `event`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member: Option<String>,
    /// Ordered arguments for `invoke`/`set`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
    /// When true, no response is expected or sent.
    #[serde(default, skip_serializing_if = "is_false")]
    pub void: bool,
    /// Return value (`response`), error descriptor (`error`), or the
    /// name/argument map of an `event`/`task` frame.
    #[serde(default, skip_serializing_if = "Value::is_undefined")]
    pub payload: Value,
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

impl Packet {
    pub fn invoke(
        id: CorrelationId,
        def_id: DefinitionId,
        member: impl Into<String>,
        args: Vec<Value>,
        void: bool,
    ) -> Self {
        Self {
            action: Action::Invoke,
            id,
            def_id: Some(def_id),
            member: Some(member.into()),
            args,
            void,
            payload: Value::Undefined,
        }
    }

    pub fn get(id: CorrelationId, def_id: DefinitionId, member: impl Into<String>) -> Self {
        Self {
            action: Action::Get,
            id,
            def_id: Some(def_id),
            member: Some(member.into()),
            args: Vec::new(),
            void: false,
            payload: Value::Undefined,
        }
    }

    pub fn set(
        id: CorrelationId,
        def_id: DefinitionId,
        member: impl Into<String>,
        value: Value,
        void: bool,
    ) -> Self {
        Self {
            action: Action::Set,
            id,
            def_id: Some(def_id),
            member: Some(member.into()),
            args: vec![value],
            void,
            payload: Value::Undefined,
        }
    }

    pub fn response(id: CorrelationId, payload: Value) -> Self {
        Self {
            action: Action::Response,
            id,
            def_id: None,
            member: None,
            args: Vec::new(),
            void: false,
            payload,
        }
    }

    pub fn error(id: CorrelationId, descriptor: ErrorDescriptor) -> Self {
        Self {
            action: Action::Error,
            id,
            def_id: None,
            member: None,
            args: Vec::new(),
            void: false,
            payload: Value::Error(descriptor),
        }
    }

    /// Events are uncorrelated notifications; `member` carries the name.
    pub fn event(name: impl Into<String>, payload: Value) -> Self {
        Self {
            action: Action::Event,
            id: 0,
            def_id: None,
            member: Some(name.into()),
            args: Vec::new(),
            void: true,
            payload,
        }
    }

    pub fn task(id: CorrelationId, specs: Value, void: bool) -> Self {
        Self {
            action: Action::Task,
            id,
            def_id: None,
            member: None,
            args: Vec::new(),
            void,
            payload: specs,
        }
    }

    /// The error descriptor of an `error` packet, if this is one.
    pub fn error_descriptor(&self) -> Option<&ErrorDescriptor> {
        match (&self.action, &self.payload) {
            (Action::Error, Value::Error(descriptor)) => Some(descriptor),
            _ => None,
        }
    }
}
