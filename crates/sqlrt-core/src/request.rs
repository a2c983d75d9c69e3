//! Request and options types that flow from caller to executor (spec §3, §6).

use crate::ids::InstanceId;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    Text,
    StoredProcedure,
    TableDirect,
}

/// How the executor should consult the schema service before a call
/// (spec §3 `ExecutionOptions.schemaMode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaMode {
    None,
    ServiceOnly,
    SnapshotOnly,
    #[default]
    SnapshotThenService,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    pub schema_mode: SchemaMode,
    pub command_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct DbRequest<P> {
    pub instance_id: InstanceId,
    pub command_text: String,
    pub command_type: CommandType,
    pub parameters: P,
    pub is_transactional: bool,
    pub cancellation: CancellationToken,
}

impl<P> DbRequest<P> {
    pub fn new(instance_id: InstanceId, command_text: impl Into<String>, command_type: CommandType, parameters: P) -> Self {
        Self {
            instance_id,
            command_text: command_text.into(),
            command_type,
            parameters,
            is_transactional: false,
            cancellation: CancellationToken::new(),
        }
    }
}
