use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Drosse, DrosseId, DrosseMap};

/// Commands understood by the host runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandName {
    List,
    Save,
    Start,
    Stop,
    Import,
    Open,
    File,
    Browse,
}

impl CommandName {
    pub const ALL: [CommandName; 8] = [
        CommandName::List,
        CommandName::Save,
        CommandName::Start,
        CommandName::Stop,
        CommandName::Import,
        CommandName::Open,
        CommandName::File,
        CommandName::Browse,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CommandName::List => "list",
            CommandName::Save => "save",
            CommandName::Start => "start",
            CommandName::Stop => "stop",
            CommandName::Import => "import",
            CommandName::Open => "open",
            CommandName::File => "file",
            CommandName::Browse => "browse",
        }
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| format!("unknown command '{s}'"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveArgs {
    pub drosses: DrosseMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UuidArgs {
    pub uuid: DrosseId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportArgs {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileArgs {
    pub uuid: DrosseId,
    pub file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowseArgs {
    pub dir: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
}

impl Ack {
    pub const OK: Ack = Ack { ok: true };
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportResult {
    pub path: String,
    pub accepted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenedFile {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowseEntry {
    pub path: String,
    #[serde(default)]
    pub selectable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficRequest {
    pub method: String,
    pub url: String,
    pub uuid: DrosseId,
}

/// Lifecycle and traffic notifications pushed by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum DrosseEvent {
    #[serde(rename = "drosse.up")]
    Up { drosse: Drosse },
    #[serde(rename = "drosse.down")]
    Down { uuid: DrosseId },
    #[serde(rename = "drosse.request")]
    Request { request: TrafficRequest },
    #[serde(rename = "drosse.log")]
    Log { uuid: DrosseId, msg: Value },
}

impl DrosseEvent {
    pub fn uuid(&self) -> &DrosseId {
        match self {
            DrosseEvent::Up { drosse } => &drosse.uuid,
            DrosseEvent::Down { uuid } | DrosseEvent::Log { uuid, .. } => uuid,
            DrosseEvent::Request { request } => &request.uuid,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DrosseEvent::Up { .. } => "drosse.up",
            DrosseEvent::Down { .. } => "drosse.down",
            DrosseEvent::Request { .. } => "drosse.request",
            DrosseEvent::Log { .. } => "drosse.log",
        }
    }
}

/// Messages fanned out to presentation layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMessage {
    Request {
        uuid: DrosseId,
        method: String,
        url: String,
    },
    Log {
        uuid: DrosseId,
        msg: Value,
    },
}
