use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DrosseId(pub String);

impl DrosseId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DrosseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DrosseId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// One entry of a drosse route table.
///
/// Routes are open JSON objects: the drosse itself owns the structural
/// fields (method, pattern, handler...) and the front end may add its own
/// annotation fields next to them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Route(pub Map<String, Value>);

impl Route {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

pub type RouteTable = BTreeMap<String, Route>;

pub type DrosseMap = BTreeMap<DrosseId, Drosse>;

fn default_proto() -> String {
    "http".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Drosse {
    pub uuid: DrosseId,
    #[serde(default)]
    pub up: bool,
    #[serde(default)]
    pub open: bool,
    #[serde(default)]
    pub selected: bool,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub port: u16,
    #[serde(default = "default_proto")]
    pub proto: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routes: Option<RouteTable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Drosse {
    pub fn new(uuid: impl Into<DrosseId>) -> Self {
        Self {
            uuid: uuid.into(),
            up: false,
            open: false,
            selected: false,
            hosts: Vec::new(),
            port: 0,
            proto: default_proto(),
            routes: None,
            name: None,
            root: None,
            version: None,
            available: None,
            last_seen: None,
            extra: Map::new(),
        }
    }

    pub fn primary_host(&self) -> Option<&str> {
        self.hosts.first().map(String::as_str)
    }
}

impl From<String> for DrosseId {
    fn from(value: String) -> Self {
        Self(value)
    }
}
