//! Route table reconciliation.
//!
//! The drosse is authoritative for which routes exist and for every field
//! it reports; the front end only owns the extra annotation fields it adds
//! next to them.

use serde_json::Value;
use shared::domain::{Route, RouteTable};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutesError {
    #[error("config document has no `routes` object")]
    MissingRoutes,
    #[error("route '{0}' is not an object")]
    InvalidRoute(String),
}

/// Merges a freshly fetched route table into the locally stored one.
///
/// Every key of `remote` appears in the result and no other key does. For
/// keys present on both sides the remote fields overwrite the local ones,
/// while fields only known locally are carried over untouched.
pub fn merge(remote: &RouteTable, local: &RouteTable) -> RouteTable {
    remote
        .iter()
        .map(|(key, remote_route)| {
            let merged = match local.get(key) {
                Some(local_route) => {
                    let mut fields = local_route.0.clone();
                    for (name, value) in remote_route.fields() {
                        fields.insert(name.clone(), value.clone());
                    }
                    Route(fields)
                }
                None => remote_route.clone(),
            };
            (key.clone(), merged)
        })
        .collect()
}

/// Extracts the route table from a drosse `/UI` document.
pub fn routes_from_config(document: &Value) -> Result<RouteTable, RoutesError> {
    let routes = document
        .get("routes")
        .and_then(Value::as_object)
        .ok_or(RoutesError::MissingRoutes)?;

    routes
        .iter()
        .map(|(key, route)| match route {
            Value::Object(fields) => Ok((key.clone(), Route(fields.clone()))),
            _ => Err(RoutesError::InvalidRoute(key.clone())),
        })
        .collect()
}
