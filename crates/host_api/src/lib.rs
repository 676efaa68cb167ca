use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use shared::{
    domain::{Drosse, DrosseId, DrosseMap},
    error::{ApiError, ErrorCode},
    protocol::{Ack, BrowseEntry, FileContent, ImportResult, OpenedFile},
};
use storage::Storage;
use tracing::{info, warn};

/// Marker file identifying a directory as a drosse.
pub const DROSSE_CONFIG_FILE: &str = ".drosserc.js";

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

/// Persisted registry with `available` recomputed from the filesystem.
/// `None` when nothing was ever saved.
pub async fn list_drosses(ctx: &ApiContext) -> Result<Option<DrosseMap>, ApiError> {
    let mut drosses = ctx.storage.list_drosses().await.map_err(internal)?;
    if drosses.is_empty() {
        return Ok(None);
    }
    for drosse in drosses.values_mut() {
        drosse.available = Some(is_available(drosse).await);
    }
    Ok(Some(drosses))
}

pub async fn save_drosses(ctx: &ApiContext, drosses: &DrosseMap) -> Result<Ack, ApiError> {
    if let Some((key, drosse)) = drosses.iter().find(|(key, drosse)| **key != drosse.uuid) {
        return Err(ApiError::validation(format!(
            "drosse {} stored under key {key}",
            drosse.uuid
        )));
    }
    ctx.storage.save_drosses(drosses).await.map_err(internal)?;
    info!(drosses = drosses.len(), "drosses saved");
    Ok(Ack::OK)
}

pub async fn start_drosse(ctx: &ApiContext, uuid: &DrosseId) -> Result<Ack, ApiError> {
    require_drosse(ctx, uuid).await?;
    info!(%uuid, "start requested");
    Ok(Ack::OK)
}

pub async fn stop_drosse(ctx: &ApiContext, uuid: &DrosseId) -> Result<Ack, ApiError> {
    require_drosse(ctx, uuid).await?;
    info!(%uuid, "stop requested");
    Ok(Ack::OK)
}

/// Accepts a folder for import when it holds a drosse config file.
pub async fn import_folder(path: &str) -> Result<ImportResult, ApiError> {
    let accepted = file_exists(&Path::new(path).join(DROSSE_CONFIG_FILE)).await;
    if accepted {
        info!(path, "drosse folder imported");
    } else {
        warn!(path, "import rejected: no {DROSSE_CONFIG_FILE} in folder");
    }
    Ok(ImportResult {
        path: path.to_string(),
        accepted,
    })
}

pub async fn open_file(
    ctx: &ApiContext,
    uuid: &DrosseId,
    file: &str,
) -> Result<OpenedFile, ApiError> {
    let path = resolve_file(ctx, uuid, file).await?;
    if !file_exists(&path).await {
        return Err(ApiError::not_found(format!("{} does not exist", path.display())));
    }
    Ok(OpenedFile {
        path: path.display().to_string(),
    })
}

pub async fn read_file(
    ctx: &ApiContext,
    uuid: &DrosseId,
    file: &str,
) -> Result<FileContent, ApiError> {
    let path = resolve_file(ctx, uuid, file).await?;
    let content = tokio::fs::read_to_string(&path).await.map_err(|err| {
        ApiError::new(
            ErrorCode::Unavailable,
            format!("failed to read {}: {err}", path.display()),
        )
    })?;
    Ok(FileContent { content })
}

/// Sub-directories of `dir`; a directory is selectable when it is a drosse.
pub async fn browse(dir: &str) -> Result<Vec<BrowseEntry>, ApiError> {
    let mut read_dir = tokio::fs::read_dir(dir).await.map_err(|err| {
        ApiError::not_found(format!("cannot browse {dir}: {err}"))
    })?;

    let mut entries = Vec::new();
    while let Some(entry) = read_dir.next_entry().await.map_err(|err| {
        ApiError::internal(format!("failed to list {dir}: {err}"))
    })? {
        let path = entry.path();
        let is_dir = entry
            .file_type()
            .await
            .map(|file_type| file_type.is_dir())
            .unwrap_or(false);
        if !is_dir {
            continue;
        }
        entries.push(BrowseEntry {
            selectable: file_exists(&path.join(DROSSE_CONFIG_FILE)).await,
            path: path.display().to_string(),
        });
    }
    Ok(entries)
}

/// Builds the live view of an advertising drosse on top of its stored
/// record: advertised fields win, front-end state is kept.
pub async fn merge_advertisement(
    ctx: &ApiContext,
    advertised: Drosse,
) -> Result<Drosse, ApiError> {
    let stored = ctx
        .storage
        .find_drosse(&advertised.uuid)
        .await
        .map_err(internal)?;

    let mut drosse = match stored {
        Some(mut stored) => {
            // partial advertisements keep the last known address
            if !advertised.hosts.is_empty() {
                stored.hosts = advertised.hosts;
                stored.proto = advertised.proto;
            }
            if advertised.port != 0 {
                stored.port = advertised.port;
            }
            stored.name = advertised.name.or(stored.name);
            stored.root = advertised.root.or(stored.root);
            stored.version = advertised.version.or(stored.version);
            stored.extra.extend(advertised.extra);
            stored
        }
        None => advertised,
    };
    drosse.up = true;
    drosse.last_seen = Some(Utc::now());
    drosse.available = Some(is_available(&drosse).await);
    Ok(drosse)
}

async fn require_drosse(ctx: &ApiContext, uuid: &DrosseId) -> Result<Drosse, ApiError> {
    ctx.storage
        .find_drosse(uuid)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found(format!("drosse {uuid} is not registered")))
}

async fn resolve_file(ctx: &ApiContext, uuid: &DrosseId, file: &str) -> Result<PathBuf, ApiError> {
    let relative = Path::new(file);
    if file.is_empty()
        || relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(ApiError::validation(format!(
            "'{file}' must be a path inside the drosse root"
        )));
    }

    let drosse = require_drosse(ctx, uuid).await?;
    let root = drosse
        .root
        .ok_or_else(|| ApiError::validation(format!("drosse {uuid} has no root folder")))?;
    Ok(Path::new(&root).join(relative))
}

async fn is_available(drosse: &Drosse) -> bool {
    match &drosse.root {
        Some(root) => file_exists(&Path::new(root).join(DROSSE_CONFIG_FILE)).await,
        None => false,
    }
}

async fn file_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
