//! Thin front-end wrappers around the pass-through host commands.

use std::sync::Arc;

use shared::{
    domain::DrosseId,
    protocol::{BrowseEntry, ImportResult, OpenedFile},
};
use tracing::warn;

use crate::gateway::{CommandGateway, GatewayError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileLanguage {
    Json,
    Javascript,
    Text,
}

impl FileLanguage {
    pub fn for_file(file: &str) -> Self {
        if file.ends_with(".json") {
            FileLanguage::Json
        } else {
            FileLanguage::Javascript
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileLanguage::Json => "json",
            FileLanguage::Javascript => "javascript",
            FileLanguage::Text => "text",
        }
    }
}

/// A drosse source file ready for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileView {
    pub content: String,
    pub language: FileLanguage,
}

#[derive(Clone)]
pub struct DrosseIo {
    gateway: Arc<dyn CommandGateway>,
}

impl DrosseIo {
    pub fn new(gateway: Arc<dyn CommandGateway>) -> Self {
        Self { gateway }
    }

    /// Sub-directories of `dir`, ordered case-insensitively by path.
    pub async fn browse(&self, dir: &str) -> Result<Vec<BrowseEntry>, GatewayError> {
        let mut entries = self.gateway.browse(dir).await?;
        entries.sort_by_cached_key(|entry| entry.path.to_lowercase());
        Ok(entries)
    }

    /// Never fails: an unreadable file becomes a plain-text placeholder.
    pub async fn load_file(&self, uuid: &DrosseId, file: &str) -> FileView {
        match self.gateway.file(uuid, file).await {
            Ok(res) => FileView {
                content: res.content,
                language: FileLanguage::for_file(file),
            },
            Err(err) => {
                warn!(%uuid, file, error = %err, "failed loading drosse file");
                FileView {
                    content: format!("Failed loading file {file}"),
                    language: FileLanguage::Text,
                }
            }
        }
    }

    pub async fn import_folder(&self, path: &str) -> Result<ImportResult, GatewayError> {
        self.gateway.import(path).await
    }

    pub async fn open_file(&self, uuid: &DrosseId, file: &str) -> Result<OpenedFile, GatewayError> {
        self.gateway.open(uuid, file).await
    }

    pub async fn start(&self, uuid: &DrosseId) -> Result<(), GatewayError> {
        self.gateway.start(uuid).await
    }

    pub async fn stop(&self, uuid: &DrosseId) -> Result<(), GatewayError> {
        self.gateway.stop(uuid).await
    }
}

#[cfg(test)]
#[path = "tests/io_tests.rs"]
mod tests;
