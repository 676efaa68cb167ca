use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::{DrosseId, DrosseMap},
    error::ApiError,
    protocol::{
        Ack, BrowseArgs, BrowseEntry, CommandName, FileArgs, FileContent, ImportArgs,
        ImportResult, OpenedFile, SaveArgs, UuidArgs,
    },
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("command gateway unreachable: {0}")]
    Transport(String),
    #[error("command rejected: {0}")]
    Rejected(#[from] ApiError),
    #[error("invalid command response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GatewayError::Decode(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

/// Request/response channel to the host runtime.
#[async_trait]
pub trait CommandGateway: Send + Sync {
    /// Previously saved registry, `None` when nothing was ever saved.
    async fn list(&self) -> Result<Option<DrosseMap>, GatewayError>;
    async fn save(&self, drosses: &DrosseMap) -> Result<(), GatewayError>;
    async fn start(&self, uuid: &DrosseId) -> Result<(), GatewayError>;
    async fn stop(&self, uuid: &DrosseId) -> Result<(), GatewayError>;
    async fn import(&self, path: &str) -> Result<ImportResult, GatewayError>;
    async fn open(&self, uuid: &DrosseId, file: &str) -> Result<OpenedFile, GatewayError>;
    async fn file(&self, uuid: &DrosseId, file: &str) -> Result<FileContent, GatewayError>;
    async fn browse(&self, dir: &str) -> Result<Vec<BrowseEntry>, GatewayError>;
}

/// Talks to the host over `POST {base}/commands/{name}`.
pub struct HttpCommandGateway {
    http: Client,
    base_url: String,
}

impl HttpCommandGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn invoke<A, R>(&self, command: CommandName, args: &A) -> Result<R, GatewayError>
    where
        A: Serialize + Sync,
        R: DeserializeOwned,
    {
        debug!(%command, "invoking host command");
        let res = self
            .http
            .post(format!("{}/commands/{}", self.base_url, command))
            .json(args)
            .send()
            .await?;

        let status = res.status();
        if status.is_success() {
            return Ok(res.json().await?);
        }

        let body = res.text().await?;
        match serde_json::from_str::<ApiError>(&body) {
            Ok(api_error) => Err(GatewayError::Rejected(api_error)),
            Err(_) => Err(GatewayError::Transport(format!(
                "{command} failed with status {status}: {body}"
            ))),
        }
    }
}

#[async_trait]
impl CommandGateway for HttpCommandGateway {
    async fn list(&self) -> Result<Option<DrosseMap>, GatewayError> {
        self.invoke(CommandName::List, &serde_json::json!({})).await
    }

    async fn save(&self, drosses: &DrosseMap) -> Result<(), GatewayError> {
        let args = SaveArgs {
            drosses: drosses.clone(),
        };
        let _: Ack = self.invoke(CommandName::Save, &args).await?;
        Ok(())
    }

    async fn start(&self, uuid: &DrosseId) -> Result<(), GatewayError> {
        let args = UuidArgs { uuid: uuid.clone() };
        let _: Ack = self.invoke(CommandName::Start, &args).await?;
        Ok(())
    }

    async fn stop(&self, uuid: &DrosseId) -> Result<(), GatewayError> {
        let args = UuidArgs { uuid: uuid.clone() };
        let _: Ack = self.invoke(CommandName::Stop, &args).await?;
        Ok(())
    }

    async fn import(&self, path: &str) -> Result<ImportResult, GatewayError> {
        let args = ImportArgs {
            path: path.to_string(),
        };
        self.invoke(CommandName::Import, &args).await
    }

    async fn open(&self, uuid: &DrosseId, file: &str) -> Result<OpenedFile, GatewayError> {
        let args = FileArgs {
            uuid: uuid.clone(),
            file: file.to_string(),
        };
        self.invoke(CommandName::Open, &args).await
    }

    async fn file(&self, uuid: &DrosseId, file: &str) -> Result<FileContent, GatewayError> {
        let args = FileArgs {
            uuid: uuid.clone(),
            file: file.to_string(),
        };
        self.invoke(CommandName::File, &args).await
    }

    async fn browse(&self, dir: &str) -> Result<Vec<BrowseEntry>, GatewayError> {
        let args = BrowseArgs {
            dir: dir.to_string(),
        };
        self.invoke(CommandName::Browse, &args).await
    }
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
