use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use shared::{
    domain::{Drosse, DrosseId, DrosseMap, RouteTable},
    error::ApiError,
    protocol::{BrowseEntry, FileContent, ImportResult, OpenedFile},
};
use tokio::sync::Mutex;

use crate::{
    config_fetch::{ConfigFetchError, ConfigFetcher},
    gateway::{CommandGateway, GatewayError},
};

#[derive(Default)]
pub(crate) struct RecordingGateway {
    pub persisted: Mutex<Option<DrosseMap>>,
    pub list_calls: AtomicUsize,
    pub list_delay: Mutex<Option<Duration>>,
    pub fail_list: AtomicBool,
    pub saves: Mutex<Vec<DrosseMap>>,
    pub fail_saves: AtomicBool,
    pub files: Mutex<HashMap<String, String>>,
    pub browse_entries: Mutex<Vec<BrowseEntry>>,
    pub started: Mutex<Vec<DrosseId>>,
    pub stopped: Mutex<Vec<DrosseId>>,
}

impl RecordingGateway {
    pub fn with_persisted(drosses: DrosseMap) -> Self {
        Self {
            persisted: Mutex::new(Some(drosses)),
            ..Self::default()
        }
    }

    pub fn list_count(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub async fn save_count(&self) -> usize {
        self.saves.lock().await.len()
    }

    pub async fn last_save(&self) -> Option<DrosseMap> {
        self.saves.lock().await.last().cloned()
    }
}

#[async_trait]
impl CommandGateway for RecordingGateway {
    async fn list(&self) -> Result<Option<DrosseMap>, GatewayError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.list_delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(GatewayError::Transport("host offline".to_string()));
        }
        Ok(self.persisted.lock().await.clone())
    }

    async fn save(&self, drosses: &DrosseMap) -> Result<(), GatewayError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(GatewayError::Transport("save refused".to_string()));
        }
        self.saves.lock().await.push(drosses.clone());
        Ok(())
    }

    async fn start(&self, uuid: &DrosseId) -> Result<(), GatewayError> {
        self.started.lock().await.push(uuid.clone());
        Ok(())
    }

    async fn stop(&self, uuid: &DrosseId) -> Result<(), GatewayError> {
        self.stopped.lock().await.push(uuid.clone());
        Ok(())
    }

    async fn import(&self, path: &str) -> Result<ImportResult, GatewayError> {
        Ok(ImportResult {
            path: path.to_string(),
            accepted: true,
        })
    }

    async fn open(&self, uuid: &DrosseId, file: &str) -> Result<OpenedFile, GatewayError> {
        Ok(OpenedFile {
            path: format!("/drosses/{uuid}/{file}"),
        })
    }

    async fn file(&self, _uuid: &DrosseId, file: &str) -> Result<FileContent, GatewayError> {
        self.files
            .lock()
            .await
            .get(file)
            .map(|content| FileContent {
                content: content.clone(),
            })
            .ok_or_else(|| GatewayError::Rejected(ApiError::not_found(format!("no file {file}"))))
    }

    async fn browse(&self, _dir: &str) -> Result<Vec<BrowseEntry>, GatewayError> {
        Ok(self.browse_entries.lock().await.clone())
    }
}

/// Config fetcher answering from a fixed table; unknown drosses are
/// unreachable.
#[derive(Default)]
pub(crate) struct StaticFetcher {
    responses: Mutex<HashMap<DrosseId, Result<RouteTable, ConfigFetchError>>>,
    delay: Mutex<Option<Duration>>,
    pub calls: AtomicUsize,
}

impl StaticFetcher {
    pub async fn respond(&self, uuid: &str, result: Result<RouteTable, ConfigFetchError>) {
        self.responses
            .lock()
            .await
            .insert(DrosseId::from(uuid), result);
    }

    pub async fn delay_by(&self, delay: Duration) {
        *self.delay.lock().await = Some(delay);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigFetcher for StaticFetcher {
    async fn fetch_routes(&self, drosse: &Drosse) -> Result<RouteTable, ConfigFetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .await
            .get(&drosse.uuid)
            .cloned()
            .unwrap_or_else(|| Err(ConfigFetchError::Unreachable("connection refused".to_string())))
    }
}

pub(crate) fn live_drosse(uuid: &str) -> Drosse {
    let mut drosse = Drosse::new(uuid);
    drosse.up = true;
    drosse.hosts = vec!["h".to_string()];
    drosse.port = 8080;
    drosse.proto = "http".to_string();
    drosse
}
