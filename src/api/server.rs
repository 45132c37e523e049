//! Line-delimited JSON server over TCP.
//!
//! Each request is one JSON object per line, `{"command": "...", "params": {...}}`;
//! each reply is one line, `{"status": "success", "data": ...}` or
//! `{"status": "error", "message": "..."}`.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::json;

use crate::api::dto::PathsDto;
use crate::config::SimulationConfig;
use crate::domain::intervention::{InterventionSpec, SimulationEngine};
use crate::domain::paths::{self, DEFAULT_MAX_PATHS};
use crate::domain::record::{LazyModel, ModelRecord};
use crate::domain::store::ModelStore;

#[derive(Debug, Deserialize)]
struct CommandReq {
    command: String,
    params: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct LoadModelParams {
    name: String,
    record: Option<ModelRecord>,
    path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct ImpactParams {
    model: String,
    intervention: InterventionSpec,
    num_samples: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct PathsParams {
    model: String,
    source: String,
    target: String,
    max_paths: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RootCausesParams {
    model: String,
    node: String,
}

/// Models loaded into a running server, shared by all connections.
pub struct ServerState {
    models: DashMap<String, Arc<LazyModel>>,
    engine: SimulationEngine,
    store: Option<Arc<dyn ModelStore>>,
    shutdown: AtomicBool,
}

impl ServerState {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            models: DashMap::new(),
            engine: SimulationEngine::new(config),
            store: None,
            shutdown: AtomicBool::new(false),
        }
    }

    /// Back `LOAD_MODEL` with a store: named records are fetched from it when
    /// the request carries none, and persisted to it when it does.
    pub fn with_store(mut self, store: Arc<dyn ModelStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn insert(&self, name: &str, record: ModelRecord) {
        self.models
            .insert(name.to_string(), Arc::new(LazyModel::new(record)));
    }

    pub fn model_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.models.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn model(&self, name: &str) -> Result<Arc<LazyModel>> {
        self.models
            .get(name)
            .map(|m| Arc::clone(m.value()))
            .ok_or_else(|| anyhow::anyhow!("Model not loaded: {}", name))
    }
}

pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl Server {
    pub fn bind(address: &str, state: ServerState) -> Result<Self> {
        let listener = TcpListener::bind(address)
            .with_context(|| format!("Failed to bind to {}", address))?;
        Ok(Self {
            listener,
            state: Arc::new(state),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// Accept connections until a client sends `SHUTDOWN`.
    pub fn run(self) -> Result<()> {
        let address = self.local_addr()?;
        tracing::info!(%address, "API server listening");

        for stream in self.listener.incoming() {
            if self.state.is_shutting_down() {
                break;
            }
            match stream {
                Ok(stream) => {
                    let state = Arc::clone(&self.state);
                    thread::spawn(move || {
                        if let Err(e) = handle_connection(stream, &state, address) {
                            tracing::warn!(error = %e, "connection error");
                        }
                    });
                }
                Err(e) => tracing::warn!(error = %e, "accept error"),
            }
        }

        tracing::info!("API server stopped");
        Ok(())
    }
}

pub fn start_server(port: u16, state: ServerState) -> Result<()> {
    Server::bind(&format!("127.0.0.1:{}", port), state)?.run()
}

fn handle_connection(stream: TcpStream, state: &ServerState, address: SocketAddr) -> Result<()> {
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            break; // Connection closed
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match process_command(state, trimmed) {
            Ok(data) => json!({
                "status": "success",
                "data": data
            }),
            Err(e) => json!({
                "status": "error",
                "message": format!("{:#}", e)
            }),
        };

        let response_str = serde_json::to_string(&response)?;
        writer.write_all(response_str.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;

        if state.is_shutting_down() {
            // Wake the accept loop so it observes the flag.
            let _ = TcpStream::connect(address);
            break;
        }
    }
    Ok(())
}

fn params<T: serde::de::DeserializeOwned>(
    command: &str,
    params: Option<serde_json::Value>,
) -> Result<T> {
    let params = params.ok_or_else(|| anyhow::anyhow!("Missing params for {}", command))?;
    serde_json::from_value(params).with_context(|| format!("Invalid params for {}", command))
}

fn process_command(state: &ServerState, json_str: &str) -> Result<serde_json::Value> {
    let req: CommandReq = serde_json::from_str(json_str).context("Invalid JSON format")?;
    tracing::debug!(command = %req.command, "request");

    match req.command.as_str() {
        "PING" => Ok(json!("PONG")),
        "LOAD_MODEL" => handle_load_model(state, params(&req.command, req.params)?),
        "LIST_MODELS" => Ok(json!(state.model_names())),
        "IMPACT" => handle_impact(state, params(&req.command, req.params)?),
        "PATHS" => handle_paths(state, params(&req.command, req.params)?),
        "ROOT_CAUSES" => handle_root_causes(state, params(&req.command, req.params)?),
        "SHUTDOWN" => {
            tracing::info!("shutdown requested");
            state.shutdown.store(true, Ordering::SeqCst);
            Ok(json!("Shutting down..."))
        }
        _ => anyhow::bail!("Unknown command: {}", req.command),
    }
}

fn handle_load_model(state: &ServerState, params: LoadModelParams) -> Result<serde_json::Value> {
    let record = match (params.record, params.path) {
        (Some(record), _) => record,
        (None, Some(path)) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read model {}", path.display()))?;
            ModelRecord::from_json(&json).context("Invalid model record")?
        }
        (None, None) => {
            let store = state
                .store
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("LOAD_MODEL needs 'record' or 'path'"))?;
            store
                .get(&params.name)?
                .ok_or_else(|| anyhow::anyhow!("Model not in store: {}", params.name))?
        }
    };

    if let Some(store) = &state.store {
        store.put(&params.name, &record)?;
    }

    let summary = json!({
        "name": params.name,
        "nodes": record.nodes.len(),
        "mechanisms": record.mechanisms.len(),
        "validation_r2": record.metadata.validation_r2,
    });
    tracing::info!(name = %params.name, nodes = record.nodes.len(), "model loaded");
    state.insert(&params.name, record);
    Ok(summary)
}

fn handle_impact(state: &ServerState, params: ImpactParams) -> Result<serde_json::Value> {
    let model = state.model(&params.model)?;
    let scm = model.get()?;
    let num_samples = params
        .num_samples
        .unwrap_or_else(|| state.engine.config().effective_num_samples());
    let estimate = state
        .engine
        .estimate_impact(scm, &params.intervention, num_samples)?;
    Ok(serde_json::to_value(estimate)?)
}

fn handle_paths(state: &ServerState, params: PathsParams) -> Result<serde_json::Value> {
    let model = state.model(&params.model)?;
    let graph = model.get()?.graph();
    let found = paths::causal_paths(
        graph,
        &params.source,
        &params.target,
        params.max_paths.unwrap_or(DEFAULT_MAX_PATHS),
    )?;
    Ok(serde_json::to_value(PathsDto {
        source: params.source,
        target: params.target,
        paths: found,
    })?)
}

fn handle_root_causes(state: &ServerState, params: RootCausesParams) -> Result<serde_json::Value> {
    let model = state.model(&params.model)?;
    let roots = paths::root_causes(model.get()?.graph(), &params.node)?;
    Ok(json!(roots))
}
