//! Kanban Realtime Server
//!
//! Entry point: loads configuration, wires the connection lifecycle, auth,
//! subscription routing, and rate limiting components, and serves WebSocket
//! upgrades until a shutdown signal is received.
//!
//! The `Repository` trait (`kanban_realtime::messages::repository`) is an
//! external collaborator; the `MemoryRepository` below is a minimal
//! DashMap-backed stand-in so the binary is runnable standalone. A real
//! deployment supplies its own implementation backed by its task store.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use kanban_realtime::auth::Authenticator;
use kanban_realtime::config::Config;
use kanban_realtime::messages::repository::{RepoError, Repository, SubtaskSummary};
use kanban_realtime::server::Server;

/// DashMap-backed `Repository` used when no external store is configured.
struct MemoryRepository {
    tasks: DashMap<String, Value>,
    boards: DashMap<String, Value>,
    subtasks: DashMap<String, Vec<Value>>,
}

impl MemoryRepository {
    fn new() -> Self {
        Self {
            tasks: DashMap::new(),
            boards: DashMap::new(),
            subtasks: DashMap::new(),
        }
    }

    fn get_or_not_found(map: &DashMap<String, Value>, id: &str) -> Result<Value, RepoError> {
        map.get(id).map(|v| v.clone()).ok_or_else(|| RepoError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn get_task(&self, task_id: &str) -> Result<Value, RepoError> {
        Self::get_or_not_found(&self.tasks, task_id)
    }

    async fn update_task(&self, task_id: &str, updates: Value) -> Result<Value, RepoError> {
        let mut task = Self::get_or_not_found(&self.tasks, task_id)?;
        if let (Some(task_obj), Some(update_obj)) = (task.as_object_mut(), updates.as_object()) {
            for (k, v) in update_obj {
                task_obj.insert(k.clone(), v.clone());
            }
        }
        self.tasks.insert(task_id.to_string(), task.clone());
        Ok(task)
    }

    async fn create_task(&self, board_id: &str, title: &str, extra: Value) -> Result<Value, RepoError> {
        let id = uuid::Uuid::new_v4().to_string();
        let mut task = json!({ "id": id, "boardId": board_id, "title": title, "dependsOn": [] });
        if let (Some(task_obj), Some(extra_obj)) = (task.as_object_mut(), extra.as_object()) {
            for (k, v) in extra_obj {
                task_obj.insert(k.clone(), v.clone());
            }
        }
        self.tasks.insert(id, task.clone());
        Ok(task)
    }

    async fn delete_task(&self, task_id: &str) -> Result<(), RepoError> {
        self.tasks.remove(task_id).map(|_| ()).ok_or_else(|| RepoError::NotFound(task_id.to_string()))
    }

    async fn get_board(&self, board_id: &str) -> Result<Value, RepoError> {
        Self::get_or_not_found(&self.boards, board_id)
    }

    async fn update_board(&self, board_id: &str, updates: Value) -> Result<Value, RepoError> {
        let mut board = self.boards.get(board_id).map(|v| v.clone()).unwrap_or_else(|| json!({ "id": board_id }));
        if let (Some(board_obj), Some(update_obj)) = (board.as_object_mut(), updates.as_object()) {
            for (k, v) in update_obj {
                board_obj.insert(k.clone(), v.clone());
            }
        }
        self.boards.insert(board_id.to_string(), board.clone());
        Ok(board)
    }

    async fn create_note(&self, task_id: &str, content: Value) -> Result<Value, RepoError> {
        let mut task = Self::get_or_not_found(&self.tasks, task_id)?;
        let note = json!({ "id": uuid::Uuid::new_v4().to_string(), "content": content });
        if let Some(notes) = task.get_mut("notes").and_then(Value::as_array_mut) {
            notes.push(note.clone());
        } else if let Some(task_obj) = task.as_object_mut() {
            task_obj.insert("notes".to_string(), json!([note.clone()]));
        }
        self.tasks.insert(task_id.to_string(), task);
        Ok(note)
    }

    async fn assign_tag(&self, task_id: &str, tag_id: &str) -> Result<(), RepoError> {
        let mut task = Self::get_or_not_found(&self.tasks, task_id)?;
        if let Some(tags) = task.get_mut("tags").and_then(Value::as_array_mut) {
            tags.push(json!(tag_id));
        } else if let Some(task_obj) = task.as_object_mut() {
            task_obj.insert("tags".to_string(), json!([tag_id]));
        }
        self.tasks.insert(task_id.to_string(), task);
        Ok(())
    }

    async fn add_dependency(&self, task_id: &str, depends_on_task_id: &str) -> Result<(), RepoError> {
        let mut task = Self::get_or_not_found(&self.tasks, task_id)?;
        if depends_on_task_id == task_id {
            return Err(RepoError::Cycle);
        }
        if let Some(deps) = task.get_mut("dependsOn").and_then(Value::as_array_mut) {
            if deps.iter().any(|d| d == depends_on_task_id) {
                return Ok(());
            }
            deps.push(json!(depends_on_task_id));
        }
        self.tasks.insert(task_id.to_string(), task);
        Ok(())
    }

    async fn remove_dependency(&self, task_id: &str, depends_on_task_id: &str) -> Result<(), RepoError> {
        let mut task = Self::get_or_not_found(&self.tasks, task_id)?;
        if let Some(deps) = task.get_mut("dependsOn").and_then(Value::as_array_mut) {
            deps.retain(|d| d != depends_on_task_id);
        }
        self.tasks.insert(task_id.to_string(), task);
        Ok(())
    }

    async fn get_subtasks(&self, parent_task_id: &str) -> Result<Vec<SubtaskSummary>, RepoError> {
        let subtasks = self.subtasks.get(parent_task_id).map(|v| v.clone()).unwrap_or_default();
        Ok(subtasks
            .iter()
            .filter_map(|s| {
                let id = s.get("id")?.as_str()?.to_string();
                let done = s.get("done").and_then(Value::as_bool).unwrap_or(false);
                Some(SubtaskSummary { id, done })
            })
            .collect())
    }

    async fn create_subtask(&self, parent_task_id: &str, title: &str, extra: Value) -> Result<Value, RepoError> {
        let id = uuid::Uuid::new_v4().to_string();
        let mut subtask = json!({ "id": id, "parentTaskId": parent_task_id, "title": title, "done": false });
        if let (Some(subtask_obj), Some(extra_obj)) = (subtask.as_object_mut(), extra.as_object()) {
            for (k, v) in extra_obj {
                subtask_obj.insert(k.clone(), v.clone());
            }
        }
        self.subtasks.entry(parent_task_id.to_string()).or_default().push(subtask.clone());
        Ok(subtask)
    }

    async fn update_subtask(&self, subtask_id: &str, updates: Value) -> Result<Value, RepoError> {
        for mut entry in self.subtasks.iter_mut() {
            if let Some(subtask) = entry.value_mut().iter_mut().find(|s| s.get("id").and_then(Value::as_str) == Some(subtask_id)) {
                if let (Some(subtask_obj), Some(update_obj)) = (subtask.as_object_mut(), updates.as_object()) {
                    for (k, v) in update_obj {
                        subtask_obj.insert(k.clone(), v.clone());
                    }
                }
                return Ok(subtask.clone());
            }
        }
        Err(RepoError::NotFound(subtask_id.to_string()))
    }

    async fn delete_subtask(&self, subtask_id: &str) -> Result<(), RepoError> {
        for mut entry in self.subtasks.iter_mut() {
            let before = entry.value().len();
            entry.value_mut().retain(|s| s.get("id").and_then(Value::as_str) != Some(subtask_id));
            if entry.value().len() != before {
                return Ok(());
            }
        }
        Err(RepoError::NotFound(subtask_id.to_string()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    let repository: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
    let authenticator = Arc::new(Authenticator::new(config.auth.jwt_secret.clone()));

    tracing::info!(
        version = kanban_realtime::VERSION,
        bind = %format!("{}:{}", config.transport.bind_host, config.transport.bind_port),
        "starting {}",
        kanban_realtime::NAME,
    );

    let server = Server::new(config, repository, authenticator);
    server
        .serve(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received, draining connections");
        })
        .await?;

    tracing::info!("server stopped");
    Ok(())
}
