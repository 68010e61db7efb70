//! Repository: the external persistence collaborator.
//!
//! Out of scope for this crate's implementation, but the trait
//! boundary lives here so handlers can be written and tested against a
//! fake. Payloads are left as `serde_json::Value` rather than modeled as
//! full board/task structs, matching how `domain::event::PublishedEvent`
//! stays generic over `Value` — this system's job is routing and
//! authorization, not owning the task/board schema.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors the Repository can return. Cycle is its own variant because the
/// dependency handler surfaces it as a distinct wire code.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepoError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("would create a dependency cycle")]
    Cycle,
    #[error("repository failure: {0}")]
    Failure(String),
}

/// A subtask's completion state, as needed for the parent-progress rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtaskSummary {
    pub id: String,
    pub done: bool,
}

/// Round(100 * done / total). Zero subtasks yields 0.
pub fn parent_progress(subtasks: &[SubtaskSummary]) -> u32 {
    if subtasks.is_empty() {
        return 0;
    }
    let done = subtasks.iter().filter(|s| s.done).count();
    ((100.0 * done as f64 / subtasks.len() as f64).round()) as u32
}

/// Persistent storage for boards, tasks, notes, and tags.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_task(&self, task_id: &str) -> Result<Value, RepoError>;
    async fn update_task(&self, task_id: &str, updates: Value) -> Result<Value, RepoError>;
    async fn create_task(&self, board_id: &str, title: &str, extra: Value) -> Result<Value, RepoError>;
    async fn delete_task(&self, task_id: &str) -> Result<(), RepoError>;

    async fn get_board(&self, board_id: &str) -> Result<Value, RepoError>;
    async fn update_board(&self, board_id: &str, updates: Value) -> Result<Value, RepoError>;

    async fn create_note(&self, task_id: &str, content: Value) -> Result<Value, RepoError>;
    async fn assign_tag(&self, task_id: &str, tag_id: &str) -> Result<(), RepoError>;

    async fn add_dependency(&self, task_id: &str, depends_on_task_id: &str) -> Result<(), RepoError>;
    async fn remove_dependency(&self, task_id: &str, depends_on_task_id: &str) -> Result<(), RepoError>;
    async fn get_subtasks(&self, parent_task_id: &str) -> Result<Vec<SubtaskSummary>, RepoError>;
    async fn create_subtask(&self, parent_task_id: &str, title: &str, extra: Value) -> Result<Value, RepoError>;
    async fn update_subtask(&self, subtask_id: &str, updates: Value) -> Result<Value, RepoError>;
    async fn delete_subtask(&self, subtask_id: &str) -> Result<(), RepoError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_progress_rounds_to_nearest_percent() {
        let subtasks = vec![
            SubtaskSummary { id: "1".into(), done: true },
            SubtaskSummary { id: "2".into(), done: false },
            SubtaskSummary { id: "3".into(), done: false },
            SubtaskSummary { id: "4".into(), done: false },
        ];
        assert_eq!(parent_progress(&subtasks), 25);
    }

    #[test]
    fn parent_progress_with_no_subtasks_is_zero() {
        assert_eq!(parent_progress(&[]), 0);
    }
}
