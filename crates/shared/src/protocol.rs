use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Board, BoardId, Column, ColumnId, Comment, CommentId, EntityKind, Task, TaskId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardPayload {
    #[serde(rename = "_id", alias = "id")]
    pub id: BoardId,
    pub name: String,
    #[serde(default)]
    pub columns: Vec<ColumnPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnPayload {
    #[serde(rename = "_id", alias = "id")]
    pub id: ColumnId,
    #[serde(
        rename = "board",
        alias = "boardId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub board_id: Option<BoardId>,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPayload {
    #[serde(rename = "_id", alias = "id")]
    pub id: TaskId,
    #[serde(
        rename = "column",
        alias = "columnId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub column_id: Option<ColumnId>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub comments: Vec<CommentPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentPayload {
    #[serde(rename = "_id", alias = "id")]
    pub id: CommentId,
    #[serde(default)]
    pub author: String,
    pub text: String,
    #[serde(rename = "createdAt", alias = "created_at")]
    pub created_at: DateTime<Utc>,
}

/// A payload arrived without a back-reference the request context could fill in.
#[derive(Debug, Error)]
#[error("{entity} payload {id} has no {field} reference")]
pub struct MissingReference {
    pub entity: EntityKind,
    pub id: String,
    pub field: &'static str,
}

impl BoardPayload {
    pub fn into_board(self) -> Board {
        let board_id = self.id;
        let columns = self
            .columns
            .into_iter()
            .map(|column| column.into_column_or(&board_id))
            .collect();
        Board {
            id: board_id,
            name: self.name,
            columns,
        }
    }
}

impl ColumnPayload {
    /// Columns embedded in (or created under) a board default to that board.
    pub fn into_column_or(self, board_id: &BoardId) -> Column {
        Column {
            board_id: self.board_id.unwrap_or_else(|| board_id.clone()),
            id: self.id,
            name: self.name,
            color: self.color.unwrap_or_default(),
        }
    }

    pub fn into_column(self) -> Result<Column, MissingReference> {
        let Some(board_id) = self.board_id else {
            return Err(MissingReference {
                entity: EntityKind::Column,
                id: self.id.0,
                field: "board",
            });
        };
        Ok(Column {
            id: self.id,
            board_id,
            name: self.name,
            color: self.color.unwrap_or_default(),
        })
    }
}

impl TaskPayload {
    pub fn into_task_or(self, column_id: &ColumnId) -> Task {
        let column_id = self.column_id.clone().unwrap_or_else(|| column_id.clone());
        self.build(column_id)
    }

    pub fn into_task(self) -> Result<Task, MissingReference> {
        match self.column_id.clone() {
            Some(column_id) => Ok(self.build(column_id)),
            None => Err(MissingReference {
                entity: EntityKind::Task,
                id: self.id.0,
                field: "column",
            }),
        }
    }

    fn build(self, column_id: ColumnId) -> Task {
        Task {
            id: self.id,
            column_id,
            title: self.title,
            description: self.description.unwrap_or_default(),
            comments: self.comments.into_iter().map(Comment::from).collect(),
        }
    }
}

impl From<CommentPayload> for Comment {
    fn from(value: CommentPayload) -> Self {
        Self {
            id: value.id,
            author: value.author,
            text: value.text,
            created_at: value.created_at,
        }
    }
}

impl From<&Comment> for CommentPayload {
    fn from(value: &Comment) -> Self {
        Self {
            id: value.id.clone(),
            author: value.author.clone(),
            text: value.text.clone(),
            created_at: value.created_at,
        }
    }
}

impl From<&Board> for BoardPayload {
    fn from(value: &Board) -> Self {
        Self {
            id: value.id.clone(),
            name: value.name.clone(),
            columns: value.columns.iter().map(ColumnPayload::from).collect(),
        }
    }
}

impl From<&Column> for ColumnPayload {
    fn from(value: &Column) -> Self {
        Self {
            id: value.id.clone(),
            board_id: Some(value.board_id.clone()),
            name: value.name.clone(),
            color: Some(value.color.clone()),
        }
    }
}

impl From<&Task> for TaskPayload {
    fn from(value: &Task) -> Self {
        Self {
            id: value.id.clone(),
            column_id: Some(value.column_id.clone()),
            title: value.title.clone(),
            description: Some(value.description.clone()),
            comments: value.comments.iter().map(CommentPayload::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardDraft {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDraft {
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Partial task update; absent fields are left untouched by the authority.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<Vec<CommentPayload>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveTaskRequest {
    #[serde(rename = "newColumnId")]
    pub new_column_id: ColumnId,
    #[serde(rename = "newOrder")]
    pub new_order: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderTasksRequest {
    #[serde(rename = "taskIds")]
    pub task_ids: Vec<TaskId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardsEnvelope {
    pub boards: Vec<BoardPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardEnvelope {
    pub board: BoardPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnEnvelope {
    pub column: ColumnPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksEnvelope {
    pub tasks: Vec<TaskPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub task: TaskPayload,
}
