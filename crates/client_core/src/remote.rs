//! Boundary to the remote authority that owns boards, columns and tasks.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use shared::{
    domain::{Board, BoardId, Column, ColumnId, Task, TaskId},
    error::ApiError,
    protocol::{
        BoardDraft, BoardEnvelope, BoardPayload, BoardsEnvelope, ColumnDraft, ColumnEnvelope, ColumnPayload,
        MissingReference, MoveTaskRequest, ReorderTasksRequest, TaskDraft, TaskEnvelope,
        TaskPatch, TaskPayload, TasksEnvelope,
    },
};
use tracing::debug;

use crate::{config::ClientSettings, error::RemoteError, session::Session};

/// One call per authority operation. Implementations return entities with
/// their back-references resolved, except for updates: the authority may
/// leave the reference out there, and only the caller knows where the entity
/// lives, so those return the payload as received.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn list_boards(&self) -> Result<Vec<Board>, RemoteError>;
    async fn get_board(&self, board_id: &BoardId) -> Result<Board, RemoteError>;
    async fn create_board(&self, draft: &BoardDraft) -> Result<Board, RemoteError>;
    async fn update_board(&self, board_id: &BoardId, draft: &BoardDraft)
        -> Result<Board, RemoteError>;
    async fn delete_board(&self, board_id: &BoardId) -> Result<(), RemoteError>;
    async fn create_column(
        &self,
        board_id: &BoardId,
        draft: &ColumnDraft,
    ) -> Result<Column, RemoteError>;
    async fn update_column(
        &self,
        column_id: &ColumnId,
        draft: &ColumnDraft,
    ) -> Result<ColumnPayload, RemoteError>;
    async fn delete_column(&self, column_id: &ColumnId) -> Result<(), RemoteError>;
    async fn list_tasks(&self, column_id: &ColumnId) -> Result<Vec<Task>, RemoteError>;
    async fn create_task(&self, column_id: &ColumnId, draft: &TaskDraft)
        -> Result<Task, RemoteError>;
    async fn update_task(
        &self,
        task_id: &TaskId,
        patch: &TaskPatch,
    ) -> Result<TaskPayload, RemoteError>;
    async fn delete_task(&self, task_id: &TaskId) -> Result<(), RemoteError>;
    async fn move_task(
        &self,
        task_id: &TaskId,
        request: &MoveTaskRequest,
    ) -> Result<Task, RemoteError>;
    async fn reorder_tasks(
        &self,
        column_id: &ColumnId,
        task_ids: &[TaskId],
    ) -> Result<(), RemoteError>;
}

impl From<MissingReference> for RemoteError {
    fn from(value: MissingReference) -> Self {
        Self::Decode(value.to_string())
    }
}

pub struct HttpRemote {
    http: Client,
    base_url: String,
    session: Arc<Session>,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>, session: Arc<Session>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
        }
    }

    pub fn from_settings(
        settings: &ClientSettings,
        session: Arc<Session>,
    ) -> Result<Self, RemoteError> {
        let http = Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| RemoteError::Network(format!("failed to build http client: {e}")))?;
        Ok(Self {
            http,
            base_url: settings.api_url.trim_end_matches('/').to_string(),
            session,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .http
            .request(method, format!("{}{path}", self.base_url));
        match self.session.token().await {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn execute(&self, builder: RequestBuilder) -> Result<Response, RemoteError> {
        let response = builder
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        let status = response.status();
        debug!(status = status.as_u16(), url = %response.url(), "remote settled");
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiError>(&body)
            .map(|err| err.message)
            .unwrap_or_else(|_| format!("Request failed with status {}", status.as_u16()));
        Err(map_status(status, message))
    }

    async fn json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, RemoteError> {
        self.execute(builder)
            .await?
            .json::<T>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }

    async fn ack(&self, builder: RequestBuilder) -> Result<(), RemoteError> {
        self.execute(builder).await.map(|_| ())
    }
}

pub(crate) fn map_status(status: StatusCode, message: String) -> RemoteError {
    match status {
        StatusCode::UNAUTHORIZED => RemoteError::SessionExpired,
        StatusCode::NOT_FOUND => RemoteError::NotFound(message),
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
            RemoteError::Validation(message)
        }
        other => RemoteError::Unexpected {
            status: other.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl RemoteClient for HttpRemote {
    async fn list_boards(&self) -> Result<Vec<Board>, RemoteError> {
        let envelope: BoardsEnvelope = self.json(self.request(Method::GET, "/boards").await).await?;
        Ok(envelope
            .boards
            .into_iter()
            .map(BoardPayload::into_board)
            .collect())
    }

    async fn get_board(&self, board_id: &BoardId) -> Result<Board, RemoteError> {
        let envelope: BoardEnvelope = self
            .json(self.request(Method::GET, &format!("/boards/{board_id}")).await)
            .await?;
        Ok(envelope.board.into_board())
    }

    async fn create_board(&self, draft: &BoardDraft) -> Result<Board, RemoteError> {
        let payload: BoardPayload = self
            .json(self.request(Method::POST, "/boards").await.json(draft))
            .await?;
        Ok(payload.into_board())
    }

    async fn update_board(
        &self,
        board_id: &BoardId,
        draft: &BoardDraft,
    ) -> Result<Board, RemoteError> {
        let envelope: BoardEnvelope = self
            .json(
                self.request(Method::PUT, &format!("/boards/{board_id}"))
                    .await
                    .json(draft),
            )
            .await?;
        Ok(envelope.board.into_board())
    }

    async fn delete_board(&self, board_id: &BoardId) -> Result<(), RemoteError> {
        self.ack(self.request(Method::DELETE, &format!("/boards/{board_id}")).await)
            .await
    }

    async fn create_column(
        &self,
        board_id: &BoardId,
        draft: &ColumnDraft,
    ) -> Result<Column, RemoteError> {
        let envelope: ColumnEnvelope = self
            .json(
                self.request(Method::POST, &format!("/columns/boards/{board_id}/columns"))
                    .await
                    .json(draft),
            )
            .await?;
        Ok(envelope.column.into_column_or(board_id))
    }

    async fn update_column(
        &self,
        column_id: &ColumnId,
        draft: &ColumnDraft,
    ) -> Result<ColumnPayload, RemoteError> {
        let envelope: ColumnEnvelope = self
            .json(
                self.request(Method::PUT, &format!("/columns/{column_id}"))
                    .await
                    .json(draft),
            )
            .await?;
        Ok(envelope.column)
    }

    async fn delete_column(&self, column_id: &ColumnId) -> Result<(), RemoteError> {
        self.ack(
            self.request(Method::DELETE, &format!("/columns/{column_id}"))
                .await,
        )
        .await
    }

    async fn list_tasks(&self, column_id: &ColumnId) -> Result<Vec<Task>, RemoteError> {
        let envelope: TasksEnvelope = self
            .json(
                self.request(Method::GET, &format!("/tasks/columns/{column_id}/tasks"))
                    .await,
            )
            .await?;
        Ok(envelope
            .tasks
            .into_iter()
            .map(|task| task.into_task_or(column_id))
            .collect())
    }

    async fn create_task(
        &self,
        column_id: &ColumnId,
        draft: &TaskDraft,
    ) -> Result<Task, RemoteError> {
        let payload: TaskPayload = self
            .json(
                self.request(Method::POST, &format!("/tasks/columns/{column_id}/tasks"))
                    .await
                    .json(draft),
            )
            .await?;
        Ok(payload.into_task_or(column_id))
    }

    async fn update_task(
        &self,
        task_id: &TaskId,
        patch: &TaskPatch,
    ) -> Result<TaskPayload, RemoteError> {
        let envelope: TaskEnvelope = self
            .json(
                self.request(Method::PUT, &format!("/tasks/tasks/{task_id}"))
                    .await
                    .json(patch),
            )
            .await?;
        Ok(envelope.task)
    }

    async fn delete_task(&self, task_id: &TaskId) -> Result<(), RemoteError> {
        self.ack(
            self.request(Method::DELETE, &format!("/tasks/tasks/{task_id}"))
                .await,
        )
        .await
    }

    async fn move_task(
        &self,
        task_id: &TaskId,
        request: &MoveTaskRequest,
    ) -> Result<Task, RemoteError> {
        let envelope: TaskEnvelope = self
            .json(
                self.request(Method::PUT, &format!("/tasks/tasks/{task_id}/move"))
                    .await
                    .json(request),
            )
            .await?;
        Ok(envelope.task.into_task_or(&request.new_column_id))
    }

    async fn reorder_tasks(
        &self,
        column_id: &ColumnId,
        task_ids: &[TaskId],
    ) -> Result<(), RemoteError> {
        let body = ReorderTasksRequest {
            task_ids: task_ids.to_vec(),
        };
        self.ack(
            self.request(
                Method::PUT,
                &format!("/tasks/columns/{column_id}/tasks/reorder"),
            )
            .await
            .json(&body),
        )
        .await
    }
}

#[cfg(test)]
#[path = "tests/remote_tests.rs"]
mod tests;
