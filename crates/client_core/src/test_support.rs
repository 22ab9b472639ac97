//! In-memory remote authority for dispatcher and drag tests.
//!
//! Responses are computed when a call arrives; a held call then waits for
//! [`FakeRemote::release`] before handing its response back, which lets a
//! test choose the order in which concurrent commands settle.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use shared::{
    domain::{Board, BoardId, Column, ColumnId, Comment, Task, TaskId},
    protocol::{
        BoardDraft, ColumnDraft, ColumnPayload, MoveTaskRequest, TaskDraft, TaskPatch,
        TaskPayload,
    },
};
use tokio::sync::Semaphore;

use crate::{error::RemoteError, remote::RemoteClient};

#[derive(Default)]
struct Authority {
    boards: Vec<Board>,
    tasks: Vec<Task>,
    next_id: u64,
}

impl Authority {
    fn fresh_id(&mut self, prefix: &str) -> String {
        loop {
            self.next_id += 1;
            let candidate = format!("{prefix}{}", self.next_id);
            let taken = self.boards.iter().any(|b| {
                b.id.as_str() == candidate || b.columns.iter().any(|c| c.id.as_str() == candidate)
            }) || self.tasks.iter().any(|t| t.id.as_str() == candidate);
            if !taken {
                return candidate;
            }
        }
    }

    fn column_mut(&mut self, column_id: &ColumnId) -> Option<&mut Column> {
        self.boards
            .iter_mut()
            .flat_map(|board| board.columns.iter_mut())
            .find(|column| &column.id == column_id)
    }

    fn has_column(&self, column_id: &ColumnId) -> bool {
        self.boards.iter().any(|board| board.has_column(column_id))
    }
}

fn not_found(what: &str, id: &impl std::fmt::Display) -> RemoteError {
    RemoteError::NotFound(format!("{what} {id} not found"))
}

#[derive(Default)]
pub(crate) struct FakeRemote {
    authority: Mutex<Authority>,
    holds: Mutex<HashMap<String, Arc<Semaphore>>>,
    failures: Mutex<HashMap<String, VecDeque<RemoteError>>>,
    calls: Mutex<Vec<String>>,
    bare_updates: AtomicBool,
}

impl FakeRemote {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn seed_board(&self, board: Board) {
        self.authority.lock().expect("authority").boards.push(board);
    }

    pub(crate) fn seed_task(&self, task: Task) {
        self.authority.lock().expect("authority").tasks.push(task);
    }

    /// Removes a task behind the client's back, as another user would.
    pub(crate) fn remove_task(&self, task_id: &TaskId) {
        self.authority
            .lock()
            .expect("authority")
            .tasks
            .retain(|task| &task.id != task_id);
    }

    pub(crate) fn task_ids_in(&self, column_id: &ColumnId) -> Vec<TaskId> {
        self.authority
            .lock()
            .expect("authority")
            .tasks
            .iter()
            .filter(|task| &task.column_id == column_id)
            .map(|task| task.id.clone())
            .collect()
    }

    /// Update responses leave out the board/column reference from now on.
    pub(crate) fn omit_update_references(&self) {
        self.bare_updates.store(true, Ordering::SeqCst);
    }

    /// Queues a failure for the next call whose key starts with `prefix`.
    pub(crate) fn fail_next(&self, prefix: &str, error: RemoteError) {
        self.failures
            .lock()
            .expect("failures")
            .entry(prefix.to_string())
            .or_default()
            .push_back(error);
    }

    /// Holds calls with this exact key until released.
    pub(crate) fn hold(&self, key: &str) {
        self.holds
            .lock()
            .expect("holds")
            .insert(key.to_string(), Arc::new(Semaphore::new(0)));
    }

    pub(crate) fn release(&self, key: &str) {
        if let Some(gate) = self.holds.lock().expect("holds").get(key) {
            gate.add_permits(1);
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls").clone()
    }

    pub(crate) fn call_count(&self, key: &str) -> usize {
        self.calls().iter().filter(|call| call.as_str() == key).count()
    }

    /// Waits until `key` has been called at least `count` times.
    pub(crate) async fn wait_for_calls(&self, key: &str, count: usize) {
        for _ in 0..500 {
            if self.call_count(key) >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("call {key} never arrived; saw {:?}", self.calls());
    }

    async fn respond<T>(
        &self,
        key: String,
        compute: impl FnOnce(&mut Authority) -> Result<T, RemoteError>,
    ) -> Result<T, RemoteError> {
        self.calls.lock().expect("calls").push(key.clone());
        let injected = {
            let mut failures = self.failures.lock().expect("failures");
            failures
                .iter_mut()
                .find(|(prefix, queue)| key.starts_with(prefix.as_str()) && !queue.is_empty())
                .and_then(|(_, queue)| queue.pop_front())
        };
        let outcome = match injected {
            Some(err) => Err(err),
            None => compute(&mut self.authority.lock().expect("authority")),
        };
        let gate = self.holds.lock().expect("holds").get(&key).cloned();
        if let Some(gate) = gate {
            gate.acquire().await.expect("gate").forget();
        }
        outcome
    }
}

#[async_trait]
impl RemoteClient for FakeRemote {
    async fn list_boards(&self) -> Result<Vec<Board>, RemoteError> {
        self.respond("list_boards".into(), |a| Ok(a.boards.clone()))
            .await
    }

    async fn get_board(&self, board_id: &BoardId) -> Result<Board, RemoteError> {
        self.respond(format!("get_board:{board_id}"), |a| {
            a.boards
                .iter()
                .find(|b| &b.id == board_id)
                .cloned()
                .ok_or_else(|| not_found("board", board_id))
        })
        .await
    }

    async fn create_board(&self, draft: &BoardDraft) -> Result<Board, RemoteError> {
        self.respond("create_board".into(), |a| {
            if draft.name.trim().is_empty() {
                return Err(RemoteError::Validation("Board name is required".into()));
            }
            let board = Board {
                id: BoardId::new(a.fresh_id("b")),
                name: draft.name.clone(),
                columns: Vec::new(),
            };
            a.boards.push(board.clone());
            Ok(board)
        })
        .await
    }

    async fn update_board(
        &self,
        board_id: &BoardId,
        draft: &BoardDraft,
    ) -> Result<Board, RemoteError> {
        self.respond(format!("update_board:{board_id}"), |a| {
            let board = a
                .boards
                .iter_mut()
                .find(|b| &b.id == board_id)
                .ok_or_else(|| not_found("board", board_id))?;
            board.name = draft.name.clone();
            Ok(board.clone())
        })
        .await
    }

    async fn delete_board(&self, board_id: &BoardId) -> Result<(), RemoteError> {
        self.respond(format!("delete_board:{board_id}"), |a| {
            let index = a
                .boards
                .iter()
                .position(|b| &b.id == board_id)
                .ok_or_else(|| not_found("board", board_id))?;
            let board = a.boards.remove(index);
            a.tasks.retain(|task| !board.has_column(&task.column_id));
            Ok(())
        })
        .await
    }

    async fn create_column(
        &self,
        board_id: &BoardId,
        draft: &ColumnDraft,
    ) -> Result<Column, RemoteError> {
        self.respond(format!("create_column:{board_id}"), |a| {
            if draft.name.trim().is_empty() {
                return Err(RemoteError::Validation("Column name is required".into()));
            }
            let id = ColumnId::new(a.fresh_id("c"));
            let board = a
                .boards
                .iter_mut()
                .find(|b| &b.id == board_id)
                .ok_or_else(|| not_found("board", board_id))?;
            let column = Column {
                id,
                board_id: board_id.clone(),
                name: draft.name.clone(),
                color: draft.color.clone(),
            };
            board.columns.push(column.clone());
            Ok(column)
        })
        .await
    }

    async fn update_column(
        &self,
        column_id: &ColumnId,
        draft: &ColumnDraft,
    ) -> Result<ColumnPayload, RemoteError> {
        let bare = self.bare_updates.load(Ordering::SeqCst);
        self.respond(format!("update_column:{column_id}"), |a| {
            let column = a
                .column_mut(column_id)
                .ok_or_else(|| not_found("column", column_id))?;
            column.name = draft.name.clone();
            column.color = draft.color.clone();
            let mut payload = ColumnPayload::from(&*column);
            if bare {
                payload.board_id = None;
            }
            Ok(payload)
        })
        .await
    }

    async fn delete_column(&self, column_id: &ColumnId) -> Result<(), RemoteError> {
        self.respond(format!("delete_column:{column_id}"), |a| {
            if !a.has_column(column_id) {
                return Err(not_found("column", column_id));
            }
            for board in &mut a.boards {
                board.columns.retain(|c| &c.id != column_id);
            }
            a.tasks.retain(|task| &task.column_id != column_id);
            Ok(())
        })
        .await
    }

    async fn list_tasks(&self, column_id: &ColumnId) -> Result<Vec<Task>, RemoteError> {
        self.respond(format!("list_tasks:{column_id}"), |a| {
            if !a.has_column(column_id) {
                return Err(not_found("column", column_id));
            }
            Ok(a.tasks
                .iter()
                .filter(|task| &task.column_id == column_id)
                .cloned()
                .collect())
        })
        .await
    }

    async fn create_task(
        &self,
        column_id: &ColumnId,
        draft: &TaskDraft,
    ) -> Result<Task, RemoteError> {
        self.respond(format!("create_task:{column_id}"), |a| {
            if !a.has_column(column_id) {
                return Err(not_found("column", column_id));
            }
            let task = Task {
                id: TaskId::new(a.fresh_id("t")),
                column_id: column_id.clone(),
                title: draft.title.clone(),
                description: draft.description.clone().unwrap_or_default(),
                comments: Vec::new(),
            };
            a.tasks.push(task.clone());
            Ok(task)
        })
        .await
    }

    async fn update_task(
        &self,
        task_id: &TaskId,
        patch: &TaskPatch,
    ) -> Result<TaskPayload, RemoteError> {
        let bare = self.bare_updates.load(Ordering::SeqCst);
        self.respond(format!("update_task:{task_id}"), |a| {
            let task = a
                .tasks
                .iter_mut()
                .find(|t| &t.id == task_id)
                .ok_or_else(|| not_found("task", task_id))?;
            if let Some(title) = &patch.title {
                task.title = title.clone();
            }
            if let Some(description) = &patch.description {
                task.description = description.clone();
            }
            if let Some(comments) = &patch.comments {
                task.comments = comments.iter().cloned().map(Comment::from).collect();
            }
            let mut payload = TaskPayload::from(&*task);
            if bare {
                payload.column_id = None;
            }
            Ok(payload)
        })
        .await
    }

    async fn delete_task(&self, task_id: &TaskId) -> Result<(), RemoteError> {
        self.respond(format!("delete_task:{task_id}"), |a| {
            let before = a.tasks.len();
            a.tasks.retain(|t| &t.id != task_id);
            if a.tasks.len() == before {
                return Err(not_found("task", task_id));
            }
            Ok(())
        })
        .await
    }

    async fn move_task(
        &self,
        task_id: &TaskId,
        request: &MoveTaskRequest,
    ) -> Result<Task, RemoteError> {
        self.respond(format!("move_task:{task_id}"), |a| {
            if !a.has_column(&request.new_column_id) {
                return Err(not_found("column", &request.new_column_id));
            }
            let index = a
                .tasks
                .iter()
                .position(|t| &t.id == task_id)
                .ok_or_else(|| not_found("task", task_id))?;
            let mut task = a.tasks.remove(index);
            task.column_id = request.new_column_id.clone();
            let slots: Vec<usize> = a
                .tasks
                .iter()
                .enumerate()
                .filter(|(_, t)| t.column_id == request.new_column_id)
                .map(|(i, _)| i)
                .collect();
            let at = slots
                .get(request.new_order)
                .copied()
                .or_else(|| slots.last().map(|last| last + 1))
                .unwrap_or(a.tasks.len());
            a.tasks.insert(at, task.clone());
            Ok(task)
        })
        .await
    }

    async fn reorder_tasks(
        &self,
        column_id: &ColumnId,
        task_ids: &[TaskId],
    ) -> Result<(), RemoteError> {
        self.respond(format!("reorder_tasks:{column_id}"), |a| {
            if !a.has_column(column_id) {
                return Err(not_found("column", column_id));
            }
            let (mut listed, others): (Vec<Task>, Vec<Task>) = a
                .tasks
                .drain(..)
                .partition(|t| &t.column_id == column_id);
            let mut ordered = Vec::with_capacity(listed.len());
            for id in task_ids {
                if let Some(i) = listed.iter().position(|t| &t.id == id) {
                    ordered.push(listed.remove(i));
                }
            }
            ordered.extend(listed);
            a.tasks = others;
            a.tasks.extend(ordered);
            Ok(())
        })
        .await
    }
}

pub(crate) fn board(id: &str, name: &str, columns: &[&str]) -> Board {
    Board {
        id: BoardId::from(id),
        name: name.to_string(),
        columns: columns
            .iter()
            .map(|column_id| column(column_id, id, &column_id.to_uppercase()))
            .collect(),
    }
}

pub(crate) fn column(id: &str, board_id: &str, name: &str) -> Column {
    Column {
        id: ColumnId::from(id),
        board_id: BoardId::from(board_id),
        name: name.to_string(),
        color: "#4B5EAA".to_string(),
    }
}

pub(crate) fn task(id: &str, column_id: &str, title: &str) -> Task {
    Task {
        id: TaskId::from(id),
        column_id: ColumnId::from(column_id),
        title: title.to_string(),
        description: String::new(),
        comments: Vec::new(),
    }
}
