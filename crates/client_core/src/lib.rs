use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use anyhow::Context;
use chrono::Utc;
use futures::future::join_all;
use shared::{
    domain::{Board, BoardId, Column, ColumnId, Comment, CommentId, EntityKind, Task, TaskId},
    protocol::{
        BoardDraft, ColumnDraft, ColumnPayload, CommentPayload, MoveTaskRequest, TaskDraft,
        TaskPatch, TaskPayload,
    },
};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub mod config;
pub mod drag;
pub mod error;
pub mod reconciler;
pub mod remote;
pub mod scope;
pub mod session;
pub mod store;
#[cfg(test)]
pub(crate) mod test_support;

pub use config::{load_settings, normalize_api_url, ClientSettings};
pub use drag::{DragController, DragError, DragMachine, DragState, DropOutcome, DropTarget};
pub use error::{CommandError, ErrorKind, RemoteError};
pub use reconciler::{ReconcileRule, Reconciler};
pub use remote::{HttpRemote, RemoteClient};
pub use scope::ViewScope;
pub use session::Session;
pub use store::{EntityStore, Settlement, SliceState};

/// Change notifications for whatever renders the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    BoardsChanged,
    CurrentBoardChanged,
    ColumnTasksChanged(ColumnId),
    CommandFailed { kind: EntityKind, reason: String },
    SessionExpired,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum MutationKey {
    Board(BoardId),
    Column(ColumnId),
    Task(TaskId),
    ColumnOrder(ColumnId),
}

impl MutationKey {
    fn busy(&self) -> CommandError {
        let (entity, id) = match self {
            Self::Board(id) => (EntityKind::Board, id.to_string()),
            Self::Column(id) => (EntityKind::Column, id.to_string()),
            Self::Task(id) => (EntityKind::Task, id.to_string()),
            Self::ColumnOrder(id) => (EntityKind::Column, format!("{id} (task order)")),
        };
        CommandError::Busy { entity, id }
    }
}

struct MutationClaim<'a> {
    inflight: &'a Mutex<HashSet<MutationKey>>,
    key: MutationKey,
}

impl Drop for MutationClaim<'_> {
    fn drop(&mut self) {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

struct PendingGuard<'a>(&'a AtomicUsize);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn kind_index(kind: EntityKind) -> usize {
    match kind {
        EntityKind::Board => 0,
        EntityKind::Column => 1,
        EntityKind::Task => 2,
    }
}

/// The command dispatcher. Every command makes one remote call and, once it
/// settles, applies one transition to the entity store: the confirmed entity
/// plus the reconciler's cross-collection rules on success, or the per-kind
/// error field on failure.
pub struct KanbanClient {
    remote: Arc<dyn RemoteClient>,
    session: Arc<Session>,
    store: RwLock<EntityStore>,
    reconciler: Reconciler,
    inflight: Mutex<HashSet<MutationKey>>,
    pending: [AtomicUsize; 3],
    events: broadcast::Sender<StoreEvent>,
}

impl KanbanClient {
    pub fn new(remote: Arc<dyn RemoteClient>, session: Arc<Session>) -> Arc<Self> {
        Self::new_with_reconciler(remote, session, Reconciler::standard())
    }

    pub fn new_with_reconciler(
        remote: Arc<dyn RemoteClient>,
        session: Arc<Session>,
        reconciler: Reconciler,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            remote,
            session,
            store: RwLock::new(EntityStore::new()),
            reconciler,
            inflight: Mutex::new(HashSet::new()),
            pending: [AtomicUsize::new(0), AtomicUsize::new(0), AtomicUsize::new(0)],
            events,
        })
    }

    /// HTTP-backed client; picks up a persisted session when one is configured.
    pub fn from_settings(settings: &ClientSettings) -> anyhow::Result<Arc<Self>> {
        let session = match &settings.session_file {
            Some(path) => Session::load(path)
                .with_context(|| format!("failed to read session file '{}'", path.display()))?,
            None => Session::anonymous(),
        };
        let session = Arc::new(session);
        let remote = HttpRemote::from_settings(settings, session.clone())?;
        Ok(Self::new(Arc::new(remote), session))
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> EntityStore {
        self.store.read().await.clone()
    }

    pub async fn read<R>(&self, f: impl FnOnce(&EntityStore) -> R) -> R {
        f(&*self.store.read().await)
    }

    pub fn is_loading(&self, kind: EntityKind) -> bool {
        self.pending[kind_index(kind)].load(Ordering::SeqCst) > 0
    }

    pub async fn clear_error(&self, kind: EntityKind) {
        self.store.write().await.clear_error(kind);
    }

    pub async fn reset(&self) {
        self.store.write().await.reset();
        let _ = self.events.send(StoreEvent::BoardsChanged);
        let _ = self.events.send(StoreEvent::CurrentBoardChanged);
    }

    fn track(&self, kind: EntityKind) -> PendingGuard<'_> {
        let counter = &self.pending[kind_index(kind)];
        counter.fetch_add(1, Ordering::SeqCst);
        PendingGuard(counter)
    }

    /// True while the settling command is the only one in flight, so nothing
    /// sent before a deletion can still settle after it.
    fn is_sole_pending(&self) -> bool {
        self.pending
            .iter()
            .map(|counter| counter.load(Ordering::SeqCst))
            .sum::<usize>()
            <= 1
    }

    fn claim(&self, key: MutationKey) -> Result<MutationClaim<'_>, CommandError> {
        let mut inflight = self
            .inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !inflight.insert(key.clone()) {
            return Err(key.busy());
        }
        Ok(MutationClaim {
            inflight: &self.inflight,
            key,
        })
    }

    async fn finish<T>(
        &self,
        kind: EntityKind,
        op: &'static str,
        outcome: Result<T, RemoteError>,
        settlement: impl FnOnce(&T, &EntityStore) -> Settlement,
    ) -> Result<T, CommandError> {
        let value = match outcome {
            Ok(value) => value,
            Err(err) => return Err(self.fail(kind, op, err.into()).await),
        };

        let events = {
            let mut store = self.store.write().await;
            let settlement = settlement(&value, &store);
            let events = change_events(&settlement, &store);
            self.reconciler.settle(&mut store, &settlement);
            store.record_success(kind);
            if self.is_sole_pending() {
                store.prune_tombstones();
            }
            events
        };
        info!(op, kind = %kind, "command settled");
        for event in events {
            let _ = self.events.send(event);
        }
        Ok(value)
    }

    /// An update response without its board falls back to the cached column.
    async fn resolve_column(&self, payload: ColumnPayload) -> Result<Column, RemoteError> {
        let cached = self
            .read(|store| store.column(&payload.id).map(|column| column.board_id.clone()))
            .await;
        Ok(match cached {
            Some(board_id) => payload.into_column_or(&board_id),
            None => payload.into_column()?,
        })
    }

    async fn resolve_task(&self, payload: TaskPayload) -> Result<Task, RemoteError> {
        let cached = self
            .read(|store| store.task(&payload.id).map(|task| task.column_id.clone()))
            .await;
        Ok(match cached {
            Some(column_id) => payload.into_task_or(&column_id),
            None => payload.into_task()?,
        })
    }

    async fn fail(&self, kind: EntityKind, op: &'static str, err: CommandError) -> CommandError {
        warn!(op, kind = %kind, error = %err, "command failed");
        {
            let mut store = self.store.write().await;
            store.record_failure(kind, err.clone());
            if self.is_sole_pending() {
                store.prune_tombstones();
            }
        }
        if err.is_session_expired() {
            self.session.invalidate().await;
            let _ = self.events.send(StoreEvent::SessionExpired);
        }
        let _ = self.events.send(StoreEvent::CommandFailed {
            kind,
            reason: err.to_string(),
        });
        err
    }

    pub async fn fetch_boards(&self) -> Result<Vec<Board>, CommandError> {
        let _pending = self.track(EntityKind::Board);
        debug!("fetching boards");
        let outcome = self.remote.list_boards().await;
        self.finish(EntityKind::Board, "fetch_boards", outcome, |boards, _| {
            Settlement::BoardsFetched(boards.clone())
        })
        .await
    }

    pub async fn fetch_board_by_id(&self, board_id: &BoardId) -> Result<Board, CommandError> {
        let _pending = self.track(EntityKind::Board);
        debug!(board_id = %board_id, "fetching board");
        let outcome = self.remote.get_board(board_id).await;
        self.finish(EntityKind::Board, "fetch_board_by_id", outcome, |board, _| {
            Settlement::BoardFetched(board.clone())
        })
        .await
    }

    pub async fn create_board(&self, draft: BoardDraft) -> Result<Board, CommandError> {
        let _pending = self.track(EntityKind::Board);
        let outcome = self.remote.create_board(&draft).await;
        self.finish(EntityKind::Board, "create_board", outcome, |board, _| {
            Settlement::BoardCreated(board.clone())
        })
        .await
    }

    pub async fn update_board(
        &self,
        board_id: &BoardId,
        draft: BoardDraft,
    ) -> Result<Board, CommandError> {
        let _claim = self.claim(MutationKey::Board(board_id.clone()))?;
        let _pending = self.track(EntityKind::Board);
        let outcome = self.remote.update_board(board_id, &draft).await;
        self.finish(EntityKind::Board, "update_board", outcome, |board, _| {
            Settlement::BoardUpdated(board.clone())
        })
        .await
    }

    /// Deleting a board the authority no longer knows still removes it locally.
    pub async fn delete_board(&self, board_id: &BoardId) -> Result<(), CommandError> {
        let _claim = self.claim(MutationKey::Board(board_id.clone()))?;
        let _pending = self.track(EntityKind::Board);
        let outcome = absent_is_deleted(self.remote.delete_board(board_id).await, board_id);
        self.finish(EntityKind::Board, "delete_board", outcome, |_, store| {
            Settlement::BoardDeleted {
                board_id: board_id.clone(),
                column_ids: store.column_ids_of(board_id),
            }
        })
        .await
    }

    pub async fn create_column(
        &self,
        board_id: &BoardId,
        draft: ColumnDraft,
    ) -> Result<Column, CommandError> {
        let _pending = self.track(EntityKind::Column);
        let outcome = self.remote.create_column(board_id, &draft).await;
        self.finish(EntityKind::Column, "create_column", outcome, |column, _| {
            Settlement::ColumnCreated(column.clone())
        })
        .await
    }

    pub async fn update_column(
        &self,
        column_id: &ColumnId,
        draft: ColumnDraft,
    ) -> Result<Column, CommandError> {
        let _claim = self.claim(MutationKey::Column(column_id.clone()))?;
        let _pending = self.track(EntityKind::Column);
        let outcome = match self.remote.update_column(column_id, &draft).await {
            Ok(payload) => self.resolve_column(payload).await,
            Err(err) => Err(err),
        };
        self.finish(EntityKind::Column, "update_column", outcome, |column, _| {
            Settlement::ColumnUpdated(column.clone())
        })
        .await
    }

    pub async fn delete_column(&self, column_id: &ColumnId) -> Result<(), CommandError> {
        let _claim = self.claim(MutationKey::Column(column_id.clone()))?;
        let _pending = self.track(EntityKind::Column);
        let outcome = absent_is_deleted(self.remote.delete_column(column_id).await, column_id);
        self.finish(EntityKind::Column, "delete_column", outcome, |_, _| {
            Settlement::ColumnDeleted(column_id.clone())
        })
        .await
    }

    /// Replaces the column's task list with the authority's; fetches for
    /// different columns settle independently of each other.
    pub async fn fetch_tasks_by_column(
        &self,
        column_id: &ColumnId,
    ) -> Result<Vec<Task>, CommandError> {
        let _pending = self.track(EntityKind::Task);
        debug!(column_id = %column_id, "fetching column tasks");
        let outcome = self.remote.list_tasks(column_id).await;
        self.finish(EntityKind::Task, "fetch_tasks_by_column", outcome, |tasks, _| {
            Settlement::TasksFetched {
                column_id: column_id.clone(),
                tasks: tasks.clone(),
            }
        })
        .await
    }

    pub async fn create_task(
        &self,
        column_id: &ColumnId,
        draft: TaskDraft,
    ) -> Result<Task, CommandError> {
        let _pending = self.track(EntityKind::Task);
        let outcome = self.remote.create_task(column_id, &draft).await;
        self.finish(EntityKind::Task, "create_task", outcome, |task, _| {
            Settlement::TaskCreated(task.clone())
        })
        .await
    }

    pub async fn update_task(&self, task_id: &TaskId, patch: TaskPatch) -> Result<Task, CommandError> {
        let _claim = self.claim(MutationKey::Task(task_id.clone()))?;
        let _pending = self.track(EntityKind::Task);
        let outcome = match self.remote.update_task(task_id, &patch).await {
            Ok(payload) => self.resolve_task(payload).await,
            Err(err) => Err(err),
        };
        self.finish(EntityKind::Task, "update_task", outcome, |task, _| {
            Settlement::TaskUpdated(task.clone())
        })
        .await
    }

    pub async fn delete_task(&self, task_id: &TaskId) -> Result<(), CommandError> {
        let _claim = self.claim(MutationKey::Task(task_id.clone()))?;
        let _pending = self.track(EntityKind::Task);
        let outcome = absent_is_deleted(self.remote.delete_task(task_id).await, task_id);
        self.finish(EntityKind::Task, "delete_task", outcome, |_, _| {
            Settlement::TaskDeleted(task_id.clone())
        })
        .await
    }

    /// Reassigns a task to `new_column_id` at `new_order`. The store files the
    /// confirmed task at that position; callers that need the authority's
    /// exact ordering refetch both columns afterwards.
    pub async fn move_task(
        &self,
        task_id: &TaskId,
        new_column_id: &ColumnId,
        new_order: usize,
    ) -> Result<Task, CommandError> {
        let _claim = self.claim(MutationKey::Task(task_id.clone()))?;
        let _pending = self.track(EntityKind::Task);
        let request = MoveTaskRequest {
            new_column_id: new_column_id.clone(),
            new_order,
        };
        debug!(task_id = %task_id, column_id = %new_column_id, new_order, "moving task");
        let outcome = self.remote.move_task(task_id, &request).await;
        self.finish(EntityKind::Task, "move_task", outcome, |task, _| {
            Settlement::TaskMoved {
                task: task.clone(),
                order: new_order,
            }
        })
        .await
    }

    pub async fn reorder_tasks(
        &self,
        column_id: &ColumnId,
        task_ids: Vec<TaskId>,
    ) -> Result<(), CommandError> {
        let _claim = self.claim(MutationKey::ColumnOrder(column_id.clone()))?;
        let _pending = self.track(EntityKind::Task);
        let outcome = self.remote.reorder_tasks(column_id, &task_ids).await;
        self.finish(EntityKind::Task, "reorder_tasks", outcome, |_, _| {
            Settlement::TasksReordered {
                column_id: column_id.clone(),
                task_ids: task_ids.clone(),
            }
        })
        .await
    }

    /// Appends a comment by the signed-in identity and sends the full comment
    /// list as one task update.
    pub async fn add_comment(&self, task_id: &TaskId, text: &str) -> Result<Task, CommandError> {
        let existing = self
            .read(|store| store.task(task_id).map(|task| task.comments.clone()))
            .await
            .ok_or_else(|| CommandError::UnknownTask(task_id.clone()))?;
        let comment = Comment {
            id: CommentId::new(Uuid::new_v4().to_string()),
            author: self.session.author_name().await,
            text: text.to_string(),
            created_at: Utc::now(),
        };
        let comments = existing
            .iter()
            .chain(std::iter::once(&comment))
            .map(CommentPayload::from)
            .collect();
        self.update_task(
            task_id,
            TaskPatch {
                comments: Some(comments),
                ..TaskPatch::default()
            },
        )
        .await
    }

    /// Loads a board and then each of its columns' tasks concurrently. Column
    /// fetch failures are reported per column and do not fail the board.
    pub async fn open_board(
        &self,
        board_id: &BoardId,
    ) -> Result<(Board, Vec<(ColumnId, Result<(), CommandError>)>), CommandError> {
        let board = self.fetch_board_by_id(board_id).await?;
        let fetches = board.columns.iter().map(|column| async move {
            let result = self.fetch_tasks_by_column(&column.id).await.map(|_| ());
            (column.id.clone(), result)
        });
        let columns = join_all(fetches).await;
        Ok((board, columns))
    }
}

fn absent_is_deleted(
    outcome: Result<(), RemoteError>,
    id: &impl std::fmt::Display,
) -> Result<(), RemoteError> {
    match outcome {
        Err(RemoteError::NotFound(message)) => {
            debug!(id = %id, %message, "delete target already absent");
            Ok(())
        }
        other => other,
    }
}

fn change_events(settlement: &Settlement, before: &EntityStore) -> Vec<StoreEvent> {
    match settlement {
        Settlement::BoardsFetched(_) | Settlement::BoardCreated(_) => {
            vec![StoreEvent::BoardsChanged]
        }
        Settlement::BoardFetched(_) => vec![StoreEvent::CurrentBoardChanged],
        Settlement::BoardUpdated(_) => {
            vec![StoreEvent::BoardsChanged, StoreEvent::CurrentBoardChanged]
        }
        Settlement::BoardDeleted { column_ids, .. } => {
            let mut events = vec![StoreEvent::BoardsChanged, StoreEvent::CurrentBoardChanged];
            events.extend(
                column_ids
                    .iter()
                    .filter(|id| before.has_tasks_for(id))
                    .map(|id| StoreEvent::ColumnTasksChanged(id.clone())),
            );
            events
        }
        Settlement::ColumnCreated(_) | Settlement::ColumnUpdated(_) => {
            vec![StoreEvent::BoardsChanged, StoreEvent::CurrentBoardChanged]
        }
        Settlement::ColumnDeleted(column_id) => vec![
            StoreEvent::BoardsChanged,
            StoreEvent::CurrentBoardChanged,
            StoreEvent::ColumnTasksChanged(column_id.clone()),
        ],
        Settlement::TasksFetched { column_id, .. }
        | Settlement::TasksReordered { column_id, .. } => {
            vec![StoreEvent::ColumnTasksChanged(column_id.clone())]
        }
        Settlement::TaskCreated(task) => vec![StoreEvent::ColumnTasksChanged(task.column_id.clone())],
        Settlement::TaskUpdated(task) | Settlement::TaskMoved { task, .. } => {
            let mut events = Vec::new();
            if let Some(previous) = before.task(&task.id) {
                if previous.column_id != task.column_id {
                    events.push(StoreEvent::ColumnTasksChanged(previous.column_id.clone()));
                }
            }
            events.push(StoreEvent::ColumnTasksChanged(task.column_id.clone()));
            events
        }
        Settlement::TaskDeleted(task_id) => before
            .task(task_id)
            .map(|task| vec![StoreEvent::ColumnTasksChanged(task.column_id.clone())])
            .unwrap_or_default(),
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
