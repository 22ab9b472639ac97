//! In-memory entity store: the board list, the expanded current board and
//! the per-column task sequences.
//!
//! The store is plain data. It changes only through [`EntityStore::apply`],
//! driven by the [`Reconciler`](crate::reconciler::Reconciler) once a command
//! has settled successfully, plus the per-kind failure bookkeeping.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use shared::domain::{Board, BoardId, Column, ColumnId, EntityKind, Task, TaskId};

use crate::error::CommandError;

/// A server-confirmed outcome, ready to be folded into the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    BoardsFetched(Vec<Board>),
    BoardFetched(Board),
    BoardCreated(Board),
    BoardUpdated(Board),
    BoardDeleted {
        board_id: BoardId,
        /// Columns the store knew for the board just before removal.
        column_ids: Vec<ColumnId>,
    },
    ColumnCreated(Column),
    ColumnUpdated(Column),
    ColumnDeleted(ColumnId),
    TasksFetched {
        column_id: ColumnId,
        tasks: Vec<Task>,
    },
    TaskCreated(Task),
    TaskUpdated(Task),
    TaskDeleted(TaskId),
    TaskMoved {
        task: Task,
        order: usize,
    },
    TasksReordered {
        column_id: ColumnId,
        task_ids: Vec<TaskId>,
    },
}

impl Settlement {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::BoardsFetched(_)
            | Self::BoardFetched(_)
            | Self::BoardCreated(_)
            | Self::BoardUpdated(_)
            | Self::BoardDeleted { .. } => EntityKind::Board,
            Self::ColumnCreated(_) | Self::ColumnUpdated(_) | Self::ColumnDeleted(_) => {
                EntityKind::Column
            }
            Self::TasksFetched { .. }
            | Self::TaskCreated(_)
            | Self::TaskUpdated(_)
            | Self::TaskDeleted(_)
            | Self::TaskMoved { .. }
            | Self::TasksReordered { .. } => EntityKind::Task,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SliceState {
    pub error: Option<CommandError>,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct EntityStore {
    pub(crate) boards: Vec<Board>,
    pub(crate) current_board: Option<Board>,
    pub(crate) tasks_by_column: HashMap<ColumnId, Vec<Task>>,
    pub(crate) deleted_columns: HashSet<ColumnId>,
    boards_state: SliceState,
    columns_state: SliceState,
    tasks_state: SliceState,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn boards(&self) -> &[Board] {
        &self.boards
    }

    pub fn board(&self, board_id: &BoardId) -> Option<&Board> {
        self.boards.iter().find(|board| &board.id == board_id)
    }

    pub fn current_board(&self) -> Option<&Board> {
        self.current_board.as_ref()
    }

    /// Tasks filed under `column_id`, empty when the column was never fetched.
    pub fn tasks(&self, column_id: &ColumnId) -> &[Task] {
        self.tasks_by_column
            .get(column_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has_tasks_for(&self, column_id: &ColumnId) -> bool {
        self.tasks_by_column.contains_key(column_id)
    }

    pub fn task_columns(&self) -> impl Iterator<Item = &ColumnId> {
        self.tasks_by_column.keys()
    }

    pub fn task(&self, task_id: &TaskId) -> Option<&Task> {
        self.tasks_by_column
            .values()
            .flat_map(|tasks| tasks.iter())
            .find(|task| &task.id == task_id)
    }

    /// Looks a column up in the current board first, then the board list.
    pub fn column(&self, column_id: &ColumnId) -> Option<&Column> {
        self.current_board
            .iter()
            .chain(self.boards.iter())
            .flat_map(|board| board.columns.iter())
            .find(|column| &column.id == column_id)
    }

    /// Columns of `board_id` across every cached view.
    pub fn column_ids_of(&self, board_id: &BoardId) -> Vec<ColumnId> {
        let mut ids: Vec<ColumnId> = Vec::new();
        for board in self
            .current_board
            .iter()
            .chain(self.boards.iter())
            .filter(|board| &board.id == board_id)
        {
            for column_id in board.column_ids() {
                if !ids.contains(column_id) {
                    ids.push(column_id.clone());
                }
            }
        }
        ids
    }

    pub fn is_deleted_column(&self, column_id: &ColumnId) -> bool {
        self.deleted_columns.contains(column_id)
    }

    pub fn slice(&self, kind: EntityKind) -> &SliceState {
        match kind {
            EntityKind::Board => &self.boards_state,
            EntityKind::Column => &self.columns_state,
            EntityKind::Task => &self.tasks_state,
        }
    }

    fn slice_mut(&mut self, kind: EntityKind) -> &mut SliceState {
        match kind {
            EntityKind::Board => &mut self.boards_state,
            EntityKind::Column => &mut self.columns_state,
            EntityKind::Task => &mut self.tasks_state,
        }
    }

    pub fn error(&self, kind: EntityKind) -> Option<&CommandError> {
        self.slice(kind).error.as_ref()
    }

    pub fn clear_error(&mut self, kind: EntityKind) {
        self.slice_mut(kind).error = None;
    }

    pub(crate) fn record_failure(&mut self, kind: EntityKind, error: CommandError) {
        self.slice_mut(kind).error = Some(error);
    }

    pub(crate) fn record_success(&mut self, kind: EntityKind) {
        let slice = self.slice_mut(kind);
        slice.error = None;
        slice.last_updated = Some(Utc::now());
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// A board response may have left before a column of it was deleted here.
    fn without_deleted(&self, board: &Board) -> Board {
        let mut board = board.clone();
        board
            .columns
            .retain(|column| !self.deleted_columns.contains(&column.id));
        board
    }

    /// Forgets deleted columns. Only sound once no command that was sent
    /// before the deletions is still waiting on the authority.
    pub(crate) fn prune_tombstones(&mut self) {
        self.deleted_columns.clear();
    }

    /// Folds the settlement into the collection it belongs to. Effects on the
    /// other collections are reconciler rules.
    pub(crate) fn apply(&mut self, settlement: &Settlement) {
        match settlement {
            Settlement::BoardsFetched(boards) => {
                self.boards = boards.iter().map(|board| self.without_deleted(board)).collect();
            }
            Settlement::BoardFetched(board) => {
                self.current_board = Some(self.without_deleted(board));
            }
            Settlement::BoardCreated(board) => {
                let board = self.without_deleted(board);
                self.boards.retain(|existing| existing.id != board.id);
                self.boards.insert(0, board);
            }
            Settlement::BoardUpdated(board) => {
                let board = self.without_deleted(board);
                if let Some(existing) = self.boards.iter_mut().find(|b| b.id == board.id) {
                    *existing = board.clone();
                }
                if let Some(current) = self.current_board.as_mut().filter(|b| b.id == board.id) {
                    *current = board;
                }
            }
            Settlement::BoardDeleted { board_id, .. } => {
                self.boards.retain(|board| &board.id != board_id);
            }
            Settlement::ColumnCreated(_)
            | Settlement::ColumnUpdated(_)
            | Settlement::ColumnDeleted(_) => {}
            Settlement::TasksFetched { column_id, tasks } => {
                if self.deleted_columns.contains(column_id) {
                    return;
                }
                self.tasks_by_column.insert(column_id.clone(), tasks.clone());
            }
            Settlement::TaskCreated(task) => {
                if self.deleted_columns.contains(&task.column_id) {
                    return;
                }
                let tasks = self
                    .tasks_by_column
                    .entry(task.column_id.clone())
                    .or_default();
                tasks.retain(|existing| existing.id != task.id);
                tasks.push(task.clone());
            }
            Settlement::TaskUpdated(task) => {
                for tasks in self.tasks_by_column.values_mut() {
                    if let Some(existing) = tasks.iter_mut().find(|t| t.id == task.id) {
                        *existing = task.clone();
                    }
                }
            }
            Settlement::TaskDeleted(task_id) => {
                for tasks in self.tasks_by_column.values_mut() {
                    tasks.retain(|task| &task.id != task_id);
                }
            }
            Settlement::TaskMoved { .. } => {}
            Settlement::TasksReordered { column_id, task_ids } => {
                if let Some(tasks) = self.tasks_by_column.get_mut(column_id) {
                    reorder_by_ids(tasks, task_ids);
                }
            }
        }
    }

    /// Checks the cross-collection invariants; returns the first violation.
    pub fn verify(&self) -> Result<(), String> {
        let mut seen: HashSet<&TaskId> = HashSet::new();
        for (column_id, tasks) in &self.tasks_by_column {
            if self.deleted_columns.contains(column_id) {
                return Err(format!("deleted column {column_id} still has a task list"));
            }
            for task in tasks {
                if &task.column_id != column_id {
                    return Err(format!(
                        "task {} filed under {column_id} but points at {}",
                        task.id, task.column_id
                    ));
                }
                if !seen.insert(&task.id) {
                    return Err(format!("task {} is filed more than once", task.id));
                }
            }
        }
        for board in self.current_board.iter().chain(self.boards.iter()) {
            for column in &board.columns {
                if column.board_id != board.id {
                    return Err(format!(
                        "column {} embedded in board {} points at {}",
                        column.id, board.id, column.board_id
                    ));
                }
                if self.deleted_columns.contains(&column.id) {
                    return Err(format!(
                        "deleted column {} still embedded in board {}",
                        column.id, board.id
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Orders `tasks` to follow `task_ids`; unlisted tasks keep their relative
/// order after the listed ones, unknown ids are ignored.
fn reorder_by_ids(tasks: &mut Vec<Task>, task_ids: &[TaskId]) {
    let mut remaining = std::mem::take(tasks);
    for task_id in task_ids {
        if let Some(index) = remaining.iter().position(|task| &task.id == task_id) {
            tasks.push(remaining.remove(index));
        }
    }
    tasks.extend(remaining);
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
