//! Cross-collection rules run after every successful settlement.
//!
//! [`Reconciler::settle`] folds a settlement into its own collection and then
//! runs each rule in registration order. A rule sees the store after the
//! primary change and may touch any collection; adding a cascade means adding
//! a rule, not editing another collection's logic.

use shared::domain::{Board, Column, ColumnId, Task};
use tracing::debug;

use crate::store::{EntityStore, Settlement};

pub trait ReconcileRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, store: &mut EntityStore, settlement: &Settlement);
}

pub struct Reconciler {
    rules: Vec<Box<dyn ReconcileRule>>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::standard()
    }
}

impl Reconciler {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn standard() -> Self {
        Self::empty()
            .with_rule(ColumnMembership)
            .with_rule(ColumnCascade)
            .with_rule(BoardCascade)
            .with_rule(BoardViewScope)
            .with_rule(TaskPlacement)
    }

    pub fn with_rule(mut self, rule: impl ReconcileRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|rule| rule.name()).collect()
    }

    pub fn settle(&self, store: &mut EntityStore, settlement: &Settlement) {
        store.apply(settlement);
        for rule in &self.rules {
            rule.apply(store, settlement);
        }
    }
}

fn boards_mut(store: &mut EntityStore) -> impl Iterator<Item = &mut Board> {
    store
        .current_board
        .iter_mut()
        .chain(store.boards.iter_mut())
}

/// Created columns join their board in every view; updated columns are
/// replaced wherever a view embeds them, whichever board is current.
pub struct ColumnMembership;

impl ReconcileRule for ColumnMembership {
    fn name(&self) -> &'static str {
        "column-membership"
    }

    fn apply(&self, store: &mut EntityStore, settlement: &Settlement) {
        match settlement {
            Settlement::ColumnCreated(column) => {
                for board in boards_mut(store).filter(|board| board.id == column.board_id) {
                    if !board.has_column(&column.id) {
                        board.columns.push(column.clone());
                    }
                }
            }
            Settlement::ColumnUpdated(column) => {
                for board in boards_mut(store) {
                    replace_column(&mut board.columns, column);
                }
            }
            _ => {}
        }
    }
}

fn replace_column(columns: &mut [Column], updated: &Column) {
    if let Some(existing) = columns.iter_mut().find(|c| c.id == updated.id) {
        // The back-reference never changes after creation.
        let board_id = existing.board_id.clone();
        *existing = Column {
            board_id,
            ..updated.clone()
        };
    }
}

/// Removing a column drops it from every board view and purges its tasks.
pub struct ColumnCascade;

impl ReconcileRule for ColumnCascade {
    fn name(&self) -> &'static str {
        "column-cascade"
    }

    fn apply(&self, store: &mut EntityStore, settlement: &Settlement) {
        if let Settlement::ColumnDeleted(column_id) = settlement {
            purge_column(store, column_id);
        }
    }
}

fn purge_column(store: &mut EntityStore, column_id: &ColumnId) {
    for board in boards_mut(store) {
        board.columns.retain(|column| &column.id != column_id);
    }
    if let Some(tasks) = store.tasks_by_column.remove(column_id) {
        debug!(column_id = %column_id, purged = tasks.len(), "purged column tasks");
    }
    store.deleted_columns.insert(column_id.clone());
}

/// Removing a board clears it as the current board and takes its columns'
/// task lists with it.
pub struct BoardCascade;

impl ReconcileRule for BoardCascade {
    fn name(&self) -> &'static str {
        "board-cascade"
    }

    fn apply(&self, store: &mut EntityStore, settlement: &Settlement) {
        if let Settlement::BoardDeleted {
            board_id,
            column_ids,
        } = settlement
        {
            if store
                .current_board
                .as_ref()
                .is_some_and(|board| &board.id == board_id)
            {
                store.current_board = None;
            }
            for column_id in column_ids {
                purge_column(store, column_id);
            }
        }
    }
}

/// Loading a board keeps task lists only for that board's columns.
pub struct BoardViewScope;

impl ReconcileRule for BoardViewScope {
    fn name(&self) -> &'static str {
        "board-view-scope"
    }

    fn apply(&self, store: &mut EntityStore, settlement: &Settlement) {
        if let Settlement::BoardFetched(board) = settlement {
            store
                .tasks_by_column
                .retain(|column_id, _| board.has_column(column_id));
        }
    }
}

/// A task lives under exactly one column key: moves and column-changing
/// updates leave the old sequence and land in the new one.
pub struct TaskPlacement;

impl ReconcileRule for TaskPlacement {
    fn name(&self) -> &'static str {
        "task-placement"
    }

    fn apply(&self, store: &mut EntityStore, settlement: &Settlement) {
        match settlement {
            Settlement::TaskMoved { task, order } => {
                place_task(store, task, Some(*order));
            }
            Settlement::TaskUpdated(task) => {
                let misfiled = store
                    .tasks_by_column
                    .iter()
                    .any(|(column_id, tasks)| {
                        column_id != &task.column_id && tasks.iter().any(|t| t.id == task.id)
                    });
                if misfiled {
                    place_task(store, task, None);
                }
            }
            _ => {}
        }
    }
}

fn place_task(store: &mut EntityStore, task: &Task, order: Option<usize>) {
    for tasks in store.tasks_by_column.values_mut() {
        tasks.retain(|existing| existing.id != task.id);
    }
    if store.deleted_columns.contains(&task.column_id) {
        return;
    }
    let tasks = store
        .tasks_by_column
        .entry(task.column_id.clone())
        .or_default();
    let index = order.unwrap_or(tasks.len()).min(tasks.len());
    tasks.insert(index, task.clone());
}

#[cfg(test)]
#[path = "tests/reconciler_tests.rs"]
mod tests;
