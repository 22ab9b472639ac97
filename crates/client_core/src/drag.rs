//! Drag-and-drop of a task between columns.
//!
//! [`DragMachine`] is the gesture state machine:
//! `Idle -> Dragging -> Hovering -> (Committing | aborted) -> Idle`.
//! Hovering is purely local; only a release over a different column than
//! the one the task was grabbed from produces a move. A grab while a move is
//! committing is refused, so at most one move is in flight per controller.
//!
//! [`DragController`] drives the machine against a [`KanbanClient`]: the
//! move itself is authoritative, the follow-up refetch of both columns is
//! best effort and never undoes the move.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join;
use shared::domain::{ColumnId, Task, TaskId};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{error::CommandError, KanbanClient};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragSnapshot {
    pub task: Task,
    pub origin: ColumnId,
}

/// A column drop zone and the insertion index under the pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropTarget {
    pub column_id: ColumnId,
    pub index: usize,
}

impl DropTarget {
    pub fn new(column_id: impl Into<ColumnId>, index: usize) -> Self {
        Self {
            column_id: column_id.into(),
            index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveRequest {
    pub task_id: TaskId,
    pub origin: ColumnId,
    pub target: ColumnId,
    pub new_order: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DragState {
    #[default]
    Idle,
    Dragging(DragSnapshot),
    Hovering {
        snapshot: DragSnapshot,
        target: DropTarget,
    },
    Committing {
        snapshot: DragSnapshot,
        request: MoveRequest,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    NotDragging,
    OutsideDropZone,
    SameColumn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Release {
    Commit(MoveRequest),
    Aborted(AbortReason),
}

#[derive(Debug, Error)]
pub enum DragError {
    #[error("a move from the previous drag is still committing")]
    MoveInFlight,
    #[error("task {0} is not on the board")]
    UnknownTask(TaskId),
    #[error("move failed: {0}")]
    Move(#[source] CommandError),
}

#[derive(Debug, Default)]
pub struct DragMachine {
    state: DragState,
}

impl DragMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &DragState {
        &self.state
    }

    pub fn is_committing(&self) -> bool {
        matches!(self.state, DragState::Committing { .. })
    }

    /// Starts a gesture. An unfinished gesture that never released is replaced.
    pub fn grab(&mut self, task: Task) -> Result<(), DragError> {
        if self.is_committing() {
            return Err(DragError::MoveInFlight);
        }
        let origin = task.column_id.clone();
        self.state = DragState::Dragging(DragSnapshot { task, origin });
        Ok(())
    }

    /// Tracks the drop zone under the pointer; `None` once it leaves every zone.
    pub fn hover(&mut self, target: Option<DropTarget>) {
        let snapshot = match &self.state {
            DragState::Dragging(snapshot) | DragState::Hovering { snapshot, .. } => {
                snapshot.clone()
            }
            DragState::Idle | DragState::Committing { .. } => return,
        };
        self.state = match target {
            Some(target) => DragState::Hovering { snapshot, target },
            None => DragState::Dragging(snapshot),
        };
    }

    pub fn release(&mut self) -> Release {
        match std::mem::take(&mut self.state) {
            DragState::Hovering { snapshot, target } if target.column_id != snapshot.origin => {
                let request = MoveRequest {
                    task_id: snapshot.task.id.clone(),
                    origin: snapshot.origin.clone(),
                    target: target.column_id,
                    new_order: target.index,
                };
                self.state = DragState::Committing {
                    snapshot,
                    request: request.clone(),
                };
                Release::Commit(request)
            }
            DragState::Hovering { .. } => Release::Aborted(AbortReason::SameColumn),
            DragState::Dragging(_) => Release::Aborted(AbortReason::OutsideDropZone),
            DragState::Idle => Release::Aborted(AbortReason::NotDragging),
            committing @ DragState::Committing { .. } => {
                self.state = committing;
                Release::Aborted(AbortReason::NotDragging)
            }
        }
    }

    /// Drag ended without a drop. A committing move is left to settle.
    pub fn cancel(&mut self) -> bool {
        match self.state {
            DragState::Dragging(_) | DragState::Hovering { .. } => {
                self.state = DragState::Idle;
                true
            }
            DragState::Idle | DragState::Committing { .. } => false,
        }
    }

    pub fn settle(&mut self) -> Option<MoveRequest> {
        match std::mem::take(&mut self.state) {
            DragState::Committing { request, .. } => Some(request),
            other => {
                self.state = other;
                None
            }
        }
    }
}

#[derive(Debug)]
pub struct MoveReport {
    pub task: Task,
    /// Refetch outcome for the origin and destination columns.
    pub resync: Vec<(ColumnId, Result<(), CommandError>)>,
}

#[derive(Debug)]
pub enum DropOutcome {
    Aborted(AbortReason),
    Moved(MoveReport),
}

/// Leaves `Committing` however the move ends, including when the release
/// future is dropped mid-flight.
struct SettleOnDrop<'a>(&'a DragController);

impl Drop for SettleOnDrop<'_> {
    fn drop(&mut self) {
        if let Some(request) = self.0.machine().settle() {
            debug!(task_id = %request.task_id, "drag settled");
        }
    }
}

pub struct DragController {
    client: Arc<KanbanClient>,
    machine: Mutex<DragMachine>,
}

impl DragController {
    pub fn new(client: Arc<KanbanClient>) -> Self {
        Self {
            client,
            machine: Mutex::new(DragMachine::new()),
        }
    }

    fn machine(&self) -> MutexGuard<'_, DragMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> DragState {
        self.machine().state().clone()
    }

    pub async fn grab(&self, task_id: &TaskId) -> Result<(), DragError> {
        let task = self
            .client
            .read(|store| store.task(task_id).cloned())
            .await
            .ok_or_else(|| DragError::UnknownTask(task_id.clone()))?;
        debug!(task_id = %task_id, origin = %task.column_id, "drag started");
        self.machine().grab(task)
    }

    /// Clamps the pointer index to the destination column as currently loaded.
    pub async fn hover(&self, target: Option<DropTarget>) {
        let target = match target {
            Some(mut target) => {
                let len = self
                    .client
                    .read(|store| store.tasks(&target.column_id).len())
                    .await;
                target.index = target.index.min(len);
                Some(target)
            }
            None => None,
        };
        self.machine().hover(target);
    }

    pub fn end(&self) -> bool {
        self.machine().cancel()
    }

    pub async fn release(&self) -> Result<DropOutcome, DragError> {
        let release = self.machine().release();
        let request = match release {
            Release::Commit(request) => request,
            Release::Aborted(reason) => {
                debug!(?reason, "drop aborted");
                return Ok(DropOutcome::Aborted(reason));
            }
        };

        let settle = SettleOnDrop(self);
        let moved = self
            .client
            .move_task(&request.task_id, &request.target, request.new_order)
            .await;
        drop(settle);
        let task = moved.map_err(DragError::Move)?;
        info!(
            task_id = %request.task_id,
            origin = %request.origin,
            target = %request.target,
            "task moved"
        );

        let (origin, target) = join(
            self.client.fetch_tasks_by_column(&request.origin),
            self.client.fetch_tasks_by_column(&request.target),
        )
        .await;
        let resync = vec![
            (request.origin.clone(), origin.map(|_| ())),
            (request.target.clone(), target.map(|_| ())),
        ];
        for (column_id, result) in &resync {
            if let Err(err) = result {
                warn!(column_id = %column_id, error = %err, "column resync after move failed");
            }
        }
        Ok(DropOutcome::Moved(MoveReport { task, resync }))
    }
}

#[cfg(test)]
#[path = "tests/drag_tests.rs"]
mod tests;
