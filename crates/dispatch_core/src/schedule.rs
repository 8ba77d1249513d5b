//! Per-vehicle task queue and the task state machine.
//!
//! A [`Schedule`] is exclusively owned by one vehicle. The execution side
//! advances the cursor and flips statuses forward; the optimizer only ever
//! touches tasks strictly after the cursor, which is what makes concurrent
//! execution and insertion safe.

use bevy_ecs::prelude::Component;
use thiserror::Error;

use crate::network::LinkId;
use crate::registry::RequestId;

/// End time of an open-ended stay task.
pub const TIME_UNDEFINED: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Planned,
    Started,
    Performed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Drive { to: LinkId },
    Stay { until_ms: Option<u64> },
    Pickup { request: RequestId },
    Dropoff { request: RequestId },
}

impl TaskKind {
    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::Drive { .. } => "drive",
            TaskKind::Stay { .. } => "stay",
            TaskKind::Pickup { .. } => "pickup",
            TaskKind::Dropoff { .. } => "dropoff",
        }
    }

    /// The request this task serves, for serve tasks.
    pub fn serves(&self) -> Option<RequestId> {
        match self {
            TaskKind::Pickup { request } | TaskKind::Dropoff { request } => Some(*request),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Task {
    pub begin_ms: u64,
    /// Planned end while the task is pending; actual end once performed.
    pub end_ms: u64,
    pub status: TaskStatus,
    pub kind: TaskKind,
}

impl Task {
    pub fn planned(begin_ms: u64, end_ms: u64, kind: TaskKind) -> Self {
        Self {
            begin_ms,
            end_ms,
            status: TaskStatus::Planned,
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("task at {index} would overlap its predecessor")]
    TaskOverlap { index: usize },
    #[error("task at {index}: cannot move from {from:?} to {to:?}")]
    IllegalTaskTransition {
        index: usize,
        from: TaskStatus,
        to: TaskStatus,
    },
    #[error("no current task")]
    NoCurrentTask,
    #[error("tail ends at an open stay; truncate it before appending")]
    OpenEndedTail,
}

/// Ordered task queue with a cursor marking the current task.
#[derive(Debug, Clone, Default, Component)]
pub struct Schedule {
    tasks: Vec<Task>,
    cursor: usize,
}

impl Schedule {
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn current(&self) -> Option<&Task> {
        self.tasks.get(self.cursor)
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.tasks.len()
    }

    /// Whether the vehicle has no pending work: nothing queued past an
    /// open stay (or nothing at all). Idle vehicles are dispatch candidates.
    pub fn is_idle(&self) -> bool {
        if self.is_exhausted() {
            return true;
        }
        self.cursor == self.tasks.len() - 1
            && matches!(self.tasks[self.cursor].kind, TaskKind::Stay { .. })
    }

    /// Appends a planned task at the tail. The tail must be closed
    /// (no open-ended stay) and the new task must not overlap it.
    pub fn push(&mut self, task: Task) -> Result<(), ScheduleError> {
        if let Some(last) = self.tasks.last() {
            if last.end_ms == TIME_UNDEFINED {
                return Err(ScheduleError::OpenEndedTail);
            }
            if task.begin_ms < last.end_ms {
                return Err(ScheduleError::TaskOverlap {
                    index: self.tasks.len(),
                });
            }
        }
        self.tasks.push(task);
        Ok(())
    }

    /// Makes room for tail insertion at `now`: drops queued stays and
    /// truncates a started stay, then returns the time new work can begin.
    /// The optimizer treats stay tasks as freely replaceable.
    pub fn prepare_tail(&mut self, now_ms: u64) -> u64 {
        while self.tasks.len() > self.cursor + 1 {
            let last = &self.tasks[self.tasks.len() - 1];
            if last.status == TaskStatus::Planned && matches!(last.kind, TaskKind::Stay { .. }) {
                self.tasks.pop();
            } else {
                break;
            }
        }
        match self.tasks.last_mut() {
            None => now_ms,
            Some(last) => match (last.status, last.kind) {
                (TaskStatus::Started, TaskKind::Stay { .. }) => {
                    last.end_ms = now_ms;
                    now_ms
                }
                (TaskStatus::Planned, TaskKind::Stay { .. }) => {
                    // Only reachable when the stay is the current task.
                    self.tasks.pop();
                    now_ms
                }
                _ => last.end_ms.max(now_ms),
            },
        }
    }

    /// Starts the current task at `now`. Planned → Started only.
    pub fn start_current(&mut self, now_ms: u64) -> Result<&Task, ScheduleError> {
        let index = self.cursor;
        let task = self.tasks.get_mut(index).ok_or(ScheduleError::NoCurrentTask)?;
        if task.status != TaskStatus::Planned {
            return Err(ScheduleError::IllegalTaskTransition {
                index,
                from: task.status,
                to: TaskStatus::Started,
            });
        }
        task.status = TaskStatus::Started;
        task.begin_ms = now_ms;
        if task.end_ms != TIME_UNDEFINED && task.end_ms < now_ms {
            task.end_ms = now_ms;
        }
        Ok(&self.tasks[index])
    }

    /// Completes the current task at `now` and advances the cursor.
    /// Later planned tasks are shifted so begin/end times stay contiguous
    /// when execution ran longer than estimated.
    pub fn complete_current(&mut self, now_ms: u64) -> Result<Task, ScheduleError> {
        let index = self.cursor;
        let task = self.tasks.get_mut(index).ok_or(ScheduleError::NoCurrentTask)?;
        if task.status != TaskStatus::Started {
            return Err(ScheduleError::IllegalTaskTransition {
                index,
                from: task.status,
                to: TaskStatus::Performed,
            });
        }
        task.status = TaskStatus::Performed;
        task.end_ms = now_ms;
        let performed = *task;
        self.cursor += 1;

        let mut t = now_ms;
        for task in &mut self.tasks[self.cursor..] {
            if task.begin_ms < t {
                let duration = if task.end_ms == TIME_UNDEFINED {
                    None
                } else {
                    Some(task.end_ms - task.begin_ms)
                };
                task.begin_ms = t;
                if let Some(duration) = duration {
                    task.end_ms = t + duration;
                }
            }
            if task.end_ms == TIME_UNDEFINED {
                break;
            }
            t = task.end_ms;
        }
        Ok(performed)
    }

    /// Retracts the still-planned tasks serving `request` (and the planned
    /// drive legs leading into them) from strictly after the cursor.
    /// Started tasks are left to finish naturally. Returns whether anything
    /// was removed.
    pub fn retract_request(&mut self, request: RequestId) -> bool {
        let mut remove = vec![false; self.tasks.len()];
        for (i, task) in self.tasks.iter().enumerate().skip(self.cursor) {
            if task.status != TaskStatus::Planned {
                continue;
            }
            if task.kind.serves() == Some(request) {
                remove[i] = true;
                if i > self.cursor {
                    let prev = &self.tasks[i - 1];
                    if prev.status == TaskStatus::Planned
                        && matches!(prev.kind, TaskKind::Drive { .. })
                    {
                        remove[i - 1] = true;
                    }
                }
            }
        }
        if !remove.iter().any(|r| *r) {
            return false;
        }
        let mut i = 0;
        self.tasks.retain(|_| {
            let keep = !remove[i];
            i += 1;
            keep
        });
        true
    }

    /// Passengers still on board once every queued task has run.
    pub fn occupancy_at_tail(&self) -> usize {
        let mut on_board: usize = 0;
        for task in &self.tasks {
            match task.kind {
                TaskKind::Pickup { .. } => on_board += 1,
                TaskKind::Dropoff { .. } => on_board = on_board.saturating_sub(1),
                _ => {}
            }
        }
        on_board
    }

    /// Where the vehicle will stand after running every queued task.
    pub fn tail_link(&self, current: LinkId) -> LinkId {
        self.tasks
            .iter()
            .rev()
            .find_map(|task| match task.kind {
                TaskKind::Drive { to } => Some(to),
                _ => None,
            })
            .unwrap_or(current)
    }

    /// Invariant check used by tests: forward-only statuses around the
    /// cursor, contiguous times, at most one started task.
    pub fn validate(&self) -> Result<(), ScheduleError> {
        let mut started = 0;
        for (i, task) in self.tasks.iter().enumerate() {
            match task.status {
                TaskStatus::Performed if i >= self.cursor => {
                    return Err(ScheduleError::IllegalTaskTransition {
                        index: i,
                        from: TaskStatus::Performed,
                        to: TaskStatus::Performed,
                    });
                }
                TaskStatus::Started => {
                    started += 1;
                    if i != self.cursor || started > 1 {
                        return Err(ScheduleError::IllegalTaskTransition {
                            index: i,
                            from: TaskStatus::Started,
                            to: TaskStatus::Started,
                        });
                    }
                }
                _ => {}
            }
            if i + 1 < self.tasks.len() {
                let next = &self.tasks[i + 1];
                if task.end_ms != TIME_UNDEFINED && task.end_ms > next.begin_ms {
                    return Err(ScheduleError::TaskOverlap { index: i + 1 });
                }
            }
        }
        Ok(())
    }
}
