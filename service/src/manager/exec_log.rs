use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::prelude::*;

use common::{Task, TaskEvent, TaskStatus};
use observers::TaskObserver;

pub const DEFAULT_CAPACITY: usize = 1000;

/// A compact summary of one task execution.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub task_id: String,
    pub name: String,
    /// 1-based number of the execution of the task.
    pub run: usize,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub error: Option<String>,
}

/// `ExecutionLog` keeps the history of task executions.
///
/// Only the most recent `capacity` executions are kept, and a record never refers back to its
/// task, so deleted tasks do not linger in memory.
pub struct ExecutionLog {
    capacity: usize,
    records: Mutex<VecDeque<ExecutionRecord>>,
}

impl Default for ExecutionLog {
    fn default() -> Self {
        ExecutionLog::new(DEFAULT_CAPACITY)
    }
}

impl ExecutionLog {
    pub fn new(capacity: usize) -> Self {
        ExecutionLog {
            capacity: capacity.max(1),
            records: Mutex::new(VecDeque::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// All records, oldest first.
    pub fn records(&self) -> Vec<ExecutionRecord> {
        let records = self.records.lock().unwrap();
        records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        let records = self.records.lock().unwrap();
        records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The record of the most recent execution of a task.
    pub fn latest(&self, task_id: &str) -> Option<ExecutionRecord> {
        let records = self.records.lock().unwrap();
        records
            .iter()
            .rev()
            .find(|record| record.task_id == task_id)
            .cloned()
    }

    /// Counts the records per status, in status order.
    pub fn summary(&self) -> Vec<(TaskStatus, usize)> {
        let records = self.records.lock().unwrap();
        let mut summary: Vec<(TaskStatus, usize)> = Vec::new();
        for record in records.iter() {
            match summary.iter_mut().find(|entry| entry.0 == record.status) {
                Some(entry) => entry.1 += 1,
                None => summary.push((record.status, 1)),
            }
        }
        summary.sort();
        summary
    }

    fn record(&self, task: &Task, event: &TaskEvent) {
        let run = task.executions();
        let mut records = self.records.lock().unwrap();

        let position = records
            .iter()
            .rposition(|record| record.task_id == task.id() && record.run == run);
        let position = match position {
            Some(position) => position,
            None => {
                records.push_back(ExecutionRecord {
                    task_id: task.id().to_owned(),
                    name: task.name().to_owned(),
                    run,
                    started: None,
                    finished: None,
                    status: event.status,
                    error: None,
                });
                while records.len() > self.capacity {
                    records.pop_front();
                }
                records.len() - 1
            }
        };

        if let Some(record) = records.get_mut(position) {
            record.status = event.status;
            if event.status == TaskStatus::Preparing {
                record.started = Some(event.created);
            }
            if event.status.is_terminal() {
                record.finished = Some(event.created);
                record.error = event.first_error();
            }
        }
    }
}

impl TaskObserver for ExecutionLog {
    fn on_event(&self, task: &Task, event: &TaskEvent) {
        self.record(task, event);
    }
}
