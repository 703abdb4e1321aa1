use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use chrono::prelude::*;
use millstone::{CalculationEngine, CalculationParams, ScriptRuntime};
use serde_json::Value;
use util::output_error;

use common::{TaskError, TaskEvent, TaskStatus};
use errors::*;
use observers::TaskObserver;
use scheduling::ScheduleSpec;

/// `TaskInfo` is the serialisable snapshot of a task exposed to service callers.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub id: String,
    pub name: String,
    pub status: TaskStatus,
    pub created: DateTime<Utc>,
    pub executions: usize,
    pub running: bool,
    pub schedule: Option<ScheduleSpec>,
}

struct TaskState {
    events: Vec<TaskEvent>,
    result: Option<Value>,
    running: bool,
    executions: usize,
}

/// A `Task` wraps the repeated execution of one calculation.
///
/// Every execution starts a fresh event log beginning with `PENDING`. Within an execution the
/// statuses only move forward and nothing is appended once `FINISHED` or `ERROR` is reached.
pub struct Task {
    id: String,
    name: String,
    created: DateTime<Utc>,
    params: Arc<CalculationParams>,
    runtime: Arc<ScriptRuntime>,

    state: Mutex<TaskState>,
    observers: Mutex<Vec<Arc<TaskObserver>>>,
}

impl Task {
    pub fn new(id: String, params: CalculationParams, runtime: Arc<ScriptRuntime>) -> Self {
        Task {
            id,
            name: params.user_script.short_name().to_owned(),
            created: Utc::now(),
            params: Arc::new(params),
            runtime,

            state: Mutex::new(TaskState {
                events: vec![TaskEvent::new(TaskStatus::Pending)],
                result: None,
                running: false,
                executions: 0,
            }),
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The short name of the user script.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn params(&self) -> &CalculationParams {
        &self.params
    }

    /// Registers an observer told about every event appended from now on.
    pub fn subscribe(&self, observer: Arc<TaskObserver>) {
        let mut observers = self.observers.lock().unwrap();
        observers.push(observer);
    }

    pub fn status(&self) -> TaskStatus {
        let state = self.state.lock().unwrap();
        state
            .events
            .last()
            .map(|event| event.status)
            .unwrap_or(TaskStatus::Pending)
    }

    /// The events of the current (or last) execution.
    pub fn events(&self) -> Vec<TaskEvent> {
        let state = self.state.lock().unwrap();
        state.events.clone()
    }

    /// The first event carrying errors in the current execution.
    pub fn first_error(&self) -> Option<TaskEvent> {
        let state = self.state.lock().unwrap();
        state.events.iter().find(|event| event.has_errors()).cloned()
    }

    pub fn is_running(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.running
    }

    /// The number of executions started so far.
    pub fn executions(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.executions
    }

    /// Returns the output of the last execution.
    ///
    /// `Some` after `FINISHED`, `None` after `ERROR`. Fails with `ResourceNotAvailable` while the
    /// task has not reached a terminal status.
    pub fn get_result(&self) -> Result<Option<Value>> {
        let state = self.state.lock().unwrap();
        let status = state
            .events
            .last()
            .map(|event| event.status)
            .unwrap_or(TaskStatus::Pending);

        match status {
            TaskStatus::Finished => Ok(state.result.clone()),
            TaskStatus::Error => Ok(None),
            _ => Err(ErrorKind::ResourceNotAvailable(format!(
                "task <{}> is {}",
                self.id,
                status
            )).into()),
        }
    }

    pub fn info(&self, schedule: Option<ScheduleSpec>) -> TaskInfo {
        let state = self.state.lock().unwrap();
        TaskInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            status: state
                .events
                .last()
                .map(|event| event.status)
                .unwrap_or(TaskStatus::Pending),
            created: self.created,
            executions: state.executions,
            running: state.running,
            schedule,
        }
    }

    /// Runs the calculation on the calling thread and returns the terminal status.
    ///
    /// Fails with `TaskBusy` if the task is already running. A failed calculation is not an error
    /// of `run`: it ends the execution with an `ERROR` event.
    pub fn run(&self) -> Result<TaskStatus> {
        let restarted = {
            let mut state = self.state.lock().unwrap();
            if state.running {
                return Err(ErrorKind::TaskBusy(self.id.clone()).into());
            }
            state.running = true;
            state.executions += 1;
            state.result = None;

            let terminal = state
                .events
                .last()
                .map(|event| event.status.is_terminal())
                .unwrap_or(true);
            if terminal {
                let pending = TaskEvent::new(TaskStatus::Pending);
                state.events = vec![pending.clone()];
                Some(pending)
            } else {
                None
            }
        };

        info!("Running task {} ({})", self.id, self.name);
        let engine = CalculationEngine::new(Arc::clone(&self.params), Arc::clone(&self.runtime));
        // Observers run inside the guard too: the task must not stay running if one panics.
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            if let Some(pending) = restarted {
                self.notify(&pending);
            }
            engine.run(&mut |phase| {
                self.append(TaskEvent::new(TaskStatus::from(phase)), None);
            })
        })).unwrap_or_else(|_| Err("calculation panicked".into()));

        let status = match outcome {
            Ok(output) => {
                self.append(TaskEvent::new(TaskStatus::Finished), Some(output));
                TaskStatus::Finished
            }
            Err(err) => {
                output_error(&err);
                let errors = TaskError::from_calculation_error(&err);
                self.append(TaskEvent::with_errors(TaskStatus::Error, errors), None);
                TaskStatus::Error
            }
        };
        Ok(status)
    }

    fn append(&self, event: TaskEvent, result: Option<Value>) {
        {
            let mut state = self.state.lock().unwrap();
            if event.status.is_terminal() {
                state.result = result;
                state.running = false;
            }
            state.events.push(event.clone());
        }

        match event.first_error() {
            Some(error) => info!("Task {} is {}: {}", self.id, event.status, error),
            None => info!("Task {} is {}", self.id, event.status),
        }
        self.notify(&event);
    }

    fn notify(&self, event: &TaskEvent) {
        let observers = {
            let observers = self.observers.lock().unwrap();
            observers.clone()
        };
        for observer in observers {
            observer.on_event(self, event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use millstone::errors::Result as CalculationResult;
    use millstone::{CallableRuntime, HookSetBuilder, SourceScript};

    use super::*;

    fn task_with(fail_map: bool) -> Task {
        let hooks = HookSetBuilder::new()
            .prepare(|_args: &[Value]| -> CalculationResult<Value> {
                Ok(json!({"numChunks": 2}))
            })
            .map(move |args: &[Value]| -> CalculationResult<Value> {
                if fail_map && args[0] == json!(0) {
                    return Err("no input".into());
                }
                Ok(json!([["n", 1]]))
            })
            .reduce(|args: &[Value]| -> CalculationResult<Value> {
                Ok(json!([[args[0].clone(), args[1].clone()]]))
            })
            .finish(|_args: &[Value]| -> CalculationResult<Value> { Ok(json!("ok")) })
            .build()
            .unwrap();
        let params = CalculationParams::new(
            SourceScript::new("/scripts/count.js", "count.js", ""),
            Vec::new(),
            Vec::new(),
        );
        Task::new(
            "task-1".to_owned(),
            params,
            Arc::new(CallableRuntime::new(hooks)),
        )
    }

    #[test]
    fn new_task_is_pending_without_result() {
        let task = task_with(false);

        assert_eq!(TaskStatus::Pending, task.status());
        assert_eq!("count.js", task.name());
        match *task.get_result().unwrap_err().kind() {
            ErrorKind::ResourceNotAvailable(_) => {}
            ref other => panic!("expected ResourceNotAvailable, got {:?}", other),
        }
    }

    #[test]
    fn successful_run_records_every_phase() {
        let task = task_with(false);

        assert_eq!(TaskStatus::Finished, task.run().unwrap());

        let statuses: Vec<TaskStatus> = task.events().iter().map(|e| e.status).collect();
        assert_eq!(
            vec![
                TaskStatus::Pending,
                TaskStatus::Preparing,
                TaskStatus::RunningMap,
                TaskStatus::RunningReduce,
                TaskStatus::RunningFinish,
                TaskStatus::Finished,
            ],
            statuses
        );
        assert_eq!(Some(json!("ok")), task.get_result().unwrap());
        assert!(!task.is_running());
    }

    #[test]
    fn failed_run_ends_in_error() {
        let task = task_with(true);

        assert_eq!(TaskStatus::Error, task.run().unwrap());

        assert_eq!(None, task.get_result().unwrap());
        let error = task.first_error().unwrap();
        assert_eq!(TaskStatus::Error, error.status);
        assert_eq!(1, error.errors.len());
        assert_eq!(Some(0), error.errors[0].worker);
        assert!(error.errors[0].message.contains("no input"));
    }

    #[test]
    fn rerun_starts_a_fresh_log() {
        let task = task_with(false);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        task.subscribe(Arc::new(move |_task: &Task, event: &TaskEvent| {
            if event.status == TaskStatus::Pending {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        task.run().unwrap();
        task.run().unwrap();

        assert_eq!(2, task.executions());
        assert_eq!(6, task.events().len());
        assert_eq!(TaskStatus::Pending, task.events()[0].status);
        assert_eq!(1, seen.load(Ordering::SeqCst));
    }

    #[test]
    fn panicking_observer_does_not_leave_the_task_running() {
        let task = task_with(false);
        task.subscribe(Arc::new(|_task: &Task, event: &TaskEvent| {
            if event.status == TaskStatus::Pending {
                panic!("observer failed");
            }
        }));

        assert_eq!(TaskStatus::Finished, task.run().unwrap());
        assert_eq!(TaskStatus::Error, task.run().unwrap());

        assert!(!task.is_running());
        assert_eq!(TaskStatus::Error, task.status());
        assert_eq!(TaskStatus::Error, task.run().unwrap());
        assert_eq!(3, task.executions());
    }
}
