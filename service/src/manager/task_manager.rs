use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;

use millstone::{CalculationParams, ScriptRuntime};
use util::output_error;
use uuid::Uuid;

use common::{Task, TaskInfo, TaskStatus};
use config::ScriptRegistry;
use errors::*;
use manager::ExecutionLog;
use observers::TaskObserver;
use scheduling::{ScheduleSpec, ScheduledTaskRunner};

#[derive(Default)]
struct State {
    tasks: HashMap<String, Arc<Task>>,
    schedules: HashMap<String, ScheduledTaskRunner>,
}

/// The `TaskManager` is the registry of tasks.
///
/// Registration, deletion and scheduling share one lock. Runs never hold it, so tasks execute
/// concurrently with each other and with registry calls.
pub struct TaskManager {
    registry: Arc<ScriptRegistry>,
    runtime: Arc<ScriptRuntime>,
    exec_log: Arc<ExecutionLog>,

    state: Mutex<State>,
}

impl TaskManager {
    pub fn new(registry: Arc<ScriptRegistry>, runtime: Arc<ScriptRuntime>) -> Self {
        TaskManager::with_exec_log(registry, runtime, Arc::new(ExecutionLog::default()))
    }

    pub fn with_exec_log(
        registry: Arc<ScriptRegistry>,
        runtime: Arc<ScriptRuntime>,
        exec_log: Arc<ExecutionLog>,
    ) -> Self {
        TaskManager {
            registry,
            runtime,
            exec_log,

            state: Mutex::new(State::default()),
        }
    }

    /// Registers a task for a script of the registry and returns the new task id.
    ///
    /// `args` are passed to the script verbatim; without them the script's default arguments are
    /// used. Nothing is created when the script is not in the registry.
    pub fn register_task(&self, script_id: &str, args: Option<Vec<String>>) -> Result<String> {
        self.create_task(script_id, args, None)
    }

    /// Registers a task like `register_task` and subscribes `observer` before the task can run.
    pub fn register_task_with_observer(
        &self,
        script_id: &str,
        args: Option<Vec<String>>,
        observer: Arc<TaskObserver>,
    ) -> Result<String> {
        self.create_task(script_id, args, Some(observer))
    }

    fn create_task(
        &self,
        script_id: &str,
        args: Option<Vec<String>>,
        observer: Option<Arc<TaskObserver>>,
    ) -> Result<String> {
        let config = match self.registry.script_config(script_id) {
            Some(config) => config.clone(),
            None => return Err(ErrorKind::ScriptNotAllowed(script_id.to_owned()).into()),
        };

        let script = config.load_script()?;
        let mut module_roots = Vec::new();
        if let Some(dir) = Path::new(script.qualified_name()).parent() {
            module_roots.push(dir.to_path_buf());
        }
        if let Some(library_path) = config.library_path {
            module_roots.push(library_path);
        }
        let args = args.unwrap_or(config.default_args);
        let params = CalculationParams::new(script, module_roots, args);

        let mut state = self.state.lock().unwrap();
        let mut task_id = Uuid::new_v4().to_string();
        while state.tasks.contains_key(&task_id) {
            task_id = Uuid::new_v4().to_string();
        }

        let task = Task::new(task_id.clone(), params, Arc::clone(&self.runtime));
        task.subscribe(Arc::clone(&self.exec_log) as Arc<TaskObserver>);
        if let Some(observer) = observer {
            task.subscribe(observer);
        }
        state.tasks.insert(task_id.clone(), Arc::new(task));

        info!("Registered task {} for script {}", task_id, script_id);
        Ok(task_id)
    }

    /// Starts a run of the task on a new thread and returns immediately.
    pub fn start_task(&self, task_id: &str) -> Result<()> {
        let task = self.get_task(task_id)?;
        if task.is_running() {
            return Err(ErrorKind::TaskBusy(task_id.to_owned()).into());
        }

        thread::Builder::new()
            .name(format!("task-{}", task_id))
            .spawn(move || {
                if let Err(err) = task.run() {
                    output_error(&err.chain_err(|| format!("Unable to run task {}", task.id())));
                }
            })
            .chain_err(|| format!("Unable to start thread for task {}", task_id))?;
        Ok(())
    }

    /// Runs the task on the calling thread and returns its terminal status.
    pub fn start_task_sync(&self, task_id: &str) -> Result<TaskStatus> {
        let task = self.get_task(task_id)?;
        task.run()
    }

    /// Cancels the schedule of the task, if any, and removes it. A run in progress is not
    /// interrupted.
    pub fn delete_task(&self, task_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.tasks.contains_key(task_id) {
            return Err(ErrorKind::ResourceNotFound(task_id.to_owned()).into());
        }

        if let Some(mut runner) = state.schedules.remove(task_id) {
            runner.cancel();
        }
        state.tasks.remove(task_id);
        info!("Deleted task {}", task_id);
        Ok(())
    }

    /// Runs the task every `interval` seconds, starting at the next `hour:minute` local time.
    pub fn schedule_task(&self, task_id: &str, hour: u32, minute: u32, interval: u64) -> Result<()> {
        let spec = ScheduleSpec::new(hour, minute, interval)?;

        let mut state = self.state.lock().unwrap();
        let task = match state.tasks.get(task_id) {
            Some(task) => Arc::clone(task),
            None => return Err(ErrorKind::ResourceNotFound(task_id.to_owned()).into()),
        };
        if state.schedules.contains_key(task_id) {
            return Err(ErrorKind::SchedulingConflict(task_id.to_owned()).into());
        }

        let runner = ScheduledTaskRunner::start(task, spec)?;
        state.schedules.insert(task_id.to_owned(), runner);
        Ok(())
    }

    pub fn get_task(&self, task_id: &str) -> Result<Arc<Task>> {
        let state = self.state.lock().unwrap();
        state
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| ErrorKind::ResourceNotFound(task_id.to_owned()).into())
    }

    /// All tasks, oldest first.
    pub fn get_tasks(&self) -> Vec<Arc<Task>> {
        let state = self.state.lock().unwrap();
        let mut tasks: Vec<Arc<Task>> = state.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.created().cmp(&b.created()).then_with(|| a.id().cmp(b.id())));
        tasks
    }

    pub fn is_scheduled(&self, task_id: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.schedules.contains_key(task_id)
    }

    pub fn get_scheduling_info(&self, task_id: &str) -> Option<ScheduleSpec> {
        let state = self.state.lock().unwrap();
        state.schedules.get(task_id).map(|runner| runner.spec())
    }

    pub fn task_info(&self, task_id: &str) -> Result<TaskInfo> {
        let task = self.get_task(task_id)?;
        Ok(task.info(self.get_scheduling_info(task_id)))
    }

    pub fn task_infos(&self) -> Vec<TaskInfo> {
        self.get_tasks()
            .iter()
            .map(|task| task.info(self.get_scheduling_info(task.id())))
            .collect()
    }

    pub fn script_ids(&self) -> Vec<String> {
        self.registry.script_ids()
    }

    pub fn exec_log(&self) -> &ExecutionLog {
        &self.exec_log
    }
}
