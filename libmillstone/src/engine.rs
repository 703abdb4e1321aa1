use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::Future;
use futures_cpupool::{self, CpuFuture};
use serde_json::Value;

use errors::*;
use final_results::FinalResults;
use modules::ModuleResolver;
use results::{Key, ResultStore};
use script::{Phase, ScriptContext, ScriptHost, ScriptRuntime};
use source::SourceScript;

/// The parallelism chosen by the prepare hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub num_chunks: usize,
    pub num_reduce_workers: usize,
}

fn plan_field<'a>(plan: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|name| plan.get(*name))
        .find(|value| !value.is_null())
}

/// Plan sizes may arrive as floats from scripting languages without an integer type.
fn plan_integer(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::max_value() as f64)
            .map(|f| f as i64)
    })
}

fn plan_error(message: String) -> Error {
    ErrorKind::ScriptError(Phase::Prepare.to_string(), message).into()
}

impl Plan {
    /// Reads the plan returned by the prepare hook.
    ///
    /// `numChunks` is required and must be at least 1. A missing or non-positive
    /// `numReduceWorkers` falls back to the number of chunks.
    pub fn from_value(value: &Value) -> Result<Plan> {
        if !value.is_object() {
            return Err(plan_error(format!("the plan must be an object, got {}", value)));
        }

        let num_chunks = match plan_field(value, &["numChunks", "num_chunks"]) {
            Some(chunks) => plan_integer(chunks)
                .ok_or_else(|| plan_error(format!("numChunks must be an integer, got {}", chunks)))?,
            None => return Err(plan_error("the plan has no numChunks".to_owned())),
        };
        if num_chunks < 1 {
            return Err(plan_error(format!("numChunks must be at least 1, got {}", num_chunks)));
        }

        let num_reduce_workers = match plan_field(value, &["numReduceWorkers", "num_reduce_workers"]) {
            Some(workers) => plan_integer(workers).ok_or_else(|| {
                plan_error(format!("numReduceWorkers must be an integer, got {}", workers))
            })?,
            None => 0,
        };

        let num_chunks = num_chunks as usize;
        Ok(Plan {
            num_chunks,
            num_reduce_workers: if num_reduce_workers <= 0 {
                num_chunks
            } else {
                num_reduce_workers as usize
            },
        })
    }
}

/// `CalculationParams` is everything a calculation run is built from. It is never changed once
/// the run has started.
#[derive(Clone, Debug)]
pub struct CalculationParams {
    pub user_script: SourceScript,
    pub module_roots: Vec<PathBuf>,
    pub input_args: Vec<String>,
}

impl CalculationParams {
    pub fn new(user_script: SourceScript, module_roots: Vec<PathBuf>, input_args: Vec<String>) -> Self {
        CalculationParams {
            user_script,
            module_roots,
            input_args,
        }
    }
}

/// Splits `keys` into `num_groups` contiguous groups whose sizes differ by at most one.
///
/// Earlier groups receive the extra keys. Some groups are empty when there are fewer keys than
/// groups.
pub fn partition_keys<T>(keys: Vec<T>, num_groups: usize) -> Vec<Vec<T>> {
    let num_groups = num_groups.max(1);
    let base = keys.len() / num_groups;
    let extra = keys.len() % num_groups;

    let mut groups = Vec::with_capacity(num_groups);
    let mut keys = keys.into_iter();
    for group_index in 0..num_groups {
        let size = if group_index < extra { base + 1 } else { base };
        groups.push(keys.by_ref().take(size).collect());
    }
    groups
}

fn panic_message(cause: Box<Any + Send>) -> String {
    if let Some(message) = cause.downcast_ref::<&str>() {
        return (*message).to_owned();
    }
    if let Some(message) = cause.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic".to_owned()
}

/// Runs a worker body, turning a panic into an error of that worker.
fn guarded<T, F>(phase: Phase, body: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let result = match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(result) => result,
        Err(cause) => Err(format!("worker panicked: {}", panic_message(cause)).into()),
    };
    result.map_err(|err| script_failure(phase, err))
}

fn create_pool(phase: Phase, size: usize) -> futures_cpupool::CpuPool {
    futures_cpupool::Builder::new()
        .pool_size(size)
        .name_prefix(format!("{}-worker-", phase.to_string().to_lowercase()))
        .create()
}

/// Joins the workers of a phase in index order and merges their stores.
///
/// Once a worker has failed, the output of the remaining workers is dropped. If any worker
/// failed, the phase fails with every collected failure.
fn join_workers(phase: Phase, workers: Vec<CpuFuture<ResultStore, Error>>) -> Result<ResultStore> {
    let mut merged = ResultStore::new();
    let mut failures = Vec::new();

    for (worker_id, worker) in workers.into_iter().enumerate() {
        match worker.wait() {
            Ok(store) => {
                if failures.is_empty() {
                    merged.merge(store);
                }
            }
            Err(err) => {
                error!("{} worker {} failed: {}", phase, worker_id, err);
                failures.push(WorkerFailure::new(worker_id, err));
            }
        }
    }

    if !failures.is_empty() {
        return Err(ErrorKind::AggregateError(phase.to_string(), failures).into());
    }
    Ok(merged)
}

fn map_worker(runtime: &ScriptRuntime, context: ScriptContext) -> Result<ResultStore> {
    let mut host = runtime.open(context)?;
    host.init_map()?;

    let mut store = ResultStore::new();
    host.run_map(&mut store)?;
    Ok(store)
}

fn reduce_worker(
    runtime: &ScriptRuntime,
    context: ScriptContext,
    mut partition: ResultStore,
) -> Result<ResultStore> {
    let mut host = runtime.open(context)?;
    host.init_reduce()?;

    let mut store = ResultStore::new();
    for key in partition.keys() {
        let values = partition.remove(&key);
        host.run_reduce(&key, values, &mut store)?;
    }
    Ok(store)
}

/// `CalculationEngine` drives one user script through the PREPARE, MAP, REDUCE and FINISH phases.
///
/// PREPARE and FINISH run on the calling thread. MAP and REDUCE each get a fresh worker pool sized
/// by the plan which is torn down when the phase is over.
pub struct CalculationEngine {
    params: Arc<CalculationParams>,
    runtime: Arc<ScriptRuntime>,
}

impl CalculationEngine {
    pub fn new(params: Arc<CalculationParams>, runtime: Arc<ScriptRuntime>) -> Self {
        CalculationEngine { params, runtime }
    }

    pub fn params(&self) -> &CalculationParams {
        &self.params
    }

    /// Runs the calculation and returns the output of the finish hook.
    ///
    /// `listener` is told about every phase right before the phase starts. A failed phase stops
    /// the run.
    pub fn run(&self, listener: &mut FnMut(Phase)) -> Result<Value> {
        let started = Instant::now();
        let modules = Arc::new(ModuleResolver::new(
            self.params.module_roots.clone(),
            self.runtime.module_extension(),
        ));

        listener(Phase::Prepare);
        let plan = self.prepare(&modules)?;
        info!(
            "Calculation {} planned {} chunk(s) and {} reduce worker(s)",
            self.params.user_script, plan.num_chunks, plan.num_reduce_workers
        );

        listener(Phase::Map);
        let map_results = self.run_map(&plan, &modules)?;

        listener(Phase::Reduce);
        let reduce_results = self.run_reduce(&plan, &modules, map_results)?;

        listener(Phase::Finish);
        let output = self.finish(&modules, &reduce_results)?;

        let elapsed = started.elapsed();
        info!(
            "Calculation {} finished in {}.{:03}s",
            self.params.user_script,
            elapsed.as_secs(),
            elapsed.subsec_nanos() / 1_000_000
        );
        Ok(output)
    }

    fn context(&self, worker_id: Option<usize>, phase: Phase, modules: &Arc<ModuleResolver>) -> ScriptContext {
        ScriptContext::new(worker_id, phase, Arc::clone(&self.params), Arc::clone(modules))
    }

    fn open_host(&self, phase: Phase, modules: &Arc<ModuleResolver>) -> Result<Box<ScriptHost>> {
        self.runtime
            .open(self.context(None, phase, modules))
            .map_err(|err| script_failure(phase, err))
    }

    fn prepare(&self, modules: &Arc<ModuleResolver>) -> Result<Plan> {
        let mut host = self.open_host(Phase::Prepare, modules)?;
        let raw_plan = host.prepare()
            .map_err(|err| script_failure(Phase::Prepare, err))?;
        Plan::from_value(&raw_plan)
    }

    fn run_map(&self, plan: &Plan, modules: &Arc<ModuleResolver>) -> Result<ResultStore> {
        info!("Starting MAP phase with {} worker(s)", plan.num_chunks);
        let pool = create_pool(Phase::Map, plan.num_chunks);

        let mut workers = Vec::with_capacity(plan.num_chunks);
        for worker_id in 0..plan.num_chunks {
            let runtime = Arc::clone(&self.runtime);
            let context = self.context(Some(worker_id), Phase::Map, modules);
            workers.push(pool.spawn_fn(move || {
                guarded(Phase::Map, || map_worker(&*runtime, context))
            }));
        }

        let map_results = join_workers(Phase::Map, workers)?;
        debug!("MAP phase produced {} key(s)", map_results.num_keys());
        Ok(map_results)
    }

    fn run_reduce(
        &self,
        plan: &Plan,
        modules: &Arc<ModuleResolver>,
        mut map_results: ResultStore,
    ) -> Result<ResultStore> {
        let keys: Vec<Key> = map_results.keys().into_iter().collect();
        info!(
            "Starting REDUCE phase with {} worker(s) for {} key(s)",
            plan.num_reduce_workers,
            keys.len()
        );
        let pool = create_pool(Phase::Reduce, plan.num_reduce_workers);

        let mut workers = Vec::with_capacity(plan.num_reduce_workers);
        for (worker_id, group) in partition_keys(keys, plan.num_reduce_workers)
            .into_iter()
            .enumerate()
        {
            let mut partition = ResultStore::new();
            for key in group {
                let values = map_results.remove(&key);
                partition.add_all(key, values)?;
            }

            let runtime = Arc::clone(&self.runtime);
            let context = self.context(Some(worker_id), Phase::Reduce, modules);
            workers.push(pool.spawn_fn(move || {
                guarded(Phase::Reduce, || reduce_worker(&*runtime, context, partition))
            }));
        }

        join_workers(Phase::Reduce, workers)
    }

    fn finish(&self, modules: &Arc<ModuleResolver>, reduce_results: &ResultStore) -> Result<Value> {
        let mut host = self.open_host(Phase::Finish, modules)?;
        host.init_finish()
            .and_then(|_| host.run_finish(&FinalResults::new(reduce_results)))
            .map_err(|err| script_failure(Phase::Finish, err))
    }
}
