use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use emitter::Emit;
use engine::CalculationParams;
use errors::*;
use final_results::FinalResults;
use modules::{Exports, ModuleEvaluator, ModuleResolver};
use results::Key;

/// A stage of the calculation protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Prepare,
    Map,
    Reduce,
    Finish,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match *self {
            Phase::Prepare => "PREPARE",
            Phase::Map => "MAP",
            Phase::Reduce => "REDUCE",
            Phase::Finish => "FINISH",
        };
        write!(f, "{}", name)
    }
}

/// `Callable` is a script function the host can invoke with a list of arguments.
///
/// It hides the concrete scripting engine, so the orchestration code only ever sees values going
/// in and a value (or an error) coming out.
pub trait Callable: Send + Sync {
    fn invoke(&self, args: &[Value]) -> Result<Value>;
}

impl<F> Callable for F
where
    F: Fn(&[Value]) -> Result<Value> + Send + Sync,
{
    fn invoke(&self, args: &[Value]) -> Result<Value> {
        self(args)
    }
}

/// `ScriptContext` is everything a single worker's script context is built from.
///
/// It is constructed once per worker and never changes afterwards. Workers do not share mutable
/// script state; the only shared piece is the module cache of the run.
#[derive(Clone)]
pub struct ScriptContext {
    worker_id: Option<usize>,
    phase: Phase,
    params: Arc<CalculationParams>,
    modules: Arc<ModuleResolver>,
}

impl ScriptContext {
    pub fn new(
        worker_id: Option<usize>,
        phase: Phase,
        params: Arc<CalculationParams>,
        modules: Arc<ModuleResolver>,
    ) -> Self {
        ScriptContext {
            worker_id,
            phase,
            params,
            modules,
        }
    }

    /// The 0-based index of the worker, `None` for the main-thread phases.
    pub fn worker_id(&self) -> Option<usize> {
        self.worker_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn params(&self) -> &CalculationParams {
        &self.params
    }

    pub fn input_args(&self) -> &[String] {
        &self.params.input_args
    }

    pub fn modules(&self) -> &ModuleResolver {
        &self.modules
    }

    /// Loads a sandboxed module, evaluating its top-level code at most once per run.
    pub fn require(&self, evaluator: &ModuleEvaluator, module_id: &str) -> Result<Exports> {
        self.modules.require(evaluator, module_id)
    }
}

/// `ScriptHost` is the contract between the calculation engine and a user script.
///
/// One host is opened per worker (and per main-thread phase) and is only ever used from the
/// thread that opened it.
pub trait ScriptHost {
    /// Returns the raw plan object; the engine validates it.
    fn prepare(&mut self) -> Result<Value>;

    fn init_map(&mut self) -> Result<()>;

    fn run_map(&mut self, emitter: &mut Emit) -> Result<()>;

    fn init_reduce(&mut self) -> Result<()>;

    fn run_reduce(&mut self, key: &Key, values: Vec<Value>, emitter: &mut Emit) -> Result<()>;

    fn init_finish(&mut self) -> Result<()>;

    fn run_finish(&mut self, results: &FinalResults) -> Result<Value>;
}

/// `ScriptRuntime` creates script hosts. It is shared by every worker of every run.
pub trait ScriptRuntime: Send + Sync {
    fn open(&self, context: ScriptContext) -> Result<Box<ScriptHost>>;

    /// File extension of loadable modules.
    fn module_extension(&self) -> &str {
        "js"
    }
}
