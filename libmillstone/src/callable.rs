use std::sync::Arc;

use serde_json::Value;

use emitter::{emit_pairs, Emit};
use errors::*;
use final_results::FinalResults;
use modules::{Exports, ModuleEvaluator, SourceEvaluator};
use results::Key;
use script::{Callable, Phase, ScriptContext, ScriptHost, ScriptRuntime};

/// `HookScope` is what a scoped hook gets from the host besides its arguments.
pub struct HookScope<'a> {
    context: &'a ScriptContext,
    evaluator: &'a ModuleEvaluator,
}

impl<'a> HookScope<'a> {
    pub fn context(&self) -> &ScriptContext {
        self.context
    }

    pub fn worker_id(&self) -> Option<usize> {
        self.context.worker_id()
    }

    pub fn phase(&self) -> Phase {
        self.context.phase()
    }

    /// Loads a sandboxed module. Its top-level code runs at most once per calculation run.
    pub fn require(&self, module_id: &str) -> Result<Exports> {
        self.context.require(self.evaluator, module_id)
    }
}

trait Hook: Send + Sync {
    fn call(&self, scope: &HookScope, args: &[Value]) -> Result<Value>;
}

struct Plain<C>(C);

impl<C: Callable> Hook for Plain<C> {
    fn call(&self, _scope: &HookScope, args: &[Value]) -> Result<Value> {
        self.0.invoke(args)
    }
}

struct Scoped<F>(F);

impl<F> Hook for Scoped<F>
where
    F: Fn(&HookScope, &[Value]) -> Result<Value> + Send + Sync,
{
    fn call(&self, scope: &HookScope, args: &[Value]) -> Result<Value> {
        (self.0)(scope, args)
    }
}

fn plain<C: Callable + 'static>(hook: C) -> Option<Arc<Hook>> {
    let hook: Arc<Hook> = Arc::new(Plain(hook));
    Some(hook)
}

fn scoped<F>(hook: F) -> Option<Arc<Hook>>
where
    F: Fn(&HookScope, &[Value]) -> Result<Value> + Send + Sync + 'static,
{
    let hook: Arc<Hook> = Arc::new(Scoped(hook));
    Some(hook)
}

/// `HookSet` holds the user's implementations of the phase hooks.
///
/// Use the `HookSetBuilder` to create one.
pub struct HookSet {
    prepare: Arc<Hook>,
    init_map: Option<Arc<Hook>>,
    map: Arc<Hook>,
    init_reduce: Option<Arc<Hook>>,
    reduce: Arc<Hook>,
    init_finish: Option<Arc<Hook>>,
    finish: Arc<Hook>,
}

/// `HookSetBuilder` is used to create a `HookSet`.
///
/// Every hook is given either as a `Callable`, which only sees its arguments, or as a scoped
/// hook (the `*_scoped` methods) which also gets a `HookScope` to require modules with.
#[derive(Default)]
pub struct HookSetBuilder {
    prepare: Option<Arc<Hook>>,
    init_map: Option<Arc<Hook>>,
    map: Option<Arc<Hook>>,
    init_reduce: Option<Arc<Hook>>,
    reduce: Option<Arc<Hook>>,
    init_finish: Option<Arc<Hook>>,
    finish: Option<Arc<Hook>>,
}

impl HookSetBuilder {
    pub fn new() -> HookSetBuilder {
        Default::default()
    }

    pub fn prepare<C: Callable + 'static>(&mut self, hook: C) -> &mut HookSetBuilder {
        self.prepare = plain(hook);
        self
    }

    pub fn prepare_scoped<F>(&mut self, hook: F) -> &mut HookSetBuilder
    where
        F: Fn(&HookScope, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.prepare = scoped(hook);
        self
    }

    pub fn init_map<C: Callable + 'static>(&mut self, hook: C) -> &mut HookSetBuilder {
        self.init_map = plain(hook);
        self
    }

    pub fn init_map_scoped<F>(&mut self, hook: F) -> &mut HookSetBuilder
    where
        F: Fn(&HookScope, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.init_map = scoped(hook);
        self
    }

    pub fn map<C: Callable + 'static>(&mut self, hook: C) -> &mut HookSetBuilder {
        self.map = plain(hook);
        self
    }

    pub fn map_scoped<F>(&mut self, hook: F) -> &mut HookSetBuilder
    where
        F: Fn(&HookScope, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.map = scoped(hook);
        self
    }

    pub fn init_reduce<C: Callable + 'static>(&mut self, hook: C) -> &mut HookSetBuilder {
        self.init_reduce = plain(hook);
        self
    }

    pub fn init_reduce_scoped<F>(&mut self, hook: F) -> &mut HookSetBuilder
    where
        F: Fn(&HookScope, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.init_reduce = scoped(hook);
        self
    }

    pub fn reduce<C: Callable + 'static>(&mut self, hook: C) -> &mut HookSetBuilder {
        self.reduce = plain(hook);
        self
    }

    pub fn reduce_scoped<F>(&mut self, hook: F) -> &mut HookSetBuilder
    where
        F: Fn(&HookScope, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.reduce = scoped(hook);
        self
    }

    pub fn init_finish<C: Callable + 'static>(&mut self, hook: C) -> &mut HookSetBuilder {
        self.init_finish = plain(hook);
        self
    }

    pub fn init_finish_scoped<F>(&mut self, hook: F) -> &mut HookSetBuilder
    where
        F: Fn(&HookScope, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.init_finish = scoped(hook);
        self
    }

    pub fn finish<C: Callable + 'static>(&mut self, hook: C) -> &mut HookSetBuilder {
        self.finish = plain(hook);
        self
    }

    pub fn finish_scoped<F>(&mut self, hook: F) -> &mut HookSetBuilder
    where
        F: Fn(&HookScope, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.finish = scoped(hook);
        self
    }

    pub fn build(&self) -> Result<HookSet> {
        let prepare = self.prepare
            .clone()
            .chain_err(|| "Error building HookSet: No prepare hook provided")?;
        let map = self.map
            .clone()
            .chain_err(|| "Error building HookSet: No map hook provided")?;
        let reduce = self.reduce
            .clone()
            .chain_err(|| "Error building HookSet: No reduce hook provided")?;
        let finish = self.finish
            .clone()
            .chain_err(|| "Error building HookSet: No finish hook provided")?;

        Ok(HookSet {
            prepare,
            init_map: self.init_map.clone(),
            map,
            init_reduce: self.init_reduce.clone(),
            reduce,
            init_finish: self.init_finish.clone(),
            finish,
        })
    }
}

/// `CallableRuntime` runs user code given as a set of hooks.
///
/// Modules required by scoped hooks are evaluated by the runtime's `ModuleEvaluator`, which by
/// default exports the module's `SourceScript`.
pub struct CallableRuntime {
    hooks: Arc<HookSet>,
    evaluator: Arc<ModuleEvaluator>,
    module_extension: String,
}

impl CallableRuntime {
    pub fn new(hooks: HookSet) -> Self {
        CallableRuntime {
            hooks: Arc::new(hooks),
            evaluator: Arc::new(SourceEvaluator),
            module_extension: "js".to_owned(),
        }
    }

    pub fn with_module_extension(mut self, extension: &str) -> Self {
        self.module_extension = extension.to_owned();
        self
    }

    pub fn with_module_evaluator<E: ModuleEvaluator + 'static>(mut self, evaluator: E) -> Self {
        self.evaluator = Arc::new(evaluator);
        self
    }
}

impl ScriptRuntime for CallableRuntime {
    fn open(&self, context: ScriptContext) -> Result<Box<ScriptHost>> {
        Ok(Box::new(CallableHost {
            hooks: Arc::clone(&self.hooks),
            evaluator: Arc::clone(&self.evaluator),
            context,
        }))
    }

    fn module_extension(&self) -> &str {
        &self.module_extension
    }
}

/// `CallableHost` adapts a `HookSet` to the `ScriptHost` contract for one script context.
pub struct CallableHost {
    hooks: Arc<HookSet>,
    evaluator: Arc<ModuleEvaluator>,
    context: ScriptContext,
}

impl CallableHost {
    pub fn context(&self) -> &ScriptContext {
        &self.context
    }

    fn call(&self, hook: &Hook, args: &[Value]) -> Result<Value> {
        let scope = HookScope {
            context: &self.context,
            evaluator: &*self.evaluator,
        };
        hook.call(&scope, args)
    }

    fn call_optional(&self, hook: &Option<Arc<Hook>>, args: &[Value]) -> Result<()> {
        if let Some(ref hook) = *hook {
            self.call(&**hook, args)?;
        }
        Ok(())
    }

    fn worker_id(&self) -> Value {
        match self.context.worker_id() {
            Some(id) => json!(id),
            None => Value::Null,
        }
    }

    fn input_args(&self) -> Value {
        json!(self.context.input_args())
    }
}

impl ScriptHost for CallableHost {
    fn prepare(&mut self) -> Result<Value> {
        self.call(&*self.hooks.prepare, &[self.input_args()])
    }

    fn init_map(&mut self) -> Result<()> {
        self.call_optional(&self.hooks.init_map, &[self.worker_id()])
    }

    fn run_map(&mut self, emitter: &mut Emit) -> Result<()> {
        let output = self.call(&*self.hooks.map, &[self.worker_id(), self.input_args()])?;
        emit_pairs(emitter, output).chain_err(|| "Invalid map output")?;
        Ok(())
    }

    fn init_reduce(&mut self) -> Result<()> {
        self.call_optional(&self.hooks.init_reduce, &[self.worker_id()])
    }

    fn run_reduce(&mut self, key: &Key, values: Vec<Value>, emitter: &mut Emit) -> Result<()> {
        let output = self.call(&*self.hooks.reduce, &[key.to_value(), Value::Array(values)])?;
        emit_pairs(emitter, output).chain_err(|| format!("Invalid reduce output for key {}", key))?;
        Ok(())
    }

    fn init_finish(&mut self) -> Result<()> {
        self.call_optional(&self.hooks.init_finish, &[])
    }

    fn run_finish(&mut self, results: &FinalResults) -> Result<Value> {
        self.call(&*self.hooks.finish, &[results.to_value()])
    }
}
