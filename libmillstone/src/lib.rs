#![recursion_limit = "1024"]

#[macro_use]
extern crate error_chain;
extern crate futures;
extern crate futures_cpupool;
#[macro_use]
extern crate log;
extern crate serde;
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate serde_json;
#[cfg(test)]
extern crate tempfile;

pub mod errors;

pub mod callable;
pub mod emitter;
pub mod engine;
pub mod final_results;
pub mod modules;
pub mod process;
pub mod results;
pub mod script;
pub mod source;

pub use callable::{CallableHost, CallableRuntime, HookScope, HookSet, HookSetBuilder};
pub use emitter::Emit;
pub use engine::{CalculationEngine, CalculationParams, Plan};
pub use final_results::FinalResults;
pub use modules::{Exports, ModuleEvaluator, ModuleResolver, ModuleScope, SourceEvaluator};
pub use process::ProcessRuntime;
pub use results::{IntoKey, Key, ResultStore};
pub use script::{Callable, Phase, ScriptContext, ScriptHost, ScriptRuntime};
pub use source::SourceScript;
