use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use serde_json::{self, Map, Value};

use emitter::{emit_pairs, Emit};
use errors::*;
use final_results::FinalResults;
use modules::{Exports, ModuleEvaluator, ModuleScope};
use results::Key;
use script::{ScriptContext, ScriptHost, ScriptRuntime};
use source::SourceScript;

pub const PHASE_ENV: &str = "MILLSTONE_PHASE";
pub const WORKER_ID_ENV: &str = "MILLSTONE_WORKER_ID";
pub const MODULES_ENV: &str = "MILLSTONE_MODULES";
pub const MODULE_ID_ENV: &str = "MILLSTONE_MODULE_ID";

/// Marks a line declaring a module the script requires, e.g. `# millstone-require: lib/words`.
pub const REQUIRE_DIRECTIVE: &str = "millstone-require:";

/// Module ids declared by the require directives of a script, in declaration order.
pub fn required_modules(text: &str) -> Vec<&str> {
    text.lines()
        .filter_map(|line| {
            line.find(REQUIRE_DIRECTIVE)
                .map(|start| &line[start + REQUIRE_DIRECTIVE.len()..])
        })
        .filter_map(|rest| rest.split_whitespace().next())
        .collect()
}

/// Requires every module declared by `source`, returning their exports keyed by module id.
fn require_declared<F>(source: &SourceScript, require: F) -> Result<Map<String, Value>>
where
    F: Fn(&str) -> Result<Exports>,
{
    let mut modules = Map::new();
    for module_id in required_modules(source.text()) {
        let exports = require(module_id)?;
        let value = exports
            .downcast_ref::<Value>()
            .cloned()
            .chain_err(|| format!("module <{}> was not loaded by a script process", module_id))?;
        modules.insert(module_id.to_owned(), value);
    }
    Ok(modules)
}

fn script_command(interpreter: &Option<PathBuf>, script: &Path) -> Command {
    let mut command = match *interpreter {
        Some(ref interpreter) => {
            let mut command = Command::new(interpreter);
            command.arg(script);
            command
        }
        None => Command::new(script),
    };
    if let Some(dir) = script.parent().filter(|dir| dir != &Path::new("")) {
        command.current_dir(dir);
    }
    command
}

/// Runs a prepared command with `input` on its stdin and reads its stdout as JSON.
fn run_command(mut command: Command, what: &str, input: &Value) -> Result<Value> {
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .chain_err(|| format!("Failed to start a process for the {}", what))?;

    if let Some(mut stdin) = child.stdin.take() {
        if let Err(err) = stdin.write_all(input.to_string().as_bytes()) {
            // The script does not have to read its input.
            if err.kind() != IoErrorKind::BrokenPipe {
                return Err(err).chain_err(|| "Error writing to script stdin.");
            }
        }
    } else {
        return Err("Error accessing stdin of script process.".into());
    }

    let output = child
        .wait_with_output()
        .chain_err(|| "Error waiting for script result.")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("{} exited with {}: {}", what, output.status, stderr.trim()).into());
    }

    let stdout = String::from_utf8(output.stdout).chain_err(|| "Error reading script output.")?;
    if stdout.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&stdout).chain_err(|| format!("Error parsing output of the {}", what))
}

/// `ProcessEvaluator` loads a module by running it once as `<module>` (optionally through the
/// interpreter) in the module's directory. Whatever JSON the module prints is its exports.
///
/// A module's own require directives are loaded first and passed to it in `MILLSTONE_MODULES`.
pub struct ProcessEvaluator {
    interpreter: Option<PathBuf>,
}

impl ModuleEvaluator for ProcessEvaluator {
    fn evaluate(&self, scope: &ModuleScope, source: &SourceScript) -> Result<Exports> {
        let modules = require_declared(source, |module_id| scope.require(module_id))?;

        let mut command = script_command(&self.interpreter, Path::new(source.qualified_name()));
        command
            .env(MODULES_ENV, Value::Object(modules).to_string())
            .env(MODULE_ID_ENV, scope.module_id());
        let what = format!("module <{}>", scope.module_id());
        let exports = run_command(command, &what, &json!([]))?;
        Ok(Arc::new(exports))
    }
}

/// `ProcessRuntime` runs the user script as a separate process for every hook call.
///
/// The script is started as `<script> <hook> <input args...>`, optionally through an interpreter.
/// Hook arguments are written to its stdin as a JSON array and the hook result is read from its
/// stdout as JSON; empty output means `null`. A non-zero exit status fails the hook.
///
/// Modules named by the script's require directives are resolved in the sandbox of the run and
/// their exports are handed to every hook process as a JSON object in `MILLSTONE_MODULES`.
#[derive(Clone, Debug, Default)]
pub struct ProcessRuntime {
    interpreter: Option<PathBuf>,
    module_extension: Option<String>,
}

impl ProcessRuntime {
    pub fn new() -> Self {
        Default::default()
    }

    /// Runs the script through `interpreter` instead of executing it directly.
    pub fn with_interpreter<P: Into<PathBuf>>(mut self, interpreter: P) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    pub fn with_module_extension(mut self, extension: &str) -> Self {
        self.module_extension = Some(extension.to_owned());
        self
    }
}

impl ScriptRuntime for ProcessRuntime {
    fn open(&self, context: ScriptContext) -> Result<Box<ScriptHost>> {
        let evaluator = ProcessEvaluator {
            interpreter: self.interpreter.clone(),
        };
        let modules = require_declared(&context.params().user_script, |module_id| {
            context.require(&evaluator, module_id)
        })?;

        Ok(Box::new(ProcessHost {
            interpreter: self.interpreter.clone(),
            script: PathBuf::from(context.params().user_script.qualified_name()),
            modules: Value::Object(modules).to_string(),
            context,
        }))
    }

    fn module_extension(&self) -> &str {
        match self.module_extension {
            Some(ref extension) => extension,
            None => "js",
        }
    }
}

struct ProcessHost {
    interpreter: Option<PathBuf>,
    script: PathBuf,
    modules: String,
    context: ScriptContext,
}

impl ProcessHost {
    fn command(&self, hook: &str) -> Command {
        let mut command = script_command(&self.interpreter, &self.script);
        command
            .arg(hook)
            .args(self.context.input_args())
            .env(PHASE_ENV, self.context.phase().to_string())
            .env(MODULES_ENV, &self.modules);
        if let Some(worker_id) = self.context.worker_id() {
            command.env(WORKER_ID_ENV, worker_id.to_string());
        }
        command
    }

    fn call(&self, hook: &str, args: &Value) -> Result<Value> {
        run_command(self.command(hook), &format!("{} hook", hook), args)
    }

    fn worker_id(&self) -> Value {
        match self.context.worker_id() {
            Some(id) => json!(id),
            None => Value::Null,
        }
    }
}

impl ScriptHost for ProcessHost {
    fn prepare(&mut self) -> Result<Value> {
        self.call("prepare", &json!([self.context.input_args()]))
    }

    fn init_map(&mut self) -> Result<()> {
        Ok(())
    }

    fn run_map(&mut self, emitter: &mut Emit) -> Result<()> {
        let output = self.call("map", &json!([self.worker_id(), self.context.input_args()]))?;
        emit_pairs(emitter, output).chain_err(|| "Invalid map output")?;
        Ok(())
    }

    fn init_reduce(&mut self) -> Result<()> {
        Ok(())
    }

    fn run_reduce(&mut self, key: &Key, values: Vec<Value>, emitter: &mut Emit) -> Result<()> {
        let output = self.call("reduce", &json!([key.to_value(), values]))?;
        emit_pairs(emitter, output).chain_err(|| format!("Invalid reduce output for key {}", key))?;
        Ok(())
    }

    fn init_finish(&mut self) -> Result<()> {
        Ok(())
    }

    fn run_finish(&mut self, results: &FinalResults) -> Result<Value> {
        self.call("finish", &json!([results.to_value()]))
    }
}
