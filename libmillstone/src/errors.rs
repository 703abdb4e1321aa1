use std::fmt;

error_chain! {
    foreign_links {
        Io(::std::io::Error);
        Json(::serde_json::Error);
    }

    errors {
        ScriptError(phase: String, message: String) {
            description("script error")
            display("script error in {} phase: {}", phase, message)
        }
        SandboxViolation(module_id: String) {
            description("module id escapes the module sandbox")
            display("module <{}> escapes the module sandbox, only sandboxed loading is supported", module_id)
        }
        ModuleNotFound(module_id: String) {
            description("module not found")
            display("module <{}> not found", module_id)
        }
        CyclicRequire(module_id: String) {
            description("cyclic module require")
            display("module <{}> is required while it is still loading", module_id)
        }
        InvalidKey(reason: String) {
            description("invalid result key")
            display("invalid result key: {}", reason)
        }
        InvalidArgument(reason: String) {
            description("invalid argument")
            display("invalid argument: {}", reason)
        }
        AggregateError(phase: String, failures: Vec<WorkerFailure>) {
            description("one or more phase workers failed")
            display("{} {} worker(s) failed: {}", failures.len(), phase, join_failures(failures))
        }
    }
}

/// A single worker's failure collected by the coordinator during a parallel phase.
#[derive(Debug)]
pub struct WorkerFailure {
    pub worker_id: usize,
    pub error: Error,
}

impl WorkerFailure {
    pub fn new(worker_id: usize, error: Error) -> Self {
        WorkerFailure { worker_id, error }
    }

    /// The failure message including every chained cause.
    pub fn message(&self) -> String {
        self.error
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<String>>()
            .join(": ")
    }
}

impl fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "worker[{}]: {}", self.worker_id, self.message())
    }
}

fn join_failures(failures: &[WorkerFailure]) -> String {
    failures
        .iter()
        .map(|failure| failure.to_string())
        .collect::<Vec<String>>()
        .join("; ")
}

/// Turns any error raised while a phase hook ran into a `ScriptError` for that phase.
///
/// Errors that already are script errors are returned unchanged so the phase recorded is the one
/// the user code failed in.
pub fn script_failure<P: fmt::Display>(phase: P, err: Error) -> Error {
    if let ErrorKind::ScriptError(..) = *err.kind() {
        return err;
    }
    let message = err.to_string();
    Error::with_chain(err, ErrorKind::ScriptError(phase.to_string(), message))
}
