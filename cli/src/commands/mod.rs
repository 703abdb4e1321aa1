pub mod run;
pub mod serve;

use clap::ArgMatches;
use millstone::ProcessRuntime;

pub use self::run::run;
pub use self::serve::serve;

fn process_runtime(matches: &ArgMatches) -> ProcessRuntime {
    let runtime = match matches.value_of("interpreter") {
        Some(interpreter) => ProcessRuntime::new().with_interpreter(interpreter),
        None => ProcessRuntime::new(),
    };
    match matches.value_of("module_extension") {
        Some(extension) => runtime.with_module_extension(extension),
        None => runtime,
    }
}
