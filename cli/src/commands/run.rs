use std::path::PathBuf;
use std::sync::Arc;

use clap::ArgMatches;
use millstone_service::{CmdConfig, TaskManager, TaskStatus};
use serde_json::{self, Value};

use super::process_runtime;
use errors::*;

pub fn run(matches: &ArgMatches) -> Result<()> {
    let script = matches
        .value_of("script")
        .chain_err(|| "Script must be specified")?;
    let library = matches.value_of("library").map(PathBuf::from);
    let args: Vec<String> = matches
        .values_of("args")
        .map(|values| values.map(|arg| arg.to_owned()).collect())
        .unwrap_or_default();

    let config = CmdConfig::new(script, library);
    let script_id = config.script_id().to_owned();
    let manager = TaskManager::new(Arc::new(config), Arc::new(process_runtime(matches)));

    let task_id = manager.register_task(&script_id, Some(args))?;
    let status = manager.start_task_sync(&task_id)?;
    let task = manager.get_task(&task_id)?;

    if status == TaskStatus::Finished {
        let result = task.get_result()?.unwrap_or(Value::Null);
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if let Some(event) = task.first_error() {
        for error in &event.errors {
            eprintln!("{}", error);
        }
    }
    Err(format!("Script {} ended with status {}", script_id, status).into())
}
