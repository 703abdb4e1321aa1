#![recursion_limit = "1024"]

extern crate chrono;
#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate log;
extern crate millstone;
extern crate serde;
#[macro_use]
extern crate serde_derive;
#[cfg_attr(test, macro_use)]
extern crate serde_json;
#[cfg(test)]
extern crate tempfile;
extern crate util;
extern crate uuid;

pub mod errors;

pub mod common;
pub mod config;
pub mod manager;
pub mod observers;
pub mod scheduling;

pub use common::{Task, TaskError, TaskEvent, TaskInfo, TaskStatus};
pub use config::{CmdConfig, ScheduleConfig, ScriptConfig, ScriptRegistry, ServiceConfig};
pub use manager::{ExecutionLog, ExecutionRecord, TaskManager};
pub use observers::{ChannelObserver, TaskNotification, TaskObserver};
pub use scheduling::{ScheduleSpec, ScheduledTaskRunner};
