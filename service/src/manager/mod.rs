pub mod exec_log;
pub mod task_manager;

pub use self::exec_log::ExecutionLog;
pub use self::exec_log::ExecutionRecord;
pub use self::task_manager::TaskManager;
