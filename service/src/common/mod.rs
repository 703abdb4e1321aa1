/// Common module contains the data containers shared by the task manager and the schedulers.
/// Task: A registered calculation that can be run many times.
/// TaskEvent: A status change of a task, with the errors of a failed run.
pub mod event;
pub mod task;

pub use self::event::TaskError;
pub use self::event::TaskEvent;
pub use self::event::TaskStatus;
pub use self::task::Task;
pub use self::task::TaskInfo;
