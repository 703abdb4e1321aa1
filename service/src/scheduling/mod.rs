pub mod runner;
pub mod schedule;

pub use self::runner::ScheduledTaskRunner;
pub use self::schedule::ScheduleSpec;
