use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use common::{Task, TaskEvent};

/// `TaskObserver` is told about every event appended to the tasks it subscribed to.
///
/// Observers are called on the thread running the task and must not block it for long.
pub trait TaskObserver: Send + Sync {
    fn on_event(&self, task: &Task, event: &TaskEvent);
}

impl<F> TaskObserver for F
where
    F: Fn(&Task, &TaskEvent) + Send + Sync,
{
    fn on_event(&self, task: &Task, event: &TaskEvent) {
        self(task, event)
    }
}

/// A task event pushed to a channel.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskNotification {
    pub task_id: String,
    pub event: TaskEvent,
}

/// `ChannelObserver` forwards task events to an mpsc channel, e.g. to answer a queue or REST
/// caller once its task completes.
pub struct ChannelObserver {
    sender: Mutex<Sender<TaskNotification>>,
    terminal_only: bool,
}

impl ChannelObserver {
    /// Creates an observer forwarding every event.
    pub fn new() -> (Self, Receiver<TaskNotification>) {
        ChannelObserver::create(false)
    }

    /// Creates an observer forwarding only `FINISHED` and `ERROR` events.
    pub fn terminal_only() -> (Self, Receiver<TaskNotification>) {
        ChannelObserver::create(true)
    }

    fn create(terminal_only: bool) -> (Self, Receiver<TaskNotification>) {
        let (sender, receiver) = mpsc::channel();
        let observer = ChannelObserver {
            sender: Mutex::new(sender),
            terminal_only,
        };
        (observer, receiver)
    }
}

impl TaskObserver for ChannelObserver {
    fn on_event(&self, task: &Task, event: &TaskEvent) {
        if self.terminal_only && !event.status.is_terminal() {
            return;
        }

        let notification = TaskNotification {
            task_id: task.id().to_owned(),
            event: event.clone(),
        };
        let sender = self.sender.lock().unwrap();
        if sender.send(notification).is_err() {
            debug!("Dropping event of task {}, nobody is listening", task.id());
        }
    }
}
