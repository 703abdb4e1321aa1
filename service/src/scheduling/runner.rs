use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::prelude::*;

use common::Task;
use errors::*;
use scheduling::ScheduleSpec;

/// `ScheduledTaskRunner` runs a task on its schedule from a dedicated thread.
///
/// Firings never overlap: runs happen one after the other on the schedule thread, firings that
/// came due while a run was still going are skipped, and a firing is skipped when the task is
/// already running because it was started some other way. Cancelling (or dropping the runner)
/// stops future firings but does not interrupt a run in progress.
pub struct ScheduledTaskRunner {
    task_id: String,
    spec: ScheduleSpec,
    cancellation_channel: Option<Sender<()>>,
}

impl ScheduledTaskRunner {
    pub fn start(task: Arc<Task>, spec: ScheduleSpec) -> Result<Self> {
        let delay = spec.initial_delay(Local::now().naive_local());
        ScheduledTaskRunner::start_after(task, spec, delay)
    }

    /// Starts the schedule with an explicit delay before the first firing.
    pub fn start_after(task: Arc<Task>, spec: ScheduleSpec, delay: Duration) -> Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let task_id = task.id().to_owned();

        info!(
            "Scheduling task {} every {}s, first run in {}s",
            task_id,
            spec.interval_secs(),
            delay.as_secs()
        );
        thread::Builder::new()
            .name(format!("schedule-{}", task_id))
            .spawn(move || run_schedule(&task, spec, delay, &receiver))
            .chain_err(|| format!("Unable to start schedule thread for task {}", task_id))?;

        Ok(ScheduledTaskRunner {
            task_id,
            spec,
            cancellation_channel: Some(sender),
        })
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn spec(&self) -> ScheduleSpec {
        self.spec
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_channel.is_none()
    }

    pub fn cancel(&mut self) {
        if let Some(sender) = self.cancellation_channel.take() {
            // The schedule thread may already be gone.
            let _ = sender.send(());
            info!("Cancelled schedule of task {}", self.task_id);
        }
    }
}

impl Drop for ScheduledTaskRunner {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn run_schedule(task: &Task, spec: ScheduleSpec, delay: Duration, cancellation: &Receiver<()>) {
    let interval = spec.interval();
    let mut next_fire = Instant::now() + delay;

    loop {
        let now = Instant::now();
        let wait = if next_fire > now {
            next_fire - now
        } else {
            Duration::from_secs(0)
        };
        match cancellation.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                debug!("Schedule thread of task {} stopped", task.id());
                return;
            }
        }

        info!("Scheduled run of task {}", task.id());
        match task.run() {
            Ok(status) => info!("Scheduled run of task {} ended {}", task.id(), status),
            Err(err) => warn!("Skipped scheduled run of task {}: {}", task.id(), err),
        }

        next_fire += interval;
        let now = Instant::now();
        let mut skipped = 0;
        while next_fire <= now {
            next_fire += interval;
            skipped += 1;
        }
        if skipped > 0 {
            warn!(
                "Skipped {} scheduled run(s) of task {} that came due while it was running",
                skipped,
                task.id()
            );
        }
    }
}
