use std::fmt;

use chrono::prelude::*;
use millstone::errors as calculation;
use millstone::Phase;

/// The lifecycle state of a task. Statuses are ordered the way a run goes through them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Preparing,
    RunningMap,
    RunningReduce,
    RunningFinish,
    Finished,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        match *self {
            TaskStatus::Finished | TaskStatus::Error => true,
            _ => false,
        }
    }
}

impl From<Phase> for TaskStatus {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Prepare => TaskStatus::Preparing,
            Phase::Map => TaskStatus::RunningMap,
            Phase::Reduce => TaskStatus::RunningReduce,
            Phase::Finish => TaskStatus::RunningFinish,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match *self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Preparing => "PREPARING",
            TaskStatus::RunningMap => "RUNNING_MAP",
            TaskStatus::RunningReduce => "RUNNING_REDUCE",
            TaskStatus::RunningFinish => "RUNNING_FINISH",
            TaskStatus::Finished => "FINISHED",
            TaskStatus::Error => "ERROR",
        };
        write!(f, "{}", name)
    }
}

/// One error attached to an `ERROR` event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    /// Index of the failed worker, if the error came from a parallel phase.
    pub worker: Option<usize>,
    pub message: String,
}

impl TaskError {
    /// Splits a calculation failure into the errors reported to task observers.
    ///
    /// A failed parallel phase yields one error per failed worker.
    pub fn from_calculation_error(err: &calculation::Error) -> Vec<TaskError> {
        if let calculation::ErrorKind::AggregateError(_, ref failures) = *err.kind() {
            return failures
                .iter()
                .map(|failure| TaskError {
                    worker: Some(failure.worker_id),
                    message: failure.message(),
                })
                .collect();
        }

        let message = err.iter()
            .map(|e| e.to_string())
            .collect::<Vec<String>>()
            .join(": ");
        vec![TaskError {
            worker: None,
            message,
        }]
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.worker {
            Some(worker) => write!(f, "worker[{}]: {}", worker, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// `TaskEvent` records a status change of a task. Events are never changed once created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub status: TaskStatus,
    pub created: DateTime<Utc>,
    pub errors: Vec<TaskError>,
}

impl TaskEvent {
    pub fn new(status: TaskStatus) -> Self {
        TaskEvent::with_errors(status, Vec::new())
    }

    pub fn with_errors(status: TaskStatus, errors: Vec<TaskError>) -> Self {
        TaskEvent {
            status,
            created: Utc::now(),
            errors,
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// The first error message, if any.
    pub fn first_error(&self) -> Option<String> {
        self.errors.first().map(|err| err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use millstone::errors::WorkerFailure;

    use super::*;

    #[test]
    fn statuses_follow_phases() {
        let statuses: Vec<TaskStatus> = vec![Phase::Prepare, Phase::Map, Phase::Reduce, Phase::Finish]
            .into_iter()
            .map(TaskStatus::from)
            .collect();

        assert!(TaskStatus::Pending < statuses[0]);
        assert!(statuses.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(statuses[3] < TaskStatus::Finished);
        assert!(TaskStatus::Finished.is_terminal());
        assert!(TaskStatus::Error.is_terminal());
        assert!(!TaskStatus::RunningMap.is_terminal());
    }

    #[test]
    fn aggregate_errors_are_split_per_worker() {
        let err: calculation::Error = calculation::ErrorKind::AggregateError(
            "MAP".to_owned(),
            vec![
                WorkerFailure::new(0, "first".into()),
                WorkerFailure::new(2, "second".into()),
            ],
        ).into();

        let errors = TaskError::from_calculation_error(&err);

        assert_eq!(2, errors.len());
        assert_eq!(Some(0), errors[0].worker);
        assert_eq!(Some(2), errors[1].worker);
        assert_eq!("worker[2]: second", errors[1].to_string());
    }

    #[test]
    fn other_errors_keep_their_causes() {
        let err = calculation::Error::with_chain(
            calculation::Error::from("bad plan"),
            calculation::ErrorKind::Msg("prepare failed".to_owned()),
        );

        let errors = TaskError::from_calculation_error(&err);

        assert_eq!(
            vec![TaskError {
                worker: None,
                message: "prepare failed: bad plan".to_owned(),
            }],
            errors
        );
    }

    #[test]
    fn status_serialises_in_upper_case() {
        assert_eq!(
            json!("RUNNING_REDUCE"),
            ::serde_json::to_value(TaskStatus::RunningReduce).unwrap()
        );
        assert_eq!("RUNNING_REDUCE", TaskStatus::RunningReduce.to_string());
    }
}
