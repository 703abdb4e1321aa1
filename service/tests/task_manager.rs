/// Integration tests of the task lifecycle, using closure hooks in place of a script engine.
extern crate millstone;
extern crate millstone_service;
#[macro_use]
extern crate serde_json;
extern crate tempfile;

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use millstone::errors::Result as CalculationResult;
use millstone::{CallableRuntime, HookSetBuilder, ScriptRuntime};
use millstone_service::errors::*;
use millstone_service::*;
use serde_json::Value;
use tempfile::TempDir;

struct Fixture {
    // Keeps the script directory alive for the duration of the test.
    _dir: TempDir,
    script_dir: PathBuf,
    reduce_calls: Arc<AtomicUsize>,
    manager: TaskManager,
}

fn runtime(fail_map_worker: Option<u64>, reduce_calls: Arc<AtomicUsize>) -> Arc<ScriptRuntime> {
    let hooks = HookSetBuilder::new()
        .prepare(|args: &[Value]| -> CalculationResult<Value> {
            let chunks = args[0].as_array().map(|a| a.len()).unwrap_or(0).max(1);
            Ok(json!({"numChunks": chunks}))
        })
        .map(move |args: &[Value]| -> CalculationResult<Value> {
            let worker = args[0].as_u64().unwrap_or(0);
            if Some(worker) == fail_map_worker {
                return Err(format!("worker {} has no data", worker).into());
            }
            let word = args[1][worker as usize].clone();
            Ok(json!([[word, 1]]))
        })
        .reduce(move |args: &[Value]| -> CalculationResult<Value> {
            reduce_calls.fetch_add(1, Ordering::SeqCst);
            let count = args[1].as_array().map(|values| values.len()).unwrap_or(0);
            Ok(json!([[args[0].clone(), count]]))
        })
        .finish(|args: &[Value]| -> CalculationResult<Value> { Ok(args[0].clone()) })
        .build()
        .unwrap();
    Arc::new(CallableRuntime::new(hooks))
}

fn fixture(fail_map_worker: Option<u64>) -> Fixture {
    let dir = TempDir::new().unwrap();
    let script_dir = dir.path().to_path_buf();
    let mut file = File::create(dir.path().join("wordcount.js")).unwrap();
    file.write_all(b"// counts words\n").unwrap();

    let mut config = ServiceConfig::default();
    let mut script = ScriptConfig::new(dir.path().join("wordcount.js"));
    script.library_path = Some(dir.path().join("lib"));
    script.default_args = vec!["x".to_owned(), "y".to_owned(), "x".to_owned()];
    config.scripts.insert("wordcount".to_owned(), script);

    let reduce_calls = Arc::new(AtomicUsize::new(0));
    let manager = TaskManager::new(
        Arc::new(config),
        runtime(fail_map_worker, Arc::clone(&reduce_calls)),
    );
    Fixture {
        _dir: dir,
        script_dir,
        reduce_calls,
        manager,
    }
}

fn args(words: &[&str]) -> Option<Vec<String>> {
    Some(words.iter().map(|w| (*w).to_owned()).collect())
}

#[test]
fn unknown_script_is_not_allowed() {
    let fixture = fixture(None);

    let err = fixture
        .manager
        .register_task("unknown-script", Some(Vec::new()))
        .unwrap_err();

    match *err.kind() {
        ErrorKind::ScriptNotAllowed(ref id) => assert_eq!("unknown-script", id),
        ref other => panic!("expected ScriptNotAllowed, got {:?}", other),
    }
    assert!(fixture.manager.get_tasks().is_empty());
    assert!(fixture.manager.exec_log().is_empty());
}

#[test]
fn registration_builds_calculation_params() {
    let fixture = fixture(None);

    let id = fixture.manager.register_task("wordcount", None).unwrap();
    let task = fixture.manager.get_task(&id).unwrap();

    assert_eq!("wordcount.js", task.name());
    assert_eq!(
        vec!["x".to_owned(), "y".to_owned(), "x".to_owned()],
        task.params().input_args
    );
    assert_eq!(
        vec![
            fixture.script_dir.clone(),
            fixture.script_dir.join("lib"),
        ],
        task.params().module_roots
    );
    assert_eq!(TaskStatus::Pending, task.status());
    assert_eq!(vec!["wordcount".to_owned()], fixture.manager.script_ids());
}

#[test]
fn task_ids_are_unique() {
    let fixture = fixture(None);

    let first = fixture.manager.register_task("wordcount", None).unwrap();
    let second = fixture.manager.register_task("wordcount", None).unwrap();

    assert_ne!(first, second);
    assert_eq!(2, fixture.manager.get_tasks().len());
}

#[test]
fn second_schedule_is_a_conflict() {
    let fixture = fixture(None);
    let id = fixture.manager.register_task("wordcount", None).unwrap();

    fixture.manager.schedule_task(&id, 9, 30, 3600).unwrap();
    let err = fixture.manager.schedule_task(&id, 10, 0, 60).unwrap_err();

    match *err.kind() {
        ErrorKind::SchedulingConflict(ref task_id) => assert_eq!(&id, task_id),
        ref other => panic!("expected SchedulingConflict, got {:?}", other),
    }
    assert!(fixture.manager.is_scheduled(&id));
    assert_eq!(
        Some(ScheduleSpec::new(9, 30, 3600).unwrap()),
        fixture.manager.get_scheduling_info(&id)
    );
    assert_eq!(
        Some(ScheduleSpec::new(9, 30, 3600).unwrap()),
        fixture.manager.task_info(&id).unwrap().schedule
    );
}

#[test]
fn result_is_available_once_finished() {
    let fixture = fixture(None);
    let id = fixture
        .manager
        .register_task("wordcount", args(&["b", "a", "b"]))
        .unwrap();
    let task = fixture.manager.get_task(&id).unwrap();

    match *task.get_result().unwrap_err().kind() {
        ErrorKind::ResourceNotAvailable(_) => {}
        ref other => panic!("expected ResourceNotAvailable, got {:?}", other),
    }

    assert_eq!(
        TaskStatus::Finished,
        fixture.manager.start_task_sync(&id).unwrap()
    );

    assert_eq!(
        Some(json!([
            {"key": "a", "values": [1]},
            {"key": "b", "values": [2]}
        ])),
        task.get_result().unwrap()
    );
}

#[test]
fn statuses_are_monotonic() {
    let fixture = fixture(None);
    let (observer, receiver) = ChannelObserver::new();
    let id = fixture
        .manager
        .register_task_with_observer("wordcount", None, Arc::new(observer))
        .unwrap();

    fixture.manager.start_task_sync(&id).unwrap();

    let events = fixture.manager.get_task(&id).unwrap().events();
    let statuses: Vec<TaskStatus> = events.iter().map(|event| event.status).collect();
    assert_eq!(TaskStatus::Pending, statuses[0]);
    assert!(statuses.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(1, statuses.iter().filter(|status| status.is_terminal()).count());
    assert_eq!(Some(&TaskStatus::Finished), statuses.last());

    let notified: Vec<TaskStatus> = receiver.try_iter().map(|n| n.event.status).collect();
    assert_eq!(&statuses[1..], &notified[..]);
}

#[test]
fn failing_map_worker_ends_in_error() {
    let fixture = fixture(Some(1));
    let id = fixture.manager.register_task("wordcount", None).unwrap();

    assert_eq!(
        TaskStatus::Error,
        fixture.manager.start_task_sync(&id).unwrap()
    );

    let task = fixture.manager.get_task(&id).unwrap();
    let error = task.first_error().unwrap();
    assert_eq!(TaskStatus::Error, error.status);
    assert_eq!(1, error.errors.len());
    assert_eq!(Some(1), error.errors[0].worker);
    assert!(error.errors[0].message.contains("worker 1 has no data"));
    assert_eq!(0, fixture.reduce_calls.load(Ordering::SeqCst));
    assert_eq!(None, task.get_result().unwrap());
    assert!(!task
        .events()
        .iter()
        .any(|event| event.status == TaskStatus::RunningReduce));
}

#[test]
fn async_start_notifies_completion() {
    let fixture = fixture(None);
    let (observer, receiver) = ChannelObserver::terminal_only();
    let id = fixture
        .manager
        .register_task_with_observer("wordcount", args(&["q"]), Arc::new(observer))
        .unwrap();

    fixture.manager.start_task(&id).unwrap();
    let notification = receiver.recv_timeout(Duration::from_secs(10)).unwrap();

    assert_eq!(id, notification.task_id);
    assert_eq!(TaskStatus::Finished, notification.event.status);
    let record = fixture.manager.exec_log().latest(&id).unwrap();
    assert_eq!(TaskStatus::Finished, record.status);
    assert_eq!(1, record.run);
}

#[test]
fn deleting_a_task_cancels_its_schedule() {
    let fixture = fixture(None);
    let id = fixture.manager.register_task("wordcount", None).unwrap();
    fixture.manager.schedule_task(&id, 3, 0, 600).unwrap();

    fixture.manager.delete_task(&id).unwrap();

    assert!(!fixture.manager.is_scheduled(&id));
    assert!(fixture.manager.get_tasks().is_empty());
    match *fixture.manager.delete_task(&id).unwrap_err().kind() {
        ErrorKind::ResourceNotFound(_) => {}
        ref other => panic!("expected ResourceNotFound, got {:?}", other),
    }
    match *fixture.manager.start_task(&id).unwrap_err().kind() {
        ErrorKind::ResourceNotFound(_) => {}
        ref other => panic!("expected ResourceNotFound, got {:?}", other),
    }
}

#[test]
fn scheduling_an_unknown_task_fails() {
    let fixture = fixture(None);

    match *fixture.manager.schedule_task("nope", 1, 0, 60).unwrap_err().kind() {
        ErrorKind::ResourceNotFound(_) => {}
        ref other => panic!("expected ResourceNotFound, got {:?}", other),
    }
    let id = fixture.manager.register_task("wordcount", None).unwrap();
    match *fixture.manager.schedule_task(&id, 25, 0, 60).unwrap_err().kind() {
        ErrorKind::InvalidSchedule(_) => {}
        ref other => panic!("expected InvalidSchedule, got {:?}", other),
    }
    assert!(!fixture.manager.is_scheduled(&id));
}

#[test]
fn every_execution_is_logged() {
    let fixture = fixture(None);
    let id = fixture.manager.register_task("wordcount", None).unwrap();

    fixture.manager.start_task_sync(&id).unwrap();
    fixture.manager.start_task_sync(&id).unwrap();

    let records = fixture.manager.exec_log().records();
    assert_eq!(2, records.len());
    assert!(records.iter().all(|record| record.task_id == id));
    assert_eq!(vec![1, 2], records.iter().map(|r| r.run).collect::<Vec<usize>>());
    assert_eq!(2, fixture.manager.task_info(&id).unwrap().executions);
}
