use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Local;
use clap::ArgMatches;
use millstone_service::{ExecutionLog, ServiceConfig, TaskInfo, TaskManager};

use super::process_runtime;
use errors::*;

fn format_schedule(info: &TaskInfo) -> String {
    match info.schedule {
        Some(ref spec) => format!(
            "{:02}:{:02} every {}s",
            spec.start_hour(),
            spec.start_minute(),
            spec.interval_secs()
        ),
        None => "-".to_owned(),
    }
}

fn report(manager: &TaskManager) {
    let summary: Vec<String> = manager
        .exec_log()
        .summary()
        .iter()
        .map(|&(status, count)| format!("{} {}", count, status))
        .collect();
    if summary.is_empty() {
        info!("No executions yet");
    } else {
        info!("Executions: {}", summary.join(", "));
    }

    let mut table = table!(["Task", "Script", "Status", "Runs", "Schedule", "Last finished"]);
    for info in manager.task_infos() {
        let last_finished = manager
            .exec_log()
            .latest(&info.id)
            .and_then(|record| record.finished)
            .map(|finished| {
                finished
                    .with_timezone(&Local)
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string()
            })
            .unwrap_or_else(|| "-".to_owned());
        let schedule = format_schedule(&info);
        table.add_row(row![
            info.id,
            info.name,
            info.status,
            info.executions,
            schedule,
            last_finished
        ]);
    }
    table.printstd();
}

pub fn serve(matches: &ArgMatches) -> Result<()> {
    let config_path = matches
        .value_of("config")
        .chain_err(|| "Config file must be specified")?;
    let report_interval =
        value_t!(matches, "report_interval", u64).chain_err(|| "Invalid report interval")?;

    let config = ServiceConfig::from_file(config_path)?;
    let exec_log = Arc::new(ExecutionLog::new(config.exec_log_capacity()));
    let schedules = config.schedules.clone();
    let manager = TaskManager::with_exec_log(
        Arc::new(config),
        Arc::new(process_runtime(matches)),
        exec_log,
    );

    for schedule in &schedules {
        let task_id = manager.register_task(&schedule.script_id, schedule.args.clone())?;
        manager
            .schedule_task(
                &task_id,
                schedule.start_hour,
                schedule.start_minute,
                schedule.interval,
            )
            .chain_err(|| format!("Unable to schedule script {}", schedule.script_id))?;
    }
    info!(
        "Serving {} script(s) with {} schedule(s)",
        manager.script_ids().len(),
        schedules.len()
    );

    loop {
        thread::sleep(Duration::from_secs(report_interval.max(1)));
        report(&manager);
    }
}
