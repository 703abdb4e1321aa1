error_chain! {
    links {
        Calculation(::millstone::errors::Error, ::millstone::errors::ErrorKind);
    }

    foreign_links {
        Io(::std::io::Error);
        Json(::serde_json::Error);
    }

    errors {
        ResourceNotFound(id: String) {
            description("resource not found")
            display("resource <{}> not found", id)
        }
        ResourceNotAvailable(reason: String) {
            description("resource not available yet")
            display("resource not available: {}", reason)
        }
        SchedulingConflict(id: String) {
            description("task is already scheduled")
            display("task <{}> is already scheduled", id)
        }
        ScriptNotAllowed(script_id: String) {
            description("script is not registered")
            display("script <{}> is not allowed", script_id)
        }
        InvalidSchedule(reason: String) {
            description("invalid schedule")
            display("invalid schedule: {}", reason)
        }
        TaskBusy(id: String) {
            description("task is already running")
            display("task <{}> is already running", id)
        }
    }
}
