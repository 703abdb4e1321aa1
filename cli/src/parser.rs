use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};

fn interpreter_arg<'a, 'b>() -> Arg<'a, 'b> {
    Arg::with_name("interpreter")
        .long("interpreter")
        .short("i")
        .help("Program used to run scripts. Scripts are executed directly when omitted")
        .takes_value(true)
        .required(false)
}

fn module_extension_arg<'a, 'b>() -> Arg<'a, 'b> {
    Arg::with_name("module_extension")
        .long("module-extension")
        .short("x")
        .help("File extension of modules named by millstone-require directives (default: js)")
        .takes_value(true)
        .required(false)
}

pub fn parse_command_line<'a>() -> ArgMatches<'a> {
    App::new("millstone")
        .version(crate_version!())
        .author("Millstone Authors <millstone@millstone.dev>")
        .about("Run map-reduce scripts once or as scheduled tasks")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .subcommand(
            SubCommand::with_name("run")
                .about("Run a script once and print its result")
                .arg(
                    Arg::with_name("library")
                        .long("library")
                        .short("m")
                        .help("Directory searched for modules after the script's directory")
                        .takes_value(true)
                        .required(false),
                )
                .arg(interpreter_arg())
                .arg(module_extension_arg())
                .arg(
                    Arg::with_name("script")
                        .help("Script to run")
                        .required(true)
                        .index(1),
                )
                .arg(
                    Arg::with_name("args")
                        .help("Arguments passed to the script")
                        .multiple(true)
                        .required(false)
                        .index(2),
                ),
        )
        .subcommand(
            SubCommand::with_name("serve")
                .about("Run the configured scripts on their schedules")
                .arg(
                    Arg::with_name("config")
                        .long("config")
                        .short("c")
                        .help("Service configuration file")
                        .takes_value(true)
                        .required(true),
                )
                .arg(interpreter_arg())
                .arg(module_extension_arg())
                .arg(
                    Arg::with_name("report_interval")
                        .long("report-interval")
                        .short("r")
                        .help("Seconds between two execution reports")
                        .takes_value(true)
                        .default_value("60")
                        .required(false),
                ),
        )
        .get_matches()
}
