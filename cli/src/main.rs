extern crate chrono;
#[macro_use]
extern crate clap;
#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate log;
extern crate millstone;
extern crate millstone_service;
#[macro_use]
extern crate prettytable;
extern crate serde_json;
extern crate util;

use errors::*;

mod errors {
    error_chain!{
        links {
            Service(::millstone_service::errors::Error, ::millstone_service::errors::ErrorKind);
        }

        foreign_links {
            Clap(::clap::Error);
            Json(::serde_json::Error);
            Logger(::util::errors::Error);
        }
    }
}

mod commands;
mod parser;

fn main() {
    let matches = parser::parse_command_line();

    if let Err(ref e) = run(&matches) {
        eprintln!("error: {}", e);
        for e in e.iter().skip(1) {
            eprintln!("caused by: {}", e);
        }

        if let Some(backtrace) = e.backtrace() {
            eprintln!("backtrace: {:?}", backtrace);
        }

        ::std::process::exit(1);
    }

    ::std::process::exit(0);
}

fn run(matches: &clap::ArgMatches) -> Result<()> {
    util::init_logger().chain_err(|| "Failed to initialise logging")?;

    match matches.subcommand() {
        ("run", Some(sub)) => commands::run(sub),
        ("serve", Some(sub)) => commands::serve(sub),
        _ => {
            println!("{}", matches.usage());
            Err("unknown command".into())
        }
    }
}
