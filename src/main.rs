use clap::{App, Arg, ErrorKind};
use embedlox::{Lox, LoxError};
use std::io;
use std::process;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const EX_USAGE: i32 = 64;
const EX_DATAERR: i32 = 65;
const EX_SOFTWARE: i32 = 70;
const EX_IOERR: i32 = 74;

fn setup_logging(verbose: u64) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    let formatter = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_level(true);
    tracing_subscriber::registry()
        .with(formatter)
        .with(filter)
        .init();
}

fn exit_code(err: &LoxError) -> i32 {
    match err {
        e if e.is_static() => EX_DATAERR,
        LoxError::Io { .. } => EX_IOERR,
        _ => EX_SOFTWARE,
    }
}

fn main() {
    let matches = App::new("embedlox")
        .about("Runs Lox scripts, or an interactive prompt when no script is given")
        .arg(
            Arg::with_name("script")
                .help("Script to run")
                .index(1),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .multiple(true)
                .help("Raises log verbosity, overriding RUST_LOG"),
        )
        .arg(
            Arg::with_name("no-natives")
                .long("no-natives")
                .help("Starts without clock, sleep and randN"),
        )
        .get_matches_safe()
        .unwrap_or_else(|e| match e.kind {
            ErrorKind::HelpDisplayed | ErrorKind::VersionDisplayed => e.exit(),
            _ => {
                eprintln!("{}", e.message);
                process::exit(EX_USAGE);
            }
        });

    setup_logging(matches.occurrences_of("verbose"));

    let mut lox = if matches.is_present("no-natives") {
        Lox::empty()
    } else {
        Lox::new()
    };

    match matches.value_of("script") {
        Some(script) => {
            debug!(script, "running file");
            if let Err(err) = lox.run_file(script) {
                eprintln!("{}", err);
                process::exit(exit_code(&err));
            }
        }
        None => {
            let stdin = io::stdin();
            if let Err(err) = lox.run_prompt(stdin.lock(), io::stdout()) {
                eprintln!("{}", err);
                process::exit(EX_IOERR);
            }
        }
    }
}
