//! inkling - an incremental compilation engine for interactive sessions
//!
//! This is the main entry point for the inkling command-line interface.

use std::path::PathBuf;
use std::process::ExitCode;

use inkling::session::{logging, Interpreter, InterpreterConfig, Repl, ReplConfig};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    // Parse simple command line args.
    let mut verbose = false;
    let mut raw = false;
    let mut timing = false;
    let mut image: Option<PathBuf> = None;
    let mut execute: Vec<String> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-i" | "--image" => {
                i += 1;
                if i < args.len() {
                    image = Some(PathBuf::from(&args[i]));
                }
            }
            "-e" | "--execute" => {
                i += 1;
                if i < args.len() {
                    execute.push(args[i].clone());
                }
            }
            "-v" | "--verbose" => {
                verbose = true;
            }
            "-t" | "--timing" => {
                timing = true;
            }
            "--raw" => {
                raw = true;
            }
            "-h" | "--help" => {
                print_help();
                return ExitCode::SUCCESS;
            }
            "--version" => {
                println!("inkling v{}", env!("CARGO_PKG_VERSION"));
                return ExitCode::SUCCESS;
            }
            arg => {
                eprintln!("Unknown option: {}", arg);
                return ExitCode::FAILURE;
            }
        }
        i += 1;
    }

    logging::init(verbose);

    let config = InterpreterConfig::new().raw_input(raw).verbose(verbose);
    let mut interp = Interpreter::with_config(config);

    if let Some(path) = image {
        if let Err(e) = interp.load_image(&path) {
            eprintln!("Error loading image {}: {}", path.display(), e);
            return ExitCode::FAILURE;
        }
    }

    // Execute fragments or run REPL.
    if !execute.is_empty() {
        match execute_fragments(&mut interp, &execute) {
            Ok(_) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        }
    } else {
        let mut repl = Repl::with_config(interp, ReplConfig { timing, ..ReplConfig::default() });
        match repl.run() {
            Ok(_) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        }
    }
}

fn print_help() {
    println!("inkling - incremental compilation for interactive sessions");
    println!();
    println!("Usage: inkling [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -e, --execute CODE     Run a fragment and exit (repeatable)");
    println!("  -i, --image PATH       Load a session image before anything else");
    println!("  -t, --timing           Show timing in the REPL");
    println!("  --raw                  Treat input as plain declarations");
    println!("  -v, --verbose          Enable verbose output");
    println!("  -h, --help             Show this help message");
    println!("  --version              Show version");
    println!();
    println!("Environment:");
    println!("  {}             Log filter, e.g. inkling=trace", logging::LOG_ENV);
    println!();
    println!("Examples:");
    println!("  inkling                                 Start REPL");
    println!("  inkling -e 'int x = 6;' -e 'x * 7;'     Run fragments and exit");
}

fn execute_fragments(interp: &mut Interpreter, fragments: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    for fragment in fragments {
        let result = interp.process(fragment);
        print!("{}", interp.take_output());
        result?;
    }
    Ok(())
}
