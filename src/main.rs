use std::path::PathBuf;
use std::process::ExitCode;

use lispy::{Config, Error, Interpreter, with_eval_stack};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let scripts: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    if scripts.is_empty() {
        eprintln!("Usage: lispy FILE...");
        eprintln!("Start the interactive REPL with the `repl` binary.");
        return ExitCode::from(2);
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::from(2);
        }
    };

    match with_eval_stack(move || run_scripts(&scripts, &config)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: could not start the evaluator thread: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_scripts(scripts: &[PathBuf], config: &Config) -> ExitCode {
    for script in scripts {
        // Each script gets a fresh interpreter; its directory is searched for modules.
        let mut script_config = config.clone();
        if let Some(dir) = script.parent()
            && !dir.as_os_str().is_empty()
        {
            script_config.load_paths.insert(0, dir.to_path_buf());
        }
        let interpreter = Interpreter::new(&script_config);
        let name = script.display().to_string();
        let source = match std::fs::read_to_string(script) {
            Ok(source) => source,
            Err(e) => {
                eprintln!("Error: could not read '{}': {}", name, e);
                return ExitCode::FAILURE;
            }
        };
        if let Err(e) = interpreter.eval_str(&source) {
            report(&e, &name, &source);
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}

fn report(error: &Error, name: &str, source: &str) {
    if error.pretty_print(name, source).is_err() {
        eprintln!("Error: {}", error);
    }
}
