//! Compiles a saved model response from the command line and prints the
//! materialized element tree as JSON. Exit code 0 on success (including a
//! markup-only fallback, reported as a warning), 1 on pipeline failure, 2 on
//! usage errors.

use std::env;
use std::fs;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use uiflow::UiCompiler;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("usage: {} <response-file>", args[0]);
        return ExitCode::from(2);
    }

    let content = match fs::read_to_string(&args[1]) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("error: could not read {}: {e}", args[1]);
            return ExitCode::from(2);
        }
    };

    let mut compiler = match UiCompiler::new() {
        Ok(compiler) => compiler,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = compiler.compile_response(&content).await;

    if let Some(message) = &result.error_message {
        if result.success {
            eprintln!("warning: {message}");
        } else {
            eprintln!("error: {message}");
            return ExitCode::FAILURE;
        }
    }

    match &result.root {
        Some(root) => match serde_json::to_string_pretty(&root.snapshot()) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("error: could not serialize the element tree: {e}");
                ExitCode::FAILURE
            }
        },
        None => ExitCode::FAILURE,
    }
}
