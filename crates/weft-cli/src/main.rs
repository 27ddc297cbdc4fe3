use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use weft_lang::{Scope, Value};

#[derive(Parser)]
#[command(name = "weft")]
#[command(about = "Expression engine and reactive scope graph")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate an expression against a fresh root scope
    Eval {
        /// The expression to evaluate
        expr: String,
        /// Seed scope attributes, as name=expression pairs
        #[arg(long = "set", value_name = "NAME=EXPR")]
        sets: Vec<String>,
    },
    /// Parse an expression and report problems without evaluating
    Check {
        /// The expression to check
        expr: String,
    },
    /// Load watch expressions from a file, then apply stdin mutations
    Watch {
        /// File with one watch expression per line
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Commands::Eval { expr, sets } => eval_command(&expr, &sets),
        Commands::Check { expr } => check_command(&expr),
        Commands::Watch { file } => watch_command(&file),
    }
}

fn eval_command(expr: &str, sets: &[String]) -> ExitCode {
    let root = Scope::root();
    for pair in sets {
        let Some((name, src)) = pair.split_once('=') else {
            eprintln!("bad --set `{pair}`: expected NAME=EXPR");
            return ExitCode::FAILURE;
        };
        match root.eval(src.trim()) {
            Ok(value) => root.set(name.trim(), value),
            Err(e) => {
                eprintln!("bad --set `{pair}`: {e}");
                return ExitCode::FAILURE;
            }
        }
    }
    match root.eval(expr) {
        Ok(value) => {
            println!("{}", render(&value));
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn check_command(expr: &str) -> ExitCode {
    match weft_lang::parse(expr) {
        Ok(compiled) => {
            println!(
                "ok (constant: {}, literal: {}, mode: {:?})",
                compiled.constant(),
                compiled.literal(),
                compiled.watch_mode()
            );
            ExitCode::SUCCESS
        }
        Err(errors) => {
            for e in errors {
                eprintln!("{e}");
            }
            ExitCode::FAILURE
        }
    }
}

/// Each line of the file becomes a watcher that prints value transitions.
/// Stdin lines `name = expr` mutate the scope and run a digest.
fn watch_command(file: &PathBuf) -> ExitCode {
    let source = match std::fs::read_to_string(file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("cannot read {}: {e}", file.display());
            return ExitCode::FAILURE;
        }
    };

    let root = Scope::root();
    for line in source.lines() {
        let expr = line.trim();
        if expr.is_empty() || expr.starts_with('#') {
            continue;
        }
        let label = expr.to_string();
        let result = root.watch(expr, move |new, old, _| {
            println!("  {label}: {} -> {}", render(old), render(new));
            Ok(())
        });
        if let Err(errors) = result {
            for e in errors {
                eprintln!("{e}");
            }
            return ExitCode::FAILURE;
        }
    }

    if let Err(e) = root.digest() {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    let stdin = io::stdin();
    loop {
        print!("> ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match root.apply(line) {
            Ok(_) => root.flush_deferred(),
            Err(e) => eprintln!("{e}"),
        }
    }
    ExitCode::SUCCESS
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{s}\""),
        other => other.to_display(),
    }
}
