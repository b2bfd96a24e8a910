//! The `celox` command-line tool: evaluate a CEL expression over JSON
//! documents, jq-style.
//!
//! Documents arrive on stdin as newline-delimited JSON (or one document
//! with `--slurp`) and are bound to the package name, so `.name` and bare
//! `name` both reach top-level document keys. Evaluation errors on a
//! stream document log to stderr and emit `null`, keeping the stream
//! aligned with its input; parse errors and decoding errors use distinct
//! exit codes so callers can tell them apart.

use std::{
    io::{BufRead, Read},
    process::ExitCode,
    sync::Arc,
};

use clap::Parser;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use celox::{CelType, Duration, EngineKind, Environment, EvalResult, Runner, Timestamp, Value, cel_to_json, json_to_cel};

const EXIT_OK: u8 = 0;
const EXIT_PARSE: u8 = 1;
const EXIT_EVAL: u8 = 2;
const EXIT_DECODE: u8 = 3;

#[derive(Debug, Parser)]
#[command(name = "celox", version, about = "Common Expression Language evaluator")]
struct Cli {
    /// CEL expression to evaluate.
    expr: String,

    /// Typed variable binding, `name:type=value`; `name:type` alone
    /// declares an annotation without a value.
    #[arg(short = 'a', long = "arg", value_name = "NAME:TYPE[=VALUE]")]
    args: Vec<String>,

    /// Evaluate once without reading documents from stdin.
    #[arg(short = 'n', long)]
    null_input: bool,

    /// Read stdin as one JSON document instead of newline-delimited JSON.
    #[arg(short = 's', long)]
    slurp: bool,

    /// Bind each document to this variable instead of making it the package.
    #[arg(short = 'd', long, value_name = "NAME", conflicts_with = "package")]
    document: Option<String>,

    /// Package name; each input document is bound to it, making top-level
    /// keys resolvable as bare names.
    #[arg(short = 'p', long, value_name = "NAME", default_value = "jq")]
    package: String,

    /// Map a boolean result onto the exit status: 0 true, 1 false, 2 other.
    #[arg(short = 'b', long)]
    boolean: bool,

    /// Evaluate with the transpiled (closure graph) engine.
    #[arg(long)]
    compiled: bool,

    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// One `--arg` binding: a declared type, optionally with a value.
struct TypedArg {
    name: String,
    ty: CelType,
    value: Option<Value>,
}

/// Parses `name:type=value` (or `name:type`), converting the value text
/// with the type's own conversion rules.
fn parse_typed_arg(text: &str) -> Result<TypedArg, String> {
    let (name, rest) = text
        .split_once(':')
        .ok_or_else(|| format!("'{text}' is not name:type[=value]"))?;
    let (type_name, value_text) = match rest.split_once('=') {
        Some((type_name, value)) => (type_name, Some(value)),
        None => (rest, None),
    };
    let ty = CelType::from_name(type_name).ok_or_else(|| format!("unknown type '{type_name}'"))?;
    let value = value_text.map(|text| convert_arg(&ty, text)).transpose()?;
    Ok(TypedArg {
        name: name.to_owned(),
        ty,
        value,
    })
}

fn convert_arg(ty: &CelType, text: &str) -> Result<Value, String> {
    let bad = |err: &dyn std::fmt::Display| format!("cannot convert '{text}' to {ty}: {err}");
    match ty {
        CelType::Int => text.parse().map(Value::Int).map_err(|e| bad(&e)),
        CelType::Uint => text.parse().map(Value::Uint).map_err(|e| bad(&e)),
        CelType::Double => text.parse().map(Value::Double).map_err(|e| bad(&e)),
        CelType::Bool => text.parse().map(Value::Bool).map_err(|e| bad(&e)),
        CelType::String => Ok(Value::string(text)),
        CelType::Bytes => Ok(Value::bytes(text.as_bytes().to_vec())),
        CelType::Timestamp => Timestamp::parse(text).map(Value::Timestamp).map_err(|e| bad(&e)),
        CelType::Duration => Duration::parse(text).map(Value::Duration).map_err(|e| bad(&e)),
        // aggregate arguments arrive as JSON text
        CelType::List | CelType::Map => serde_json::from_str(text)
            .map(|doc: serde_json::Value| json_to_cel(&doc))
            .map_err(|e| bad(&e)),
        CelType::Null => Ok(Value::Null),
        other => Err(format!("type '{other}' is not bindable from the command line")),
    }
}

fn display(result: &Value) {
    match cel_to_json(result) {
        Ok(json) => println!("{json}"),
        // values with no JSON form (type handles, non-finite doubles)
        // fall back to their CEL rendering
        Err(_) => println!("{result}"),
    }
}

/// Maps a result onto an exit status in `--boolean` mode: a false result
/// shares exit code 1, everything non-boolean counts as an error.
fn boolean_status(result: &EvalResult) -> u8 {
    match result {
        Ok(Value::Bool(true)) => EXIT_OK,
        Ok(Value::Bool(false)) => 1,
        _ => EXIT_EVAL,
    }
}

/// Evaluates one document bound to `variable`, printing the result.
///
/// Evaluation errors keep the output stream aligned with the input by
/// emitting `null`; only decoding failures change the status.
fn process_json_doc(runner: &Runner, bindings: &[(Arc<str>, Value)], variable: &str, document: &str, boolean: bool) -> u8 {
    let doc: serde_json::Value = match serde_json::from_str(document) {
        Ok(doc) => doc,
        Err(err) => {
            error!("{err} on document {document:?}");
            return EXIT_DECODE;
        }
    };
    let mut bindings = bindings.to_vec();
    bindings.push((Arc::from(variable), json_to_cel(&doc)));
    let result = runner.evaluate(bindings);
    match &result {
        Ok(value) => display(value),
        Err(err) => {
            debug!("{err} on document {document:?}");
            println!("null");
        }
    }
    if boolean { boolean_status(&result) } else { EXIT_OK }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    let typed_args: Vec<TypedArg> = match cli.args.iter().map(|text| parse_typed_arg(text)).collect() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("error: {message}");
            return ExitCode::from(EXIT_DECODE);
        }
    };

    let mut env = Environment::new().engine(if cli.compiled {
        EngineKind::Compiled
    } else {
        EngineKind::Interpreted
    });
    // With --null-input there is no document to resolve against, and an
    // explicit --document binds a variable rather than a package.
    if !cli.null_input && cli.document.is_none() {
        env = env.package(cli.package.clone());
    }
    for arg in &typed_args {
        env = env.annotation(arg.name.as_str(), arg.ty.clone());
    }

    let ast = match env.compile(&cli.expr) {
        Ok(ast) => ast,
        Err(err) => {
            eprintln!("{}", err.error_text(&cli.expr));
            return ExitCode::from(EXIT_PARSE);
        }
    };
    let runner = match env.program(ast) {
        Ok(runner) => runner,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(EXIT_EVAL);
        }
    };

    let bindings: Vec<(Arc<str>, Value)> = typed_args
        .iter()
        .filter_map(|arg| {
            arg.value
                .as_ref()
                .map(|value| (Arc::from(arg.name.as_str()), value.clone()))
        })
        .collect();

    if cli.null_input {
        let result = runner.evaluate(bindings);
        let status = if cli.boolean {
            boolean_status(&result)
        } else {
            match &result {
                Ok(_) => EXIT_OK,
                Err(_) => EXIT_EVAL,
            }
        };
        match &result {
            Ok(value) => display(value),
            Err(err) => eprintln!("error: {err}"),
        }
        return ExitCode::from(status);
    }

    let variable = cli.document.as_deref().unwrap_or(&cli.package);
    let mut status = EXIT_OK;
    if cli.slurp {
        let mut document = String::new();
        if let Err(err) = std::io::stdin().read_to_string(&mut document) {
            eprintln!("error: {err}");
            return ExitCode::from(EXIT_DECODE);
        }
        status = process_json_doc(&runner, &bindings, variable, &document, cli.boolean);
    } else {
        for line in std::io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    eprintln!("error: {err}");
                    status = status.max(EXIT_DECODE);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            status = status.max(process_json_doc(&runner, &bindings, variable, &line, cli.boolean));
        }
    }
    ExitCode::from(status)
}
