use std::path::Path;

use msgpipe::bindings::ConnectionConfig;
use msgpipe::demo::{run_echo_demo, DemoOutcome};
use serde::Serialize;
use tracing::{debug, info};

use crate::cmd::DemoArgs;
use crate::exit::{bindings_error, io_error, CliError, CliResult, DATA_INVALID, FAILURE, SUCCESS};
use crate::output::{print_json, print_table, OutputFormat};

#[derive(Serialize)]
struct EchoOutput {
    x: i32,
    y: i32,
    name: String,
    array: Vec<u8>,
    handle_returned: bool,
}

#[derive(Serialize)]
struct DemoOutput {
    rounds: usize,
    max_messages_per_wake: Option<usize>,
    echoed: Vec<EchoOutput>,
    logged: Vec<String>,
    reactor_callbacks: usize,
    pending_calls: usize,
    client_error: bool,
    server_error: bool,
    ok: bool,
}

pub fn run(args: DemoArgs, format: OutputFormat) -> CliResult<i32> {
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ConnectionConfig::default(),
    };
    debug!(rounds = args.rounds, ?config, "starting echo demo");

    let outcome = run_echo_demo(&config, args.rounds).map_err(|err| bindings_error("demo", err))?;
    let ok = succeeded(&outcome, args.rounds);
    info!(
        echoed = outcome.echoed.len(),
        callbacks = outcome.reactor_callbacks,
        ok,
        "echo demo finished"
    );

    let out = DemoOutput {
        rounds: args.rounds,
        max_messages_per_wake: config.connector.max_messages_per_wake.map(|cap| cap.get()),
        echoed: outcome
            .echoed
            .into_iter()
            .map(|point| EchoOutput {
                x: point.x,
                y: point.y,
                name: point.name,
                array: point.array,
                handle_returned: point.handle_returned,
            })
            .collect(),
        logged: outcome.logged,
        reactor_callbacks: outcome.reactor_callbacks,
        pending_calls: outcome.pending_calls,
        client_error: outcome.client_error,
        server_error: outcome.server_error,
        ok,
    };
    print_demo(&out, format);

    Ok(if ok { SUCCESS } else { FAILURE })
}

fn load_config(path: &Path) -> CliResult<ConnectionConfig> {
    let text = std::fs::read_to_string(path)
        .map_err(|err| io_error(&format!("read {}", path.display()), err))?;
    serde_json::from_str(&text)
        .map_err(|err| CliError::new(DATA_INVALID, format!("parse {}: {err}", path.display())))
}

fn succeeded(outcome: &DemoOutcome, rounds: usize) -> bool {
    outcome.echoed.len() == rounds
        && outcome.logged.len() == rounds
        && outcome.echoed.iter().all(|point| point.handle_returned)
        && outcome.pending_calls == 0
        && !outcome.client_error
        && !outcome.server_error
}

fn print_demo(out: &DemoOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            print_table(
                &["NAME", "X", "Y", "ARRAY", "HANDLE"],
                out.echoed
                    .iter()
                    .map(|point| {
                        vec![
                            point.name.clone(),
                            point.x.to_string(),
                            point.y.to_string(),
                            format!("{:?}", point.array),
                            if point.handle_returned { "returned" } else { "lost" }.to_string(),
                        ]
                    })
                    .collect(),
            );
            println!(
                "logged={} callbacks={} ok={}",
                out.logged.len(),
                out.reactor_callbacks,
                out.ok
            );
        }
        OutputFormat::Pretty => {
            for point in &out.echoed {
                println!(
                    "echo {} x={} y={} array={:?} handle_returned={}",
                    point.name, point.x, point.y, point.array, point.handle_returned
                );
            }
            for line in &out.logged {
                println!("log {line}");
            }
            println!("callbacks={} ok={}", out.reactor_callbacks, out.ok);
        }
    }
}
