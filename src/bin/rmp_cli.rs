use log::Level;
use rna_map_processing::{
    about,
    engine::{Engine, Operation, ProcessingEngine, ProjectState, Workflow},
    parameters::ProcessingParameters,
};
use serde::Serialize;
use std::{env, fs};

const DEFAULT_STATE_PATH: &str = ".rmp_state.json";

#[derive(Serialize)]
struct TableSummary {
    id: String,
    records: usize,
    with_structure: usize,
    with_data: usize,
}

#[derive(Serialize)]
struct StateSummary {
    table_count: usize,
    tables: Vec<TableSummary>,
    fits: Vec<String>,
    parameters: ProcessingParameters,
}

fn usage() {
    eprintln!(
        "Usage:\n  \
  rmp_cli --version\n  \
  rmp_cli [GLOBAL] capabilities\n  \
  rmp_cli [GLOBAL] op '<operation-json>'\n  \
  rmp_cli [GLOBAL] workflow '<workflow-json>'\n  \
  rmp_cli [GLOBAL] state-summary\n  \
  rmp_cli [GLOBAL] trim TABLE_ID TRIM_5P TRIM_3P [OUTPUT_ID]\n  \
  rmp_cli [GLOBAL] trim-adapters TABLE_ID OUTPUT_ID [P3_LENGTH]\n  \
  rmp_cli [GLOBAL] fit TITRATION.json CONC_COLUMN VALUE_COLUMN [GROUP_COLUMN]\n\n  \
  GLOBAL: [--state PATH] [--config PATH] [--verbose]\n  \
  Tip: pass @file.json instead of inline JSON"
    );
}

struct GlobalArgs {
    state_path: String,
    config_path: Option<String>,
    verbose: bool,
}

fn parse_global_args(args: &[String]) -> Result<(GlobalArgs, usize), String> {
    let mut globals = GlobalArgs {
        state_path: DEFAULT_STATE_PATH.to_string(),
        config_path: None,
        verbose: false,
    };
    let mut idx = 1;
    while idx < args.len() {
        match args[idx].as_str() {
            "--state" | "--config" => {
                let value = args
                    .get(idx + 1)
                    .ok_or_else(|| format!("Missing path for {}", args[idx]))?
                    .clone();
                if args[idx] == "--state" {
                    globals.state_path = value;
                } else {
                    globals.config_path = Some(value);
                }
                idx += 2;
            }
            "--verbose" | "-v" => {
                globals.verbose = true;
                idx += 1;
            }
            _ => break,
        }
    }
    Ok((globals, idx))
}

fn load_json_arg(value: &str) -> Result<String, String> {
    if let Some(path) = value.strip_prefix('@') {
        fs::read_to_string(path).map_err(|e| format!("Could not read JSON file '{path}': {e}"))
    } else {
        Ok(value.to_string())
    }
}

fn load_state(globals: &GlobalArgs) -> Result<ProjectState, String> {
    let mut state = if std::path::Path::new(&globals.state_path).exists() {
        ProjectState::load_from_path(&globals.state_path).map_err(|e| e.to_string())?
    } else {
        ProjectState::default()
    };
    if let Some(config) = &globals.config_path {
        state.parameters = ProcessingParameters::load_from_path(config).map_err(|e| e.to_string())?;
    }
    Ok(state)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Could not serialize JSON output: {e}"))?;
    println!("{text}");
    Ok(())
}

fn parse_number<T: std::str::FromStr>(value: &str, what: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("Invalid {what} '{value}'"))
}

fn summarize_state(engine: &ProcessingEngine) -> StateSummary {
    let state = engine.state();
    let tables: Vec<TableSummary> = state
        .tables
        .iter()
        .map(|(id, table)| TableSummary {
            id: id.to_string(),
            records: table.len(),
            with_structure: table.iter().filter(|r| r.structure.is_some()).count(),
            with_data: table.iter().filter(|r| r.data.is_some()).count(),
        })
        .collect();
    StateSummary {
        table_count: tables.len(),
        tables,
        fits: state.fits.keys().cloned().collect(),
        parameters: state.parameters.clone(),
    }
}

fn apply_and_save(globals: &GlobalArgs, op: Operation) -> Result<(), String> {
    let mut engine = ProcessingEngine::from_state(load_state(globals)?);
    let result = engine.apply(op).map_err(|e| e.to_string())?;
    engine
        .state()
        .save_to_path(&globals.state_path)
        .map_err(|e| e.to_string())?;
    print_json(&result)
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = env::args().collect();
    if args.len() <= 1 {
        usage();
        return Err("Missing command".to_string());
    }
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("{}", about::version_cli_text());
        return Ok(());
    }

    let (globals, cmd_idx) = parse_global_args(&args)?;
    let level = if globals.verbose { Level::Debug } else { Level::Info };
    simple_logger::init_with_level(level).map_err(|e| format!("Could not start logger: {e}"))?;
    if args.len() <= cmd_idx {
        usage();
        return Err("Missing command".to_string());
    }

    let command = &args[cmd_idx];
    let rest = &args[cmd_idx + 1..];

    match command.as_str() {
        "capabilities" => print_json(&ProcessingEngine::capabilities()),
        "state-summary" => {
            let engine = ProcessingEngine::from_state(load_state(&globals)?);
            print_json(&summarize_state(&engine))
        }
        "op" => {
            let Some(arg) = rest.first() else {
                usage();
                return Err("Missing operation JSON".to_string());
            };
            let json = load_json_arg(arg)?;
            let op: Operation =
                serde_json::from_str(&json).map_err(|e| format!("Invalid operation JSON: {e}"))?;
            apply_and_save(&globals, op)
        }
        "workflow" => {
            let Some(arg) = rest.first() else {
                usage();
                return Err("Missing workflow JSON".to_string());
            };
            let json = load_json_arg(arg)?;
            let workflow: Workflow =
                serde_json::from_str(&json).map_err(|e| format!("Invalid workflow JSON: {e}"))?;

            let mut engine = ProcessingEngine::from_state(load_state(&globals)?);
            let results = engine.apply_workflow(workflow).map_err(|e| e.to_string())?;
            engine
                .state()
                .save_to_path(&globals.state_path)
                .map_err(|e| e.to_string())?;
            print_json(&results)
        }
        "trim" => {
            if rest.len() < 3 {
                usage();
                return Err("trim requires: TABLE_ID TRIM_5P TRIM_3P [OUTPUT_ID]".to_string());
            }
            apply_and_save(
                &globals,
                Operation::Trim {
                    input: rest[0].clone(),
                    trim_5p: parse_number(&rest[1], "5' trim length")?,
                    trim_3p: parse_number(&rest[2], "3' trim length")?,
                    output_id: rest.get(3).cloned(),
                },
            )
        }
        "trim-adapters" => {
            let [input, output_id, ..] = rest else {
                usage();
                return Err("trim-adapters requires: TABLE_ID OUTPUT_ID [P3_LENGTH]".to_string());
            };
            let p3_length = rest
                .get(2)
                .map(|v| parse_number(v, "3' length"))
                .transpose()?;
            apply_and_save(
                &globals,
                Operation::TrimAdapters {
                    input: input.clone(),
                    p3_length,
                    is_rna: None,
                    output_id: Some(output_id.clone()),
                },
            )
        }
        "fit" => {
            if rest.len() < 3 {
                usage();
                return Err("fit requires: TITRATION.json CONC_COLUMN VALUE_COLUMN [GROUP_COLUMN]".to_string());
            }
            apply_and_save(
                &globals,
                Operation::FitTitration {
                    path: rest[0].clone(),
                    conc_column: rest[1].clone(),
                    value_column: rest[2].clone(),
                    group_by: rest.get(3).cloned(),
                },
            )
        }
        _ => {
            usage();
            Err(format!("Unknown command '{command}'"))
        }
    }
}
