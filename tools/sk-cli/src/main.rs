//! Batch scenario runner: scenario JSON (or a Tiled map) in, result JSON out.
//!
//! Usage:
//!   sk-cli --scenario path/to/scenario.json \
//!          [--pack path/to/pack.json]... \
//!          [--models path/to/effect_models.json] \
//!          [--seed N] [--compact]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use serde_json::Value;

use sk_data::effect_model::EffectModelCatalog;
use sk_data::pack::ContentPack;
use sk_engine::orchestrator::run_scenario;
use sk_engine::scenario::{validate_doc, validate_scenario, ScenarioDoc};
use sk_engine::tiled::ingest_tiled_map;

struct Args {
    scenario: PathBuf,
    packs: Vec<PathBuf>,
    models: Option<PathBuf>,
    seed: Option<u32>,
    compact: bool,
}

fn parse_args() -> Result<Args, String> {
    let argv: Vec<String> = env::args().collect();
    let mut scenario = None;
    let mut packs = Vec::new();
    let mut models = None;
    let mut seed = None;
    let mut compact = false;

    let mut i = 1;
    while i < argv.len() {
        match argv[i].as_str() {
            "--scenario" | "-s" => {
                i += 1;
                scenario = Some(PathBuf::from(
                    argv.get(i).ok_or("--scenario needs a path")?,
                ));
            }
            "--pack" | "-p" => {
                i += 1;
                packs.push(PathBuf::from(argv.get(i).ok_or("--pack needs a path")?));
            }
            "--models" | "-m" => {
                i += 1;
                models = Some(PathBuf::from(argv.get(i).ok_or("--models needs a path")?));
            }
            "--seed" => {
                i += 1;
                let raw = argv.get(i).ok_or("--seed needs a value")?;
                seed = Some(raw.parse().map_err(|_| format!("bad seed {raw:?}"))?);
            }
            "--compact" => compact = true,
            other => return Err(format!("unknown argument {other:?}")),
        }
        i += 1;
    }

    Ok(Args {
        scenario: scenario.ok_or("--scenario is required")?,
        packs,
        models,
        seed,
        compact,
    })
}

fn load_scenario(path: &Path) -> Result<ScenarioDoc, String> {
    let text = fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
    let value: Value = serde_json::from_str(&text).map_err(|e| e.to_string())?;

    // Tiled maps carry a layers array; plain scenarios do not.
    if value.get("layers").is_some() {
        let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let resolver = move |source: &str| -> Result<Value, String> {
            let tileset_path = base.join(source);
            let text = fs::read_to_string(&tileset_path)
                .map_err(|e| format!("{}: {e}", tileset_path.display()))?;
            serde_json::from_str(&text).map_err(|e| e.to_string())
        };
        let doc = ingest_tiled_map(&value, &resolver).map_err(|e| e.to_string())?;
        validate_doc(&doc).map_err(|e| e.to_string())?;
        Ok(doc)
    } else {
        validate_scenario(&text).map_err(|e| e.to_string())
    }
}

fn run() -> Result<String, String> {
    let args = parse_args()?;

    let mut doc = load_scenario(&args.scenario)?;
    if let Some(seed) = args.seed {
        doc.seed = seed;
    }

    // Packs named by the scenario resolve relative to the scenario file;
    // --pack paths are taken as given.
    let scenario_dir = args.scenario.parent().map(Path::to_path_buf).unwrap_or_default();
    let pack_paths: Vec<PathBuf> = doc
        .content_packs
        .iter()
        .map(|p| scenario_dir.join(p))
        .chain(args.packs.iter().cloned())
        .collect();

    let mut packs = Vec::new();
    for path in &pack_paths {
        let text = fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
        packs.push(ContentPack::from_json(&text).map_err(|e| e.to_string())?);
    }

    let catalog = match &args.models {
        Some(path) => {
            let text = fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
            EffectModelCatalog::from_json(&text).map_err(|e| e.to_string())?
        }
        None => EffectModelCatalog::empty(),
    };

    let result = run_scenario(&doc, &packs, &catalog).map_err(|e| e.to_string())?;
    let rendered = if args.compact {
        serde_json::to_string(&result)
    } else {
        serde_json::to_string_pretty(&result)
    };
    rendered.map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    match run() {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}
