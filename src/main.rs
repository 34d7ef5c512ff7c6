use std::{env, fs, path::PathBuf};

use anyhow::{Context, bail};
use ml_core::Model;
use orchestrator::{RawConfig, compile_config, logging, providers::synthetic_checkpoint};
use server::initialization::save_checkpoint;

const USAGE: &str = "usage: fedtta <config.json> [--seed <n>] [--init-checkpoint]";

struct Args {
    config: PathBuf,
    seed: Option<u64>,
    init_checkpoint: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = env::args().skip(1);
    let mut config = None;
    let mut seed = None;
    let mut init_checkpoint = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--seed" => {
                let value = args.next().context(USAGE)?;
                seed = Some(value.parse().with_context(|| format!("invalid seed `{value}`"))?);
            }
            "--init-checkpoint" => init_checkpoint = true,
            _ if config.is_none() => config = Some(PathBuf::from(&arg)),
            _ => bail!(USAGE),
        }
    }

    Ok(Args {
        config: config.context(USAGE)?,
        seed,
        init_checkpoint,
    })
}

fn main() -> anyhow::Result<()> {
    let args = parse_args()?;

    let text = fs::read_to_string(&args.config)
        .with_context(|| format!("cannot read {}", args.config.display()))?;
    let raw: RawConfig = serde_json::from_str(&text)
        .with_context(|| format!("cannot parse {}", args.config.display()))?;

    let config = compile_config(raw, args.seed)?;
    logging::init(&config.logging_path)?;

    if args.init_checkpoint {
        // Writes the source model of a synthetic benchmark.
        let model = synthetic_checkpoint(&config.data)?;
        if let Some(parent) = config.model_path.parent() {
            fs::create_dir_all(parent)?;
        }
        save_checkpoint(&config.model_path, &model.state_dict(), config.checkpoint_layout)?;
        log::info!("wrote source checkpoint {}", config.model_path.display());
    }

    let outcome = orchestrator::run(config)?;

    println!("{}", outcome.table);
    println!("aggregations: {}", outcome.aggregations);
    Ok(())
}
