use std::io::Read;
use std::path::Path;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use sniprun::Engine;
use sniprun::config::{CliArgs, CliCommand};
use sniprun::probe::{PROBE_TIMEOUT, probe_interpreters};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let config = cli.to_config().context("Failed to load configuration")?;
    let engine = Engine::new(&config).context("Invalid configuration")?;

    match cli.command {
        CliCommand::Run {
            language,
            code,
            file,
            pretty,
        } => {
            let code = match code {
                Some(code) => code,
                None => read_source(file.as_deref())?,
            };

            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::info!("Ctrl-c received, cancelling execution...");
                    ctrl_c.cancel();
                }
            });

            let result = engine.execute_with_cancel(&code, &language, &cancel).await;
            let report = result.to_report();
            let json = if pretty {
                serde_json::to_string_pretty(&report)?
            } else {
                serde_json::to_string(&report)?
            };
            println!("{json}");

            Ok(if result.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        CliCommand::Languages => {
            for id in engine.registry().ids() {
                println!("{id}");
            }
            Ok(ExitCode::SUCCESS)
        }
        CliCommand::Check => {
            let statuses = probe_interpreters(engine.registry(), PROBE_TIMEOUT).await;
            println!("{}", serde_json::to_string_pretty(&statuses)?);
            Ok(if statuses.iter().all(|s| s.available) {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

/// Reads the snippet from `path`, or from stdin when absent or `-`
fn read_source(path: Option<&Path>) -> anyhow::Result<String> {
    match path {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        _ => {
            let mut code = String::new();
            std::io::stdin()
                .read_to_string(&mut code)
                .context("Failed to read snippet from stdin")?;
            Ok(code)
        }
    }
}
