use anyhow::{anyhow, Context, Result};
use clap::Parser;
use fastharvest::{run_harvest, Cli, RunReport};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let report_json = cli.report_json;
    let report = harvest(cli)?;

    if report_json {
        let json = serde_json::to_string_pretty(&report).context("serialize run report")?;
        println!("{json}");
    } else {
        report.print();
    }
    Ok(())
}

fn harvest(cli: Cli) -> Result<RunReport> {
    run_harvest(cli).map_err(|err| anyhow!(err))
}
