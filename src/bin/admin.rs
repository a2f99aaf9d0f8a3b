// Switchboard admin CLI
// Operator tooling: validate definition trees and inspect registry checksums

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use dotenv::dotenv;
use tracing_subscriber::EnvFilter;

use switchboard::config::Settings;
use switchboard::definitions::loader::DefinitionLoader;
use switchboard::definitions::registry::Snapshot;
use switchboard::definitions::validator::validate_definitions;
use switchboard::openapi::OpenApiIndex;

#[derive(Parser, Debug)]
#[command(name = "switchboard-admin", about = "Switchboard operator tooling")]
struct Args {
    /// Configuration file; SWITCHBOARD_* env vars override
    #[arg(long, env = "SWITCHBOARD_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate every definition against the service contracts
    Validate,
    /// Print the aggregate checksum of the current definition tree
    Checksum,
}

fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let args = Args::parse();
    let settings = Settings::load(args.config.as_deref()).context("loading configuration")?;

    let loader = DefinitionLoader::new(settings.definitions.dirs.clone());
    let definitions = loader.load_all().context("loading definitions")?;

    match args.command {
        Command::Validate => {
            let sources: Vec<_> = settings.services.iter().map(|s| s.spec_source()).collect();
            let index = OpenApiIndex::load(&sources).context("loading service specs")?;

            let errors = validate_definitions(&definitions, &index);
            if errors.is_empty() {
                println!(
                    "{} {} definition(s) valid against {} indexed operation(s)",
                    "ok:".green().bold(),
                    definitions.len(),
                    index.len()
                );
                return Ok(());
            }

            for err in &errors {
                println!(
                    "{} {} {}: {}",
                    format!("[{}]", err.code.as_str()).red().bold(),
                    err.domain.cyan(),
                    err.location.yellow(),
                    err.message
                );
            }
            anyhow::bail!("{} validation error(s)", errors.len());
        }
        Command::Checksum => {
            let snapshot = Snapshot::build(definitions);
            println!("{}", snapshot.checksum());
            Ok(())
        }
    }
}
