//! rete CLI: replay fact scripts against the catalog networks.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use miette::{IntoDiagnostic, Result};
use serde::Deserialize;

use rete_engine::catalog;
use rete_engine::config::SessionConfig;
use rete_engine::fact::{Fact, FactId};
use rete_engine::network::Network;
use rete_engine::rule::{ActionResult, Match};
use rete_engine::session::{ActionContext, Session};

#[derive(Parser)]
#[command(name = "rete", version, about = "Incremental rule matching engine")]
struct Cli {
    /// Session config (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON script of fact operations against a catalog network.
    Replay {
        #[arg(long, value_enum)]
        network: NetworkKind,

        /// Path to a JSON array of steps, e.g. `[{"op": "insert", "fact": {...}}, {"op": "fire"}]`.
        #[arg(long)]
        script: PathBuf,

        /// Print per-node memory sizes after the last step.
        #[arg(long)]
        stats: bool,
    },

    /// Print the topology of a catalog network in Graphviz DOT format.
    Topology {
        #[arg(long, value_enum)]
        network: NetworkKind,
    },

    /// Session config management.
    Config {
        /// Write the default config to this path.
        #[arg(long)]
        write: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum NetworkKind {
    /// Groups of valid FactType1 facts with more than one member.
    Grouping,
    /// Valid FactType1 facts not referenced by valid FactType2/FactType3 facts.
    Negation,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Step {
    Insert { fact: Fact },
    InsertAll { facts: Vec<Fact> },
    Update { fact: Fact },
    UpdateAll { facts: Vec<Fact> },
    Retract { id: FactId },
    RetractAll { ids: Vec<FactId> },
    Fire,
}

fn print_match(_: &mut ActionContext<'_>, m: &Match) -> ActionResult {
    println!("{}", serde_json::to_string(m)?);
    Ok(())
}

fn build(kind: NetworkKind) -> Result<Network> {
    let network = match kind {
        NetworkKind::Grouping => catalog::grouping(print_match)?,
        NetworkKind::Negation => catalog::negation(print_match)?,
    };
    Ok(network)
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Replay {
            network,
            script,
            stats,
        } => {
            let config = match &cli.config {
                Some(path) => SessionConfig::load(path)?,
                None => SessionConfig::default(),
            };
            let content = std::fs::read_to_string(&script).into_diagnostic()?;
            let steps: Vec<Step> = serde_json::from_str(&content).into_diagnostic()?;

            let mut session = Session::new(build(network)?, config)?;
            let mut total = 0;
            for step in steps {
                tracing::debug!(?step, "replay step");
                match step {
                    Step::Insert { fact } => session.insert(fact)?,
                    Step::InsertAll { facts } => session.insert_all(facts)?,
                    Step::Update { fact } => session.update(fact)?,
                    Step::UpdateAll { facts } => session.update_all(facts)?,
                    Step::Retract { id } => {
                        session.retract(id)?;
                    }
                    Step::RetractAll { ids } => {
                        session.retract_all(ids)?;
                    }
                    Step::Fire => total += session.fire()?,
                }
            }
            println!(
                "Fired {total} activation(s); {} fact(s) in session, {} pending.",
                session.facts().count(),
                session.agenda_len()
            );
            if stats {
                let json = serde_json::to_string_pretty(&session.stats()).into_diagnostic()?;
                println!("{json}");
            }
        }

        Commands::Topology { network } => {
            print!("{}", build(network)?.to_dot());
        }

        Commands::Config { write } => {
            SessionConfig::default().save(&write)?;
            println!("Wrote default session config to {}", write.display());
        }
    }

    Ok(())
}
