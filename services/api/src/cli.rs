use crate::demo::{run_demo, run_rankings, run_recalculate, run_view, DemoArgs};
use crate::infra::{parse_timestamp, SeedArgs};
use crate::server;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use innovation_index::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Municipal Innovation Index",
    about = "Score, rank, and drill into the Municipal Innovation Index from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Recalculate one municipality (or all active ones) and print the outcome
    Recalculate(RecalculateArgs),
    /// Print the drill-down view for a municipality
    View(ViewArgs),
    /// Print the national ranking, optionally narrowed to one region
    Rankings(RankingsArgs),
    /// Walk through recalculation, ranking, and drill-down on the sample dataset
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    #[command(flatten)]
    pub(crate) seed: SeedArgs,
}

#[derive(Args, Debug)]
pub(crate) struct RecalculateArgs {
    /// Municipality identifier to recalculate
    #[arg(long, required_unless_present = "all")]
    pub(crate) municipality: Option<String>,
    /// Recalculate every active municipality instead of a single one
    #[arg(long, conflicts_with = "municipality")]
    pub(crate) all: bool,
    /// As-of timestamp (RFC 3339). Defaults to now.
    #[arg(long, value_parser = parse_timestamp)]
    pub(crate) as_of: Option<DateTime<Utc>>,
    #[command(flatten)]
    pub(crate) seed: SeedArgs,
}

#[derive(Args, Debug)]
pub(crate) struct ViewArgs {
    /// Municipality identifier to inspect
    #[arg(long)]
    pub(crate) municipality: String,
    /// Print the raw JSON payload instead of the text summary
    #[arg(long)]
    pub(crate) json: bool,
    #[command(flatten)]
    pub(crate) seed: SeedArgs,
}

#[derive(Args, Debug, Default)]
pub(crate) struct RankingsArgs {
    /// Only list municipalities in this region; ranks stay national
    #[arg(long)]
    pub(crate) region: Option<String>,
    /// Recalculate every active municipality before ranking
    #[arg(long)]
    pub(crate) refresh: bool,
    #[command(flatten)]
    pub(crate) seed: SeedArgs,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Recalculate(args) => run_recalculate(args).await,
        Command::View(args) => run_view(args).await,
        Command::Rankings(args) => run_rankings(args).await,
        Command::Demo(args) => run_demo(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definitions_are_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn recalculate_requires_a_target() {
        let err = Cli::try_parse_from(["mii", "recalculate"]).expect_err("target required");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);

        let cli = Cli::try_parse_from(["mii", "recalculate", "--all"]).expect("all is enough");
        assert!(matches!(
            cli.command,
            Some(Command::Recalculate(RecalculateArgs { all: true, .. }))
        ));
    }

    #[test]
    fn seed_flag_is_shared_across_commands() {
        let cli = Cli::try_parse_from([
            "mii",
            "view",
            "--municipality",
            "riyadh",
            "--seed",
            "fixtures/seed.json",
        ])
        .expect("view parses");
        match cli.command {
            Some(Command::View(args)) => {
                assert_eq!(args.municipality, "riyadh");
                assert_eq!(
                    args.seed.seed.as_deref(),
                    Some(std::path::Path::new("fixtures/seed.json"))
                );
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
