use crate::demo::{run_demo, run_sweep, DemoArgs, SweepArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use event_staffing::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Event Staffing",
    about = "Run and demonstrate recurring ATC event staffing from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service and the periodic sweep (default command)
    Serve(ServeArgs),
    /// Run one deadline sweep over seeded demo data and print the report
    Sweep(SweepArgs),
    /// Seed a pattern, sign controllers up, and walk through status, feasibility, and a sweep
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
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Sweep(args) => run_sweep(args).await,
        Command::Demo(args) => run_demo(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_accepts_rfc3339_instant() {
        let cli = Cli::try_parse_from(["event-staffing-api", "sweep", "--at", "2025-03-06T19:00:00Z"])
            .expect("arguments parse");
        match cli.command {
            Some(Command::Sweep(args)) => assert!(args.at.is_some()),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn sweep_rejects_malformed_instant() {
        assert!(Cli::try_parse_from(["event-staffing-api", "sweep", "--at", "tomorrow"]).is_err());
    }

    #[test]
    fn serve_is_the_default() {
        let cli = Cli::try_parse_from(["event-staffing-api"]).expect("arguments parse");
        assert!(cli.command.is_none());
    }
}
