use anyhow::Result;
use clap::Parser;
use meetbridge::{
    app::{self, Components},
    cli::{handle_poll_command, handle_process_command, handle_sessions_command, Cli, CliCommand},
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    if let Some(CliCommand::Version) = cli.command {
        println!("meetbridge {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = app::load_config(cli.config.as_deref())?;

    match cli.command {
        None | Some(CliCommand::Serve) => app::run_service(config).await,
        Some(CliCommand::Version) => Ok(()),
        Some(command) => {
            let components = Components::build(config)?;
            let result = match command {
                CliCommand::Process(args) => handle_process_command(&components, args).await,
                CliCommand::Poll(args) => handle_poll_command(&components, args).await,
                CliCommand::Sessions(args) => handle_sessions_command(&components, args),
                CliCommand::Serve | CliCommand::Version => Ok(()),
            };
            components.shutdown();
            result
        }
    }
}
