use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use assassin::{
    app::Application, config::Config, services::MonitorOutcome, task_handlers::HandlerRegistry,
};

#[derive(Parser)]
#[command(name = "assassin")]
#[command(version)]
#[command(about = "Multi-instance cron/interval scheduler with exactly-one execution per task")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Listening IP address of the admin API
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port of the admin API
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Database URL (overrides config file)
    #[arg(short = 'd', long, value_name = "URL")]
    database_url: Option<String>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Clone, Copy, Debug)]
enum Command {
    /// Run the scheduler (default)
    Run,
    /// Reset permits orphaned by hard-terminated processes, then exit
    Recover,
    /// Run one overdue monitor pass, then exit
    Monitor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = format!("assassin={}", cli.log_level);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| log_filter.into());
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }

    info!("Starting assassin v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load_from_file(&cli.config)?;
    info!("Configuration loaded from: {}", cli.config);

    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }
    if let Some(database_url) = cli.database_url {
        config.database.url = database_url;
    }

    let app = Application::build(config, HandlerRegistry::with_builtin()).await?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => app.run().await,
        Command::Recover => {
            let reset = app.recovery().run().await?;
            info!("Recovery sweep reset {} task(s) to ready", reset);
            Ok(())
        }
        Command::Monitor => {
            match app.monitor().run().await? {
                MonitorOutcome::Skipped => info!("Monitor window owned by a peer, skipped"),
                MonitorOutcome::Clean => info!("No overdue tasks"),
                MonitorOutcome::Alerted { count, delivered } => {
                    info!("Reported {} overdue task(s), delivered: {}", count, delivered)
                }
            }
            Ok(())
        }
    }
}
