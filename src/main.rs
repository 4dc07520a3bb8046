use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tenantgate::cli::{
    AdminCommands, SshCommands, UsageCommands, run_init, run_seed, run_serve, run_ssh_keys,
    run_ssh_serv, run_usage_drain, run_usage_reconcile, run_usage_sweep,
};
use tenantgate::config::Settings;

#[derive(Parser)]
#[command(name = "tenantgate")]
#[command(about = "Tenant-scoped authorization and usage accounting for a git host", long_about = None)]
struct Cli {
    /// Settings file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory for database and repositories
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Administrative commands
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },

    /// Start the server
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Usage pipeline maintenance
    Usage {
        #[command(subcommand)]
        command: UsageCommands,
    },

    /// OpenSSH daemon integration
    Ssh {
        #[command(subcommand)]
        command: SshCommands,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries git protocol data under `ssh serv`.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("tenantgate=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut settings = Settings::load_or_default(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        settings.server.data_dir = data_dir;
    }

    match cli.command {
        Commands::Admin { command } => match command {
            AdminCommands::Init { non_interactive } => run_init(&settings, non_interactive)?,
            AdminCommands::Seed => run_seed(&settings)?,
        },
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                settings.server.host = host;
            }
            if let Some(port) = port {
                settings.server.port = port;
            }
            run_serve(settings).await?;
        }
        Commands::Usage { command } => match command {
            UsageCommands::Drain => run_usage_drain(&settings)?,
            UsageCommands::Reconcile => run_usage_reconcile(&settings)?,
            UsageCommands::Sweep { older_than } => run_usage_sweep(&settings, older_than)?,
        },
        Commands::Ssh { command } => match command {
            SshCommands::Keys {
                user,
                key_type,
                key,
            } => run_ssh_keys(&settings, cli.config.as_deref(), &user, &key_type, &key)?,
            SshCommands::Serv { key } => {
                let code = run_ssh_serv(&settings, &key).await?;
                std::process::exit(code);
            }
        },
    }

    Ok(())
}
