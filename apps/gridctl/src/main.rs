use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gridlink_connection::{ConnectionManager, Credential, TcpConnector};
use gridlink_protocol::{AccountIdentity, AuthScheme, ClientConfig, SslNegotiationPolicy};
use gridlink_transfer::{ParallelTransferCoordinator, TransferHandle, TransferRequest};

/// Environment variable holding the account password.
const PASSWORD_ENV: &str = "GRIDLINK_PASSWORD";

#[derive(Parser)]
#[command(name = "gridctl")]
#[command(version, about = "Move files to and from a gridlink storage server", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the platform config dir)
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Server host name
    #[arg(long, global = true, default_value = "localhost")]
    host: String,

    /// Server port
    #[arg(long, global = true, default_value_t = 1247)]
    port: u16,

    /// User name
    #[arg(short, long, global = true, default_value = "rods")]
    user: String,

    /// Zone name
    #[arg(short, long, global = true, default_value = "tempZone")]
    zone: String,

    /// Authentication scheme
    #[arg(long, value_enum, global = true, default_value = "standard")]
    scheme: SchemeArg,

    /// Override the SSL negotiation policy from the config file
    #[arg(long, value_enum, global = true)]
    ssl: Option<SslArg>,

    /// Override the maximum number of parallel streams
    #[arg(long, global = true)]
    streams: Option<u32>,

    /// Compare the server checksum with the local file after the transfer
    #[arg(long, global = true)]
    verify: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and check that the session answers
    Ping,
    /// Upload a local file
    Put {
        local: PathBuf,
        logical_path: String,
    },
    /// Download an object
    Get {
        logical_path: String,
        local: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SchemeArg {
    Standard,
    Pam,
    Otp,
}

impl From<SchemeArg> for AuthScheme {
    fn from(arg: SchemeArg) -> Self {
        match arg {
            SchemeArg::Standard => AuthScheme::Standard,
            SchemeArg::Pam => AuthScheme::Pam,
            SchemeArg::Otp => AuthScheme::OneTimePassword,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SslArg {
    Require,
    DontCare,
    Refuse,
}

impl From<SslArg> for SslNegotiationPolicy {
    fn from(arg: SslArg) -> Self {
        match arg {
            SslArg::Require => SslNegotiationPolicy::Require,
            SslArg::DontCare => SslNegotiationPolicy::DontCare,
            SslArg::Refuse => SslNegotiationPolicy::Refuse,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let password = std::env::var(PASSWORD_ENV)
        .with_context(|| format!("{PASSWORD_ENV} is not set"))?;

    let account = AccountIdentity::new(&cli.host, cli.port, &cli.user, &cli.zone)
        .with_auth_scheme(cli.scheme.into());
    let manager = Arc::new(ConnectionManager::new(config, Arc::new(TcpConnector)));
    manager.register_account(&account, Credential::new(password));

    let result = run(&cli.command, &manager, account).await;
    manager.shutdown().await;
    result
}

fn load_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ClientConfig::load_or_default()?,
    };

    if let Some(ssl) = cli.ssl {
        config.pipeline.ssl_policy = ssl.into();
    }
    if let Some(streams) = cli.streams {
        config.pipeline.max_parallel_streams = streams;
    }
    if cli.verify {
        config.pipeline.verify_checksum = true;
    }
    config.validate()?;
    Ok(config)
}

async fn run(
    command: &Command,
    manager: &Arc<ConnectionManager>,
    account: AccountIdentity,
) -> anyhow::Result<()> {
    let request = match command {
        Command::Ping => {
            let mut conn = manager.borrow(&account).await?;
            conn.ping().await?;
            conn.release().await;
            info!(%account, "server answered");
            return Ok(());
        }
        Command::Put {
            local,
            logical_path,
        } => TransferRequest::put(account, local, logical_path.as_str()),
        Command::Get {
            logical_path,
            local,
        } => TransferRequest::get(account, logical_path.as_str(), local),
    };

    let coordinator = ParallelTransferCoordinator::pooled(Arc::clone(manager));
    let handle = coordinator.submit_transfer(request)?;
    cancel_on_interrupt(&coordinator, &handle);
    report_progress(&handle);

    let summary = handle.wait().await?;
    info!(
        bytes = summary.bytes_transferred,
        streams = summary.streams.len(),
        outcome = ?summary.outcome,
        checksum = summary.checksum.as_deref().unwrap_or("-"),
        "transfer finished"
    );
    if summary.bytes_transferred != summary.total_bytes {
        bail!(
            "moved {} of {} bytes",
            summary.bytes_transferred,
            summary.total_bytes
        );
    }
    Ok(())
}

fn cancel_on_interrupt(coordinator: &ParallelTransferCoordinator, handle: &TransferHandle) {
    let coordinator = coordinator.clone();
    let attempt_id = handle.attempt_id().to_string();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(attempt = %attempt_id, "interrupted, cancelling");
            coordinator.cancel(&attempt_id);
        }
    });
}

fn report_progress(handle: &TransferHandle) {
    let mut status = handle.status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let snapshot = status.borrow_and_update().clone();
            info!(
                state = ?snapshot.current_state,
                percent = %format!("{:.1}", snapshot.percentage()),
                bytes_per_second = snapshot.bytes_per_second as u64,
                "progress"
            );
            if snapshot.current_state.is_terminal() {
                break;
            }
        }
    });
}
