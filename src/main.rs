use clap::{Parser, Subcommand};
use engine_airdrop::config;
use engine_airdrop::executor::FixedBackoff;
use engine_airdrop::ledger::RunLedger;
use engine_airdrop::planner::RunMode;
use engine_airdrop::rpc::{ContractsApi, RpcClient};
use engine_airdrop::runner::{self, AirdropRequest};
use engine_airdrop::snapshot::EntryOrder;
use engine_airdrop::wallet::SignerConnector;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[clap(name = "engine-airdrop", about = "Token holder snapshots and airdrops for sidechain tokens")]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Snapshot every holder of a token.
    Snapshot {
        #[clap(long, short, help = "token symbol to snapshot")]
        symbol: String,

        #[clap(long, short, help = "order accounts by balance (largest first) instead of alphabetically")]
        order: bool,

        #[clap(long, help = "write the snapshot here instead of stdout")]
        output: Option<PathBuf>,
    },
    /// Pay an airdrop proportional to a snapshot file.
    Airdrop {
        #[clap(long, short, help = "dry run: validate and log, send nothing")]
        mock: bool,

        #[clap(long, short, help = "snapshot file to process")]
        input: PathBuf,

        #[clap(long, short, help = "account to send tokens from")]
        account: String,

        #[clap(long, help = "snapshot symbol, for files without a header line")]
        symbol: Option<String>,

        #[clap(long, help = "token to pay out (defaults to the snapshot symbol)")]
        send_symbol: Option<String>,

        #[clap(long, help = "transfer memo")]
        memo: Option<String>,
    },
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // Logs go to stderr so a snapshot on stdout stays clean.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cfg = config::load()?;
    let api: Arc<dyn ContractsApi> = Arc::new(RpcClient::new(&cfg.rpc)?);

    match cli.command {
        Command::Snapshot {
            symbol,
            order,
            output,
        } => {
            let order = if order {
                EntryOrder::BalanceDesc
            } else {
                EntryOrder::Account
            };
            let report = runner::take_snapshot(&cfg.snapshot, api, &symbol, order).await?;

            for gap in &report.aggregation.gaps {
                warn!(
                    "INCOMPLETE: {} could not be read past offset {} ({})",
                    gap.source, gap.offset, gap.reason
                );
            }

            match output {
                Some(path) => {
                    std::fs::write(&path, &report.text)?;
                    info!("Snapshot written to {}", path.display());
                }
                None => print!("{}", report.text),
            }
        }
        Command::Airdrop {
            mock,
            input,
            account,
            symbol,
            send_symbol,
            memo,
        } => {
            let req = AirdropRequest {
                input,
                account,
                mode: if mock { RunMode::Simulation } else { RunMode::Live },
                symbol,
                send_symbol,
                memo,
            };
            let ledger = RunLedger::create(Path::new(&cfg.airdrop.audit_log))?;
            let connector = SignerConnector::new(cfg.wallet.clone(), Arc::clone(&api));
            let policy = FixedBackoff::from_config(&cfg.airdrop);

            let summary =
                runner::run_airdrop(&cfg.airdrop, api.as_ref(), &connector, &policy, &req, ledger).await?;
            info!("run summary: {}", serde_json::to_string(&summary)?);
            if !summary.all_succeeded() {
                error!(
                    "{} transfers need a manual re-send: {:?}",
                    summary.failed, summary.failed_accounts
                );
            }
        }
    }

    Ok(())
}
