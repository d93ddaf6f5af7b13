use std::io;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use ledger_eng::config::Config;
use ledger_eng::csv::{read_accounts, read_transfers, write_accounts, write_history};
use ledger_eng::{Engine, LedgerStore, MemoryStore, SqliteStore};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .with_writer(io::stderr)
        .init();

    let config = Config::parse();

    if config.transfers.extension().is_none_or(|ext| ext != "csv") {
        warn!(path = %config.transfers.display(), "input file seems to not be a csv file");
    }

    match &config.database {
        Some(path) => {
            let store = SqliteStore::open(path)
                .with_context(|| format!("opening ledger database {}", path.display()))?;
            serve(store, config).await
        }
        None => serve(MemoryStore::new(), config).await,
    }
}

async fn serve<S: LedgerStore + 'static>(store: S, config: Config) -> anyhow::Result<()> {
    if let Some(path) = &config.accounts {
        for result in read_accounts(path)? {
            match result {
                Ok(account) => match store.open_account(account) {
                    Ok(account) => debug!(id = account.id, number = %account.account_number, "account opened"),
                    Err(e) => warn!("{e}"),
                },
                Err(e) => warn!("{e}"),
            }
        }
    }

    let engine = Arc::new(Engine::new(store));
    let (order_sender, order_receiver) = tokio::sync::mpsc::channel(16);
    let orders = read_transfers(config.transfers.clone())?;

    tokio::spawn(async move {
        for result in orders {
            match result {
                Ok(order) => {
                    if order_sender.send(order).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    let summary = Arc::clone(&engine)
        .run(ReceiverStream::new(order_receiver))
        .await;
    info!(
        completed = summary.completed,
        rejected = summary.rejected,
        failed = summary.failed,
        "transfers processed"
    );

    let stdout = io::stdout();
    match config.history {
        Some(user) => write_history(stdout.lock(), &engine.history().user_history(user)?)?,
        None => write_accounts(stdout.lock(), &engine.store().list_accounts()?)?,
    }
    Ok(())
}
