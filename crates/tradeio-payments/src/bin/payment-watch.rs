// ============================================================================
// payment-watch - follow an account's payments
// ============================================================================
// Network comes from STELLAR_NETWORK / HORIZON_URL / FRIENDBOT_URL /
// STELLAR_PASSPHRASE.
// ============================================================================

use clap::builder::BoolishValueParser;
use clap::Parser;
use tradeio_payments::{Cursor, PaymentClient, PaymentError, StellarConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Follow a Stellar account's payments as they land.
#[derive(Parser, Debug)]
#[command(name = "payment-watch", version, about = "Follow a Stellar account's payments")]
struct Cli {
    /// Account to watch (G... address)
    address: String,

    /// Paging token to resume after; defaults to "now"
    cursor: Option<String>,

    /// Fund the account through friendbot before watching
    #[arg(long, env = "FUND_ACCOUNT", value_parser = BoolishValueParser::new())]
    fund: bool,
}

#[tokio::main]
async fn main() -> Result<(), PaymentError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tradeio_payments=debug,payment_watch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let address = cli.address;
    let cursor = cli.cursor.as_deref().map_or(Cursor::Now, Cursor::from);

    let config = StellarConfig::from_env()?;
    tracing::info!("Watching {} on {:?} via {}", address, config.network, config.horizon_url);

    let client = PaymentClient::new(config)?;

    if cli.fund {
        client.fund(&address).await?;
    }

    let account = client.fetch_account(&address).await?;
    tracing::info!(
        "Account {} at sequence {} with {} signer(s)",
        account.address, account.sequence, account.signers.len()
    );

    let mut stream = client.watch_payments(&address, cursor).await?;
    while let Some(item) = stream.next_event().await {
        match item {
            Ok(event) => {
                let direction = if event.is_deposit_to(&address) { "deposit" } else { "payment" };
                tracing::info!(
                    "[ledger {}] {} {} {} from {} to {} (tx {})",
                    event.ledger,
                    direction,
                    event.amount,
                    event.asset.canonical(),
                    event.from,
                    event.to,
                    event.transaction_hash
                );
            }
            Err(e @ PaymentError::UndecodableRecord { .. }) => {
                tracing::warn!("{}", e);
            }
            Err(e) => {
                tracing::error!("Stream stopped: {}", e);
                stream.close().await;
                return Err(e);
            }
        }
    }

    stream.close().await;
    Ok(())
}
