//! Indeterminate broadcast outcomes and their later resolution

mod common;

use common::*;
use indexer_mock::BroadcastMode;
use ordwallet::{Resolution, WalletError};

#[tokio::test]
async fn test_lost_reply_resolves_as_applied() -> anyhow::Result<()> {
    let env = TestEnvironment::new().await?;
    env.fund_payment(10_000).await?;

    env.set_broadcast_mode(BroadcastMode::Lost).await;
    let result = env.wallet.send_payment(OTHER_ADDRESS, 3_000).await;
    assert!(matches!(result, Err(WalletError::Indeterminate(_))));

    // Inputs stay held, ledger unchanged
    let pending = env.wallet.pending_broadcasts()?;
    assert_eq!(pending.len(), 1);
    assert_eq!(env.wallet.balance()?, 10_000);
    assert!(matches!(
        env.wallet.send_payment(OTHER_ADDRESS, 1_000).await,
        Err(WalletError::InsufficientFunds(_))
    ));

    let resolved = env.wallet.resolve_pending().await?;
    assert_eq!(resolved, vec![(pending[0], Resolution::Applied)]);
    assert!(env.wallet.pending_broadcasts()?.is_empty());
    assert_eq!(env.wallet.balance()?, 6_850);
    assert!(env.wallet.ledger().is_applied(&pending[0])?);

    Ok(())
}

#[tokio::test]
async fn test_dropped_broadcast_resolves_as_released() -> anyhow::Result<()> {
    let env = TestEnvironment::new().await?;
    env.fund_payment(10_000).await?;

    env.set_broadcast_mode(BroadcastMode::Drop).await;
    assert!(matches!(
        env.wallet.send_payment(OTHER_ADDRESS, 3_000).await,
        Err(WalletError::Indeterminate(_))
    ));

    let resolved = env.wallet.resolve_pending().await?;
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].1, Resolution::Released);
    assert_eq!(env.wallet.balance()?, 10_000);

    // Released inputs can be spent again
    env.set_broadcast_mode(BroadcastMode::Accept).await;
    env.wallet.send_payment(OTHER_ADDRESS, 3_000).await?;
    assert_eq!(env.wallet.balance()?, 6_850);

    Ok(())
}

#[tokio::test]
async fn test_unanswered_broadcast_times_out_as_indeterminate() -> anyhow::Result<()> {
    let env = TestEnvironment::new().await?;
    env.fund_payment(10_000).await?;

    env.set_broadcast_mode(BroadcastMode::Hang).await;
    let started = std::time::Instant::now();
    assert!(matches!(
        env.wallet.send_payment(OTHER_ADDRESS, 3_000).await,
        Err(WalletError::Indeterminate(_))
    ));
    assert!(started.elapsed() < env.config.network_timeout * 3);
    assert_eq!(env.wallet.pending_broadcasts()?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_unreachable_indexer_is_a_network_error() -> anyhow::Result<()> {
    let env = TestEnvironment::new().await?;
    env.fund_payment(10_000).await?;

    let offline = ordwallet::Wallet::new(
        ordwallet::WalletConfig {
            // Nothing listens on the discard port
            indexer_url: "http://127.0.0.1:9".into(),
            ..env.config.clone()
        },
        std::sync::Arc::new(ordwallet::MemoryStore::new()),
        env.clock.clone(),
        std::sync::Arc::new(ordwallet::HttpIndexer::new("http://127.0.0.1:9", env.config.network_timeout)?),
        std::sync::Arc::new(ordwallet::HttpIndexer::new("http://127.0.0.1:9", env.config.network_timeout)?),
    )?;
    offline.restore(TEST_MNEMONIC, PASSWORD)?;

    assert!(matches!(
        offline.refresh_payments().await,
        Err(WalletError::Network(_))
    ));
    assert_eq!(offline.balance()?, 0);

    Ok(())
}
