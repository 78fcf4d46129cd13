//! Session lock behaviour of the full wallet: inactivity timeout, restart
//! and wallet lifecycle.

mod common;

use common::*;
use ordwallet::{OsEntropy, WalletError};
use std::time::Duration;

#[tokio::test]
async fn test_inactivity_locks_wallet() -> anyhow::Result<()> {
    let env = TestEnvironment::new().await?;
    env.fund_payment(10_000).await?;

    // Exactly at the limit the session is still open
    env.clock.advance(INACTIVITY_LIMIT);
    assert!(!env.wallet.session_state()?.locked);
    env.wallet.addresses()?;

    // The access above counted as activity
    env.clock.advance(INACTIVITY_LIMIT + Duration::from_millis(1));
    assert!(env.wallet.session_state()?.locked);
    assert!(env.wallet.check_lock()?);
    assert!(!env.wallet.check_lock()?);

    assert!(matches!(env.wallet.addresses(), Err(WalletError::LockedWallet)));
    assert!(matches!(
        env.wallet.send_payment(OTHER_ADDRESS, 3_000).await,
        Err(WalletError::LockedWallet)
    ));

    env.wallet.unlock(PASSWORD)?;
    env.wallet.refresh_payments().await?;
    env.wallet.send_payment(OTHER_ADDRESS, 3_000).await?;

    Ok(())
}

#[tokio::test]
async fn test_expired_seed_access_locks() -> anyhow::Result<()> {
    let env = TestEnvironment::new().await?;

    env.clock.advance(INACTIVITY_LIMIT + Duration::from_millis(1));
    // No explicit check: the next key access notices the timeout itself
    assert!(matches!(
        env.wallet.sign_message("hello", None),
        Err(WalletError::LockedWallet)
    ));
    assert!(env.wallet.session_state()?.locked);

    Ok(())
}

#[tokio::test]
async fn test_wrong_password_keeps_wallet_locked() -> anyhow::Result<()> {
    let env = TestEnvironment::new().await?;
    env.wallet.lock()?;

    assert!(matches!(
        env.wallet.unlock("hunter2"),
        Err(WalletError::WrongPassword)
    ));
    assert!(env.wallet.session_state()?.locked);

    env.wallet.unlock(PASSWORD)?;
    assert!(!env.wallet.session_state()?.locked);

    Ok(())
}

#[tokio::test]
async fn test_restart_requires_unlock() -> anyhow::Result<()> {
    let env = TestEnvironment::new().await?;
    let before = env.wallet.addresses()?;

    let restarted = env.reopen()?;
    assert!(restarted.has_wallet()?);
    assert!(restarted.session_state()?.locked);
    assert!(matches!(restarted.addresses(), Err(WalletError::LockedWallet)));

    restarted.unlock(PASSWORD)?;
    assert_eq!(restarted.addresses()?, before);

    Ok(())
}

#[tokio::test]
async fn test_explicit_lock_survives_restart() -> anyhow::Result<()> {
    let env = TestEnvironment::new().await?;
    env.wallet.lock()?;

    // The persisted activity time is already past the limit
    let restarted = env.reopen()?;
    assert!(restarted.session_state()?.locked);

    Ok(())
}

#[tokio::test]
async fn test_create_refuses_to_overwrite() -> anyhow::Result<()> {
    let env = TestEnvironment::new().await?;

    assert!(matches!(
        env.wallet.create(PASSWORD, &mut OsEntropy),
        Err(WalletError::State(_))
    ));
    assert!(matches!(
        env.wallet.restore(TEST_MNEMONIC, PASSWORD),
        Err(WalletError::State(_))
    ));

    env.wallet.reset()?;
    assert!(!env.wallet.has_wallet()?);
    assert!(matches!(env.wallet.unlock(PASSWORD), Err(WalletError::NoWallet)));

    let mnemonic = env.wallet.create(PASSWORD, &mut OsEntropy)?;
    assert_eq!(mnemonic.split_whitespace().count(), 12);
    assert!(env.wallet.has_wallet()?);
    assert!(!env.wallet.session_state()?.locked);

    Ok(())
}

#[tokio::test]
async fn test_watchdog_locks_in_background() -> anyhow::Result<()> {
    let env = TestEnvironment::new().await?;
    let watchdog = env.wallet.spawn_lock_watchdog();

    env.clock.advance(INACTIVITY_LIMIT + Duration::from_secs(1));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(env.wallet.session_state()?.locked);
    // Already locked by the watchdog
    assert!(!env.wallet.check_lock()?);

    watchdog.abort();
    Ok(())
}
