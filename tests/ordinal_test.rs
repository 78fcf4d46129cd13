//! Ordinal transfer and listing flows against the indexer mock

mod common;

use bitcoin::address::NetworkUnchecked;
use bitcoin::hashes::Hash;
use bitcoin::{Address, OutPoint, Txid};
use common::*;
use ordwallet::tx::script;
use ordwallet::WalletError;

#[tokio::test]
async fn test_transfer_keeps_inscription_on_output_zero() -> anyhow::Result<()> {
    let env = TestEnvironment::new().await?;
    env.fund_payment(10_000).await?;
    let origin = env.inscribe_ordinal("text/plain", b"gm").await?;
    assert_eq!(env.wallet.ordinals()?.len(), 1);

    let before = env.wallet.lookup_output(&origin).await?.expect("inscription output");
    assert_eq!(before.satoshis, 1);
    assert_eq!(before.ordinal.map(|meta| meta.origin), Some(origin));

    let txid = env.wallet.transfer_ordinal(&origin, OTHER_ADDRESS).await?;
    let tx = env.transaction(&txid).await?;

    // Input 0 is the ordinal, output 0 carries it to the destination
    assert_eq!(tx.input[0].previous_output, origin);
    assert_eq!(tx.output[0].value.to_sat(), 1);
    let destination = OTHER_ADDRESS
        .parse::<Address<NetworkUnchecked>>()?
        .require_network(bitcoin::Network::Testnet)?;
    let (lock, _) = script::split_envelope(&tx.output[0].script_pubkey);
    assert_eq!(lock, destination.script_pubkey().as_bytes());
    assert_eq!(
        script::parse_inscription(&tx.output[0].script_pubkey),
        Some(("text/plain".to_string(), b"gm".to_vec()))
    );

    // Fee came from the payment coin, not the ordinal
    assert!(env.wallet.ordinals()?.is_empty());
    assert_eq!(env.wallet.balance()?, 10_000 - FIXED_FEE);

    // The indexer follows the inscription to its new owner
    let received = env.mock.read().await.unspent_for(OTHER_ADDRESS);
    assert_eq!(received.len(), 1);
    assert_eq!(
        received[0].origin.as_ref().map(|o| o.outpoint.clone()),
        Some(format!("{}_{}", origin.txid, origin.vout))
    );

    Ok(())
}

#[tokio::test]
async fn test_transfer_of_unknown_ordinal_fails() -> anyhow::Result<()> {
    let env = TestEnvironment::new().await?;
    env.fund_payment(10_000).await?;

    let missing = OutPoint::new(Txid::all_zeros(), 7);
    assert_eq!(env.wallet.lookup_output(&missing).await?, None);
    assert!(matches!(
        env.wallet.transfer_ordinal(&missing, OTHER_ADDRESS).await,
        Err(WalletError::OrdinalNotFound(_))
    ));
    assert_eq!(env.wallet.balance()?, 10_000);

    Ok(())
}

#[tokio::test]
async fn test_list_then_cancel() -> anyhow::Result<()> {
    let env = TestEnvironment::new().await?;
    env.fund_payment(10_000).await?;
    let origin = env.inscribe_ordinal("image/png", &[0x89, 0x50, 0x4e, 0x47]).await?;

    let list_txid = env.wallet.list_ordinal(&origin, 50_000).await?;
    let listed = OutPoint::new(list_txid, 0);

    let ordinals = env.wallet.ordinals()?;
    assert_eq!(ordinals.len(), 1);
    assert_eq!(ordinals[0].outpoint(), listed);
    let listing = ordinals[0]
        .ordinal()
        .and_then(|meta| meta.listing.clone())
        .expect("listing recorded");
    assert_eq!(listing.price, 50_000);
    assert_eq!(listing.payout, env.wallet.addresses()?.payment.address.script_pubkey());

    // The indexer still attributes the listed output to the ordinal address
    env.wallet.refresh_ordinals().await?;
    let refreshed = env.wallet.ordinals()?;
    assert_eq!(refreshed.len(), 1);
    assert_eq!(refreshed[0].ordinal().map(|m| m.origin), Some(origin));
    assert!(refreshed[0].ordinal().is_some_and(|m| m.listing.is_some()));

    // Listing again is refused
    assert!(env.wallet.list_ordinal(&listed, 60_000).await.is_err());

    let cancel_txid = env.wallet.cancel_listing(&listed).await?;
    let tx = env.transaction(&cancel_txid).await?;
    assert!(script::parse_listing(&tx.output[0].script_pubkey).is_none());

    let ordinals = env.wallet.ordinals()?;
    assert_eq!(ordinals.len(), 1);
    assert!(ordinals[0].ordinal().is_some_and(|m| m.listing.is_none()));
    assert_eq!(env.wallet.balance()?, 10_000 - 2 * FIXED_FEE);

    Ok(())
}

#[tokio::test]
async fn test_market_listing_lookup() -> anyhow::Result<()> {
    let env = TestEnvironment::new().await?;
    env.fund_payment(10_000).await?;
    let origin = env.inscribe_ordinal("text/plain", b"for sale").await?;

    let list_txid = env.wallet.list_ordinal(&origin, 50_000).await?;
    let listed = OutPoint::new(list_txid, 0);

    let market = env.wallet.market_listing(&listed).await?;
    assert_eq!(market.outpoint, listed);
    assert_eq!(market.origin, origin);
    assert_eq!(market.listing.price, 50_000);
    assert_eq!(market.listing.payout, env.wallet.addresses()?.payment.address.script_pubkey());
    assert!(script::parse_listing(&market.script).is_some());

    // The pre-listing output carries the inscription but no terms
    assert!(matches!(
        env.wallet.market_listing(&origin).await,
        Err(WalletError::State(_))
    ));

    let missing = OutPoint::new(Txid::all_zeros(), 7);
    assert!(matches!(
        env.wallet.market_listing(&missing).await,
        Err(WalletError::OrdinalNotFound(_))
    ));

    Ok(())
}

#[tokio::test]
async fn test_cancel_requires_listing() -> anyhow::Result<()> {
    let env = TestEnvironment::new().await?;
    env.fund_payment(10_000).await?;
    let origin = env.inscribe_ordinal("text/plain", b"plain").await?;

    assert!(env.wallet.cancel_listing(&origin).await.is_err());
    assert!(matches!(
        env.wallet.list_ordinal(&origin, 0).await,
        Err(WalletError::InvalidAmount(_))
    ));

    // The failed builds left the ordinal available
    env.wallet.transfer_ordinal(&origin, OTHER_ADDRESS).await?;

    Ok(())
}
