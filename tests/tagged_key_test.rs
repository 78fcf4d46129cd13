//! Tagged key derivation, on-chain tag backup and recovery on a second
//! device

mod common;

use common::*;
use ordwallet::keys::TAG_CONTENT_TYPE;
use ordwallet::{DerivationTag, WalletError};

fn tag() -> DerivationTag {
    DerivationTag::new("panda", "identity", "market.example")
}

#[tokio::test]
async fn test_first_use_inscribes_tag_once() -> anyhow::Result<()> {
    let env = TestEnvironment::new().await?;
    env.fund_payment(10_000).await?;

    let first = env.wallet.generate_tagged_keys(&tag()).await?;
    // One 1-sat inscription plus the fixed fee
    assert_eq!(env.wallet.balance()?, 10_000 - 1 - FIXED_FEE);

    let again = env.wallet.generate_tagged_keys(&tag()).await?;
    assert_eq!(first, again);
    assert_eq!(env.wallet.balance()?, 10_000 - 1 - FIXED_FEE);
    assert_eq!(env.wallet.derivation_tags()?, vec![first.clone()]);

    // The backup sits at the identity address, encrypted
    let identity = env.wallet.addresses()?.identity.address.to_string();
    let backups = env.mock.read().await.unspent_for(&identity);
    assert_eq!(backups.len(), 1);
    let origin = backups[0].origin.as_ref().expect("inscription origin");
    let content_type = origin
        .data
        .as_ref()
        .and_then(|d| d.insc.as_ref())
        .map(|i| i.file.content_type.clone());
    assert_eq!(content_type.as_deref(), Some(TAG_CONTENT_TYPE));

    Ok(())
}

#[tokio::test]
async fn test_restored_device_recovers_tags() -> anyhow::Result<()> {
    let env = TestEnvironment::new().await?;
    env.fund_payment(10_000).await?;
    let original = env.wallet.generate_tagged_keys(&tag()).await?;

    let device = TestEnvironment::with_mock(env.mock.clone()).await?;
    assert!(device.wallet.derivation_tags()?.is_empty());

    let recovered = device.wallet.sync_derivation_tags().await?;
    assert_eq!(recovered, vec![original.clone()]);
    assert_eq!(device.wallet.derivation_tags()?, vec![original]);

    Ok(())
}

#[tokio::test]
async fn test_failed_tag_fetch_keeps_known_tags() -> anyhow::Result<()> {
    let env = TestEnvironment::new().await?;
    env.fund_payment(10_000).await?;
    let known = env.wallet.generate_tagged_keys(&tag()).await?;

    env.indexer.set_fail_content(true);
    assert!(matches!(
        env.wallet.sync_derivation_tags().await,
        Err(WalletError::Network(_))
    ));
    assert_eq!(env.wallet.derivation_tags()?, vec![known.clone()]);

    env.indexer.set_fail_content(false);
    assert_eq!(env.wallet.sync_derivation_tags().await?, vec![known]);

    Ok(())
}

#[tokio::test]
async fn test_tag_without_funds_fails_cleanly() -> anyhow::Result<()> {
    let env = TestEnvironment::new().await?;

    assert!(matches!(
        env.wallet.generate_tagged_keys(&tag()).await,
        Err(WalletError::InsufficientFunds(_))
    ));
    assert!(env.wallet.derivation_tags()?.is_empty());

    let invalid = DerivationTag::new("", "identity", "market.example");
    assert!(matches!(
        env.wallet.generate_tagged_keys(&invalid).await,
        Err(WalletError::InvalidTag(_))
    ));

    Ok(())
}

#[tokio::test]
async fn test_tagged_signature_uses_tag_key() -> anyhow::Result<()> {
    let env = TestEnvironment::new().await?;
    env.fund_payment(10_000).await?;
    let tagged = env.wallet.generate_tagged_keys(&tag()).await?;

    let signed = env.wallet.sign_message("login:42", Some(&tag()))?;
    assert_eq!(signed.address, tagged.address);
    assert_eq!(signed.pub_key, tagged.pub_key);
    assert_eq!(signed.derivation_tag, Some(tag()));

    let plain = env.wallet.sign_message("login:42", None)?;
    assert_eq!(plain.address, env.wallet.addresses()?.identity.address.to_string());
    assert_ne!(plain.sig, signed.sig);

    Ok(())
}
