//! Order signing for the /exchange endpoint.
//!
//! Actions are digested with keccak256 over the canonical action bytes plus
//! the nonce, then signed with the user's ECDSA key. The signature travels
//! as `{r, s, v}` alongside the action and nonce.

use ethers::signers::{LocalWallet, Signer};
use ethers::types::H256;
use ethers::utils::keccak256;
use serde::Serialize;
use zeroize::Zeroizing;

use crate::domain::errors::ExchangeError;

/// Wire form of an action signature.
#[derive(Debug, Clone, Serialize)]
pub struct SignatureRsv {
    pub r: String,
    pub s: String,
    pub v: u64,
}

/// Build a wallet from a raw hex private key. The input is held in a
/// zeroizing buffer while parsed; the caller should not retain its own
/// copy longer than needed.
pub fn wallet_from_key(private_key: &str) -> Result<LocalWallet, ExchangeError> {
    let key = Zeroizing::new(private_key.trim().trim_start_matches("0x").to_string());
    key.parse::<LocalWallet>()
        .map_err(|e| ExchangeError::Signing(format!("invalid private key: {}", e)))
}

/// Digest for an exchange action: keccak256 over the serialized action
/// followed by the big-endian nonce.
pub fn action_digest(action: &serde_json::Value, nonce: u64) -> Result<H256, ExchangeError> {
    let mut bytes = serde_json::to_vec(action)
        .map_err(|e| ExchangeError::Signing(format!("unserializable action: {}", e)))?;
    bytes.extend_from_slice(&nonce.to_be_bytes());
    Ok(H256::from(keccak256(&bytes)))
}

/// Sign an action for submission.
pub fn sign_action(
    wallet: &LocalWallet,
    action: &serde_json::Value,
    nonce: u64,
) -> Result<SignatureRsv, ExchangeError> {
    let digest = action_digest(action, nonce)?;
    let signature = wallet
        .sign_hash(digest)
        .map_err(|e| ExchangeError::Signing(e.to_string()))?;
    Ok(SignatureRsv {
        r: format!("0x{:064x}", signature.r),
        s: format!("0x{:064x}", signature.s),
        v: signature.v,
    })
}

/// The full signed payload for POST /exchange.
pub fn signed_payload(
    wallet: &LocalWallet,
    action: serde_json::Value,
    nonce: u64,
) -> Result<serde_json::Value, ExchangeError> {
    let signature = sign_action(wallet, &action, nonce)?;
    Ok(serde_json::json!({
        "action": action,
        "nonce": nonce,
        "signature": signature,
        "vaultAddress": null,
    }))
}
