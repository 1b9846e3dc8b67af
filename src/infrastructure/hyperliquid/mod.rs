//! Hyperliquid protocol client: REST info/exchange endpoints, order
//! signing, candle WebSocket, and the order executor built on top.

pub mod client;
pub mod executor;
pub mod signer;
pub mod types;
pub mod ws;

/// REST base URL for the given network flag.
pub fn api_base_url(testnet: bool) -> &'static str {
    if testnet {
        "https://api.hyperliquid-testnet.xyz"
    } else {
        "https://api.hyperliquid.xyz"
    }
}

/// WebSocket URL for the given network flag.
pub fn ws_url(testnet: bool) -> &'static str {
    if testnet {
        "wss://api.hyperliquid-testnet.xyz/ws"
    } else {
        "wss://api.hyperliquid.xyz/ws"
    }
}
