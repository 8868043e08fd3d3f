//! Utility functions.

use std::str::FromStr;

use alloy::primitives::U256;
use rust_decimal::Decimal;
use tracing::info;

/// Resolve when the process receives Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

/// Integer amount as a decimal. `None` if it exceeds decimal precision.
pub fn u256_to_decimal(amount: U256) -> Option<Decimal> {
    Decimal::from_str(&amount.to_string()).ok()
}

/// `amount` expressed in a token's base units, truncated toward zero.
pub fn to_base_units(amount: Decimal, decimals: u8) -> Option<U256> {
    if amount.is_sign_negative() {
        return None;
    }
    let scaled = amount.checked_mul(pow10(decimals)?)?.trunc();
    U256::from_str(&scaled.to_string()).ok()
}

/// Base-unit integer expressed in whole tokens.
pub fn from_base_units(amount: U256, decimals: u8) -> Option<Decimal> {
    u256_to_decimal(amount)?.checked_div(pow10(decimals)?)
}

fn pow10(decimals: u8) -> Option<Decimal> {
    10u64.checked_pow(u32::from(decimals)).map(Decimal::from)
}

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_hex_u256(raw: &str) -> Option<U256> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    if digits.is_empty() {
        return Some(U256::ZERO);
    }
    U256::from_str_radix(digits, 16).ok()
}

/// Parse a `0x`-prefixed hex quantity that fits in 64 bits.
pub fn parse_hex_u64(raw: &str) -> Option<u64> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    u64::from_str_radix(digits, 16).ok()
}
