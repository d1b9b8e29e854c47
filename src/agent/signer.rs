//! Login Signature
//!
//! Produces the HMAC-SHA256 device signature the auth server expects.
//! The signed message is the decimal timestamp immediately followed by
//! the device key, with no separator. That exact byte layout is part of
//! the wire protocol; changing it gets the login rejected.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute the login signature: lowercase hex HMAC-SHA256 of
/// `{timestamp}{device_key}` keyed by the customer key.
pub fn sign(customer_key: &str, device_key: &str, timestamp: u64) -> String {
    let message = format!("{}{}", timestamp, device_key);
    let mut mac = HmacSha256::new_from_slice(customer_key.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Unix time source for the signed login request.
///
/// The signature binds the timestamp, so the device clock must be
/// synchronized (NTP or equivalent) before the first login or the
/// backend will reject the signature.
pub trait Clock {
    fn unix_timestamp(&self) -> u64;
}

/// Wall-clock time via chrono.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_timestamp(&self) -> u64 {
        // timestamp() is negative only before the epoch
        chrono::Utc::now().timestamp().max(0) as u64
    }
}
