//! Push subscription parameters.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

use crate::{Result, ServiceWorkerError};

/// A VAPID application server public key: an uncompressed P-256 point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationServerKey(Vec<u8>);

impl ApplicationServerKey {
    /// Length of an uncompressed P-256 point.
    pub const LEN: usize = 65;

    /// Decode a base64 key; trailing padding is optional.
    ///
    /// Both alphabets are accepted: `+` and `/` read as `-` and `_`.
    pub fn from_base64url(encoded: &str) -> Result<Self> {
        let normalized: String = encoded
            .trim()
            .trim_end_matches('=')
            .chars()
            .map(|c| match c {
                '+' => '-',
                '/' => '_',
                c => c,
            })
            .collect();
        let bytes = URL_SAFE_NO_PAD
            .decode(normalized)
            .map_err(|e| ServiceWorkerError::InvalidKey(e.to_string()))?;
        Self::from_bytes(bytes)
    }

    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != Self::LEN {
            return Err(ServiceWorkerError::InvalidKey(format!(
                "expected {} bytes, got {}",
                Self::LEN,
                bytes.len()
            )));
        }
        if bytes[0] != 0x04 {
            return Err(ServiceWorkerError::InvalidKey(
                "key is not an uncompressed point".into(),
            ));
        }
        Ok(Self(bytes))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// URL-safe base64 without padding.
    pub fn to_base64url(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.0)
    }
}

/// Options for subscribing to push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushSubscriptionOptions {
    /// Every push must result in a visible notification.
    pub user_visible_only: bool,
    pub application_server_key: ApplicationServerKey,
}

impl PushSubscriptionOptions {
    /// Options for a user-visible subscription.
    pub fn new(application_server_key: ApplicationServerKey) -> Self {
        Self {
            user_visible_only: true,
            application_server_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str =
        "BEl62iUYgUivxIkv69yViEuiBIa-Ib9-SkvMeAtA3LFgDzkrxZJjSgSnfckjBJuBkr3qBUYIHBQFLXYp5Nksh8U";

    #[test]
    fn test_decode_vapid_key() {
        let key = ApplicationServerKey::from_base64url(KEY).unwrap();
        assert_eq!(key.as_bytes().len(), ApplicationServerKey::LEN);
        assert_eq!(key.as_bytes()[0], 0x04);
        assert_eq!(key.to_base64url(), KEY);
    }

    #[test]
    fn test_padding_is_optional() {
        let padded = format!("{KEY}=");
        assert!(ApplicationServerKey::from_base64url(&padded).is_ok());
    }

    #[test]
    fn test_standard_alphabet_is_accepted() {
        let mut raw = vec![0x04];
        raw.extend([0xfb; 32]);
        raw.extend([0xff; 32]);
        let standard = base64::engine::general_purpose::STANDARD.encode(&raw);
        assert!(standard.contains('+') && standard.contains('/'));

        let key = ApplicationServerKey::from_base64url(&standard).unwrap();
        assert_eq!(key.as_bytes(), raw.as_slice());
    }

    #[test]
    fn test_rejects_bad_keys() {
        assert!(matches!(
            ApplicationServerKey::from_base64url("not base64 at all!"),
            Err(ServiceWorkerError::InvalidKey(_))
        ));
        assert!(ApplicationServerKey::from_base64url("AAAA").is_err());

        let mut compressed = vec![0x02; ApplicationServerKey::LEN];
        compressed[1] = 0;
        assert!(ApplicationServerKey::from_bytes(compressed).is_err());
    }

    #[test]
    fn test_subscription_is_user_visible() {
        let options =
            PushSubscriptionOptions::new(ApplicationServerKey::from_base64url(KEY).unwrap());
        assert!(options.user_visible_only);
    }
}
