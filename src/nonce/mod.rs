//! Single-use anti-replay nonces.
//!
//! A nonce is the replica's prefix followed by the AES-GCM encryption of a
//! monotonically increasing counter. The AEAD key lives only in process
//! memory, so a restart invalidates every outstanding nonce at once; the
//! used-counter window bounds memory while keeping replay rejection exact
//! inside it.

use crate::config::NonceConfig;
use crate::error::{CaError, Result};
use aws_lc_rs::aead::{AES_256_GCM, Aad, LessSafeKey, Nonce as AeadNonce, UnboundKey};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, KeyInit, Mac};
use sha2::Sha256;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Characters of prefix on every nonce
pub const PREFIX_LEN: usize = 8;
/// Characters in a full nonce: prefix + base64url(8-byte IV tail + sealed counter)
pub const NONCE_LEN: usize = PREFIX_LEN + 43;

struct CounterWindow {
    latest: u64,
    earliest: u64,
    used: HashSet<u64>,
    used_heap: BinaryHeap<Reverse<u64>>,
}

/// One nonce-service replica
pub struct NonceService {
    key: LessSafeKey,
    prefix: String,
    max_used: usize,
    window: Mutex<CounterWindow>,
}

impl NonceService {
    /// Create a replica with a fresh process-private key
    pub fn new(config: &NonceConfig) -> Result<Self> {
        use rand::Rng;
        let mut key_bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut key_bytes);
        Self::with_key(config, key_bytes)
    }

    fn with_key(config: &NonceConfig, key_bytes: [u8; 32]) -> Result<Self> {
        let unbound = UnboundKey::new(&AES_256_GCM, &key_bytes)
            .map_err(|_| CaError::internal("constructing nonce AEAD key"))?;

        let mut mac = Hmac::<Sha256>::new_from_slice(&key_bytes)
            .map_err(|_| CaError::internal("constructing nonce prefix MAC"))?;
        mac.update(config.listen_address.as_bytes());
        let digest = mac.finalize().into_bytes();
        let prefix = URL_SAFE_NO_PAD.encode(digest)[..PREFIX_LEN].to_string();

        Ok(Self {
            key: LessSafeKey::new(unbound),
            prefix,
            max_used: config.max_used,
            window: Mutex::new(CounterWindow {
                latest: 0,
                earliest: 0,
                used: HashSet::new(),
                used_heap: BinaryHeap::new(),
            }),
        })
    }

    /// The routing prefix holders see on every nonce from this replica
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Issue a fresh nonce
    pub fn nonce(&self) -> Result<String> {
        use rand::Rng;

        let counter = {
            let mut window = self.window.lock().expect("nonce mutex poisoned");
            window.latest += 1;
            window.latest
        };

        // 12-byte IV: 4 zero bytes then 8 random; only the random tail is
        // carried in the token
        let mut iv = [0u8; 12];
        rand::rng().fill_bytes(&mut iv[4..]);

        let mut in_out = counter.to_be_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(
                AeadNonce::assume_unique_for_key(iv),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| CaError::internal("sealing nonce"))?;

        let mut body = Vec::with_capacity(8 + in_out.len());
        body.extend_from_slice(&iv[4..]);
        body.extend_from_slice(&in_out);
        Ok(format!("{}{}", self.prefix, URL_SAFE_NO_PAD.encode(body)))
    }

    /// Redeem a nonce. True exactly once per issued nonce, inside the
    /// replay window.
    pub fn valid(&self, nonce: &str) -> bool {
        if nonce.len() != NONCE_LEN || !nonce.starts_with(self.prefix.as_str()) {
            return false;
        }
        let Ok(body) = URL_SAFE_NO_PAD.decode(&nonce[PREFIX_LEN..]) else {
            return false;
        };
        if body.len() != 32 {
            return false;
        }

        let mut iv = [0u8; 12];
        iv[4..].copy_from_slice(&body[..8]);
        let mut in_out = body[8..].to_vec();
        let Ok(plaintext) = self.key.open_in_place(
            AeadNonce::assume_unique_for_key(iv),
            Aad::empty(),
            &mut in_out,
        ) else {
            return false;
        };
        if plaintext.len() != 8 {
            return false;
        }
        let counter = u64::from_be_bytes(plaintext.try_into().expect("8-byte counter"));

        let mut window = self.window.lock().expect("nonce mutex poisoned");
        if counter > window.latest || counter <= window.earliest {
            return false;
        }
        if !window.used.insert(counter) {
            return false;
        }
        window.used_heap.push(Reverse(counter));
        if window.used.len() > self.max_used {
            if let Some(Reverse(retired)) = window.used_heap.pop() {
                window.used.remove(&retired);
                window.earliest = retired;
            }
        }
        true
    }
}

/// Routes redemptions to the replica that issued the nonce.
///
/// The prefix -> replica map is static per deployment; a nonce with an
/// unknown prefix is simply invalid, never an error.
pub struct NonceRouter {
    replicas: HashMap<String, Arc<NonceService>>,
}

impl NonceRouter {
    pub fn new(replicas: impl IntoIterator<Item = Arc<NonceService>>) -> Self {
        Self {
            replicas: replicas
                .into_iter()
                .map(|r| (r.prefix().to_string(), r))
                .collect(),
        }
    }

    /// Redeem a nonce at whichever replica issued it
    pub fn valid(&self, nonce: &str) -> bool {
        if nonce.len() != NONCE_LEN {
            return false;
        }
        match self.replicas.get(&nonce[..PREFIX_LEN]) {
            Some(replica) => replica.valid(nonce),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(max_used: usize) -> NonceService {
        NonceService::new(&NonceConfig {
            max_used,
            listen_address: "127.0.0.1:9101".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn nonce_shape() {
        let svc = service(16);
        let nonce = svc.nonce().unwrap();
        assert_eq!(nonce.len(), NONCE_LEN);
        assert!(nonce.starts_with(svc.prefix()));
        assert_eq!(svc.prefix().len(), PREFIX_LEN);
    }

    #[test]
    fn single_use() {
        let svc = service(16);
        let nonce = svc.nonce().unwrap();
        assert!(svc.valid(&nonce));
        assert!(!svc.valid(&nonce));
    }

    #[test]
    fn rejects_garbage_and_truncation() {
        let svc = service(16);
        assert!(!svc.valid(""));
        assert!(!svc.valid("short"));
        let nonce = svc.nonce().unwrap();
        assert!(!svc.valid(&nonce[..NONCE_LEN - 1]));
        // flip a ciphertext character
        let mut tampered = nonce.into_bytes();
        let i = PREFIX_LEN + 20;
        tampered[i] = if tampered[i] == b'A' { b'B' } else { b'A' };
        assert!(!svc.valid(&String::from_utf8(tampered).unwrap()));
    }

    #[test]
    fn rejects_cross_replica_nonces() {
        let a = service(16);
        let b = service(16);
        let nonce = a.nonce().unwrap();
        assert!(!b.valid(&nonce));
    }

    #[test]
    fn restart_invalidates_everything() {
        let config = NonceConfig {
            max_used: 16,
            listen_address: "127.0.0.1:9101".to_string(),
        };
        let before = NonceService::new(&config).unwrap();
        let nonce = before.nonce().unwrap();
        let after = NonceService::new(&config).unwrap();
        assert!(!after.valid(&nonce));
    }

    #[test]
    fn window_evicts_exactly_the_minimum() {
        let svc = service(4);
        let nonces: Vec<String> = (0..5).map(|_| svc.nonce().unwrap()).collect();
        // redeem counters 1..=4; the window is now full
        for nonce in &nonces[..4] {
            assert!(svc.valid(nonce));
        }
        // the fifth redemption overflows the window and retires counter 1
        assert!(svc.valid(&nonces[4]));
        {
            let window = svc.window.lock().unwrap();
            assert_eq!(window.earliest, 1);
            assert_eq!(window.used.len(), 4);
            assert!(!window.used.contains(&1));
        }
        // counters at or below earliest are gone for good
        assert!(!svc.valid(&nonces[0]));
    }

    #[test]
    fn router_dispatches_by_prefix() {
        let a = Arc::new(service(16));
        let b = Arc::new(service(16));
        let router = NonceRouter::new([a.clone(), b.clone()]);

        let from_a = a.nonce().unwrap();
        let from_b = b.nonce().unwrap();
        assert!(router.valid(&from_a));
        assert!(router.valid(&from_b));
        assert!(!router.valid(&from_a));

        // unknown prefix: invalid, not an error
        let unknown = format!("XXXXXXXX{}", &from_b[PREFIX_LEN..]);
        assert!(!router.valid(&unknown));
    }
}
