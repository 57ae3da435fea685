//! Key policy: which subscriber public keys this CA will certify.
//!
//! RSA keys must be 2048/3072/4096 bits, free of small factors, not of the
//! ROCA-vulnerable form, and not trivially Fermat-factorable. ECDSA keys
//! must be on P-256 or P-384. Everything else is refused.

use crate::error::{CaError, Result};
use num_bigint::BigUint;
use x509_parser::prelude::*;
use x509_parser::public_key::PublicKey;

/// Accepted RSA modulus sizes in bits
const RSA_MODULUS_BITS: [u64; 3] = [2048, 3072, 4096];

/// Primes below 752; an RSA modulus divisible by any of them is broken
const SMALL_PRIMES: [u32; 132] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89,
    97, 101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151, 157, 163, 167, 173, 179, 181, 191,
    193, 197, 199, 211, 223, 227, 229, 233, 239, 241, 251, 257, 263, 269, 271, 277, 281, 283, 293,
    307, 311, 313, 317, 331, 337, 347, 349, 353, 359, 367, 373, 379, 383, 389, 397, 401, 409, 419,
    421, 431, 433, 439, 443, 449, 457, 461, 463, 467, 479, 487, 491, 499, 503, 509, 521, 523, 541,
    547, 557, 563, 569, 571, 577, 587, 593, 599, 601, 607, 613, 617, 619, 631, 641, 643, 647, 653,
    659, 661, 673, 677, 683, 691, 701, 709, 719, 727, 733, 739, 743,
];

/// Primes of the ROCA fingerprint: a vulnerable modulus is, mod each of
/// these, a power of 65537
const ROCA_PRIMES: [u32; 17] = [
    11, 13, 17, 19, 37, 53, 61, 71, 73, 79, 97, 103, 107, 109, 127, 151, 157,
];

/// OID constants
const OID_RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";
const OID_EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";
const OID_P256: &str = "1.2.840.10045.3.1.7";
const OID_P384: &str = "1.3.132.0.34";

/// The policy checker, configured with a bounded number of Fermat rounds
#[derive(Debug, Clone)]
pub struct KeyPolicy {
    fermat_rounds: u32,
    roca_power_sets: Vec<(u32, Vec<bool>)>,
}

impl KeyPolicy {
    pub fn new(fermat_rounds: u32) -> Self {
        // precompute, per ROCA prime p, the set {65537^k mod p}
        let roca_power_sets = ROCA_PRIMES
            .iter()
            .map(|&p| {
                let mut seen = vec![false; p as usize];
                let mut value: u64 = 1;
                loop {
                    if seen[value as usize] {
                        break;
                    }
                    seen[value as usize] = true;
                    value = value * 65537 % p as u64;
                }
                (p, seen)
            })
            .collect();
        Self {
            fermat_rounds,
            roca_power_sets,
        }
    }

    /// Check a SubjectPublicKeyInfo against the policy.
    pub fn check(&self, spki: &SubjectPublicKeyInfo<'_>) -> Result<()> {
        match spki.algorithm.algorithm.to_id_string().as_str() {
            OID_RSA_ENCRYPTION => self.check_rsa(spki),
            OID_EC_PUBLIC_KEY => self.check_ecdsa(spki),
            other => Err(CaError::bad_public_key(format!(
                "unsupported key algorithm {}",
                other
            ))),
        }
    }

    fn check_rsa(&self, spki: &SubjectPublicKeyInfo<'_>) -> Result<()> {
        let PublicKey::RSA(rsa) = spki
            .parsed()
            .map_err(|e| CaError::bad_public_key(format!("parsing RSA key: {}", e)))?
        else {
            return Err(CaError::bad_public_key("malformed RSA key"));
        };
        let modulus = BigUint::from_bytes_be(rsa.modulus);

        let bits = modulus.bits();
        if !RSA_MODULUS_BITS.contains(&bits) {
            return Err(CaError::bad_public_key(format!(
                "RSA modulus is {} bits, want one of {:?}",
                bits, RSA_MODULUS_BITS
            )));
        }
        if bits % 8 != 0 {
            return Err(CaError::bad_public_key(
                "RSA modulus bit length is not a multiple of 8",
            ));
        }

        for &prime in &SMALL_PRIMES {
            if (&modulus % prime).bits() == 0 {
                return Err(CaError::bad_public_key(format!(
                    "RSA modulus is divisible by {}",
                    prime
                )));
            }
        }
        if self.is_roca_vulnerable(&modulus) {
            return Err(CaError::bad_public_key(
                "RSA modulus has the ROCA-vulnerable form",
            ));
        }
        if let Some((p, q)) = fermat_factor(&modulus, self.fermat_rounds) {
            return Err(CaError::bad_public_key(format!(
                "RSA modulus factors as {} * {} (primes too close together)",
                p, q
            )));
        }
        Ok(())
    }

    fn check_ecdsa(&self, spki: &SubjectPublicKeyInfo<'_>) -> Result<()> {
        let curve = spki
            .algorithm
            .parameters
            .as_ref()
            .and_then(|params| params.as_oid().ok())
            .map(|oid| oid.to_id_string())
            .ok_or_else(|| CaError::bad_public_key("ECDSA key has no named curve"))?;
        let point_len = match curve.as_str() {
            OID_P256 => 65,
            OID_P384 => 97,
            other => {
                return Err(CaError::bad_public_key(format!(
                    "unsupported ECDSA curve {}",
                    other
                )));
            }
        };

        let PublicKey::EC(point) = spki
            .parsed()
            .map_err(|e| CaError::bad_public_key(format!("parsing ECDSA key: {}", e)))?
        else {
            return Err(CaError::bad_public_key("malformed ECDSA key"));
        };
        let data = point.data();
        // uncompressed SEC 1 point, not the identity
        if data.len() != point_len || data[0] != 0x04 {
            return Err(CaError::bad_public_key(
                "ECDSA public key is not an uncompressed point",
            ));
        }
        if data[1..].iter().all(|&b| b == 0) {
            return Err(CaError::bad_public_key(
                "ECDSA public key is the point at infinity",
            ));
        }
        Ok(())
    }

    /// The ROCA fingerprint: vulnerable iff the modulus is a power of
    /// 65537 modulo every prime in the set.
    fn is_roca_vulnerable(&self, modulus: &BigUint) -> bool {
        self.roca_power_sets.iter().all(|(p, powers)| {
            let residue_big = modulus % *p;
            let residue = residue_big.to_u64_digits().first().copied().unwrap_or(0) as usize;
            powers[residue]
        })
    }
}

/// Fermat's method: find factors of n that straddle sqrt(n) within the
/// given number of steps. Keys generated with p and q too close together
/// fall to this immediately.
fn fermat_factor(n: &BigUint, rounds: u32) -> Option<(BigUint, BigUint)> {
    use num_bigint::BigUint as B;

    if rounds == 0 {
        return None;
    }
    let one = B::from(1u8);
    let mut a = n.sqrt();
    if &a * &a < *n {
        a += &one;
    }
    for _ in 0..rounds {
        let b2 = &a * &a - n;
        let b = b2.sqrt();
        if &b * &b == b2 {
            let p = &a - &b;
            let q = &a + &b;
            if p > one {
                return Some((p, q));
            }
        }
        a += &one;
    }
    None
}

/// SHA-256 over the DER SubjectPublicKeyInfo, hex-encoded. This is the
/// digest stored in the blocked-key table.
pub fn spki_digest(spki_der: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(spki_der);
    hex::encode(hasher.finalize())
}
