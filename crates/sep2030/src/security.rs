// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Device identity derivation: LFDI and SFDI from a DER-encoded
//! certificate.
//!
//! The LFDI ("Long-Form Device Identifier") is the leftmost 160 bits of
//! the SHA-256 digest of the device's certificate. The SFDI
//! ("Short-Form Device Identifier") is the leftmost 36 bits of the
//! LFDI, written as a decimal number with a trailing Luhn check digit.

use sha2::{Digest, Sha256};

/// LFDI: the leftmost 20 bytes (160 bits) of SHA-256(cert).
pub fn lfdi(der_cert: &[u8]) -> Vec<u8> {
    let digest = Sha256::digest(der_cert);
    digest[..20].to_vec()
}

/// SFDI: the leftmost 36 bits of the LFDI, as a decimal number with a
/// trailing Luhn check digit appended.
pub fn sfdi(lfdi: &[u8]) -> u64 {
    let mut value: u64 = 0;
    for &byte in lfdi.iter().take(5) {
        value = (value << 8) | byte as u64;
    }
    // keep only the leftmost 36 bits of the 40 bits just assembled
    let truncated = value >> 4;
    let check = luhn_check_digit(truncated);
    truncated * 10 + check
}

/// Compute the Luhn check digit for a non-negative decimal number,
/// treating it as the sequence of digits to be checked (not including
/// the check digit itself).
fn luhn_check_digit(mut n: u64) -> u64 {
    let mut digits = Vec::new();
    if n == 0 {
        digits.push(0);
    }
    while n > 0 {
        digits.push(n % 10);
        n /= 10;
    }
    // digits is least-significant-first; Luhn doubles every second
    // digit counting from the rightmost (the check digit's immediate
    // left neighbor is doubled first).
    let mut sum = 0u64;
    for (i, d) in digits.into_iter().enumerate() {
        let v = if i % 2 == 0 {
            let doubled = d * 2;
            if doubled > 9 {
                doubled - 9
            } else {
                doubled
            }
        } else {
            d
        };
        sum += v;
    }
    (10 - (sum % 10)) % 10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lfdi_is_160_bits() {
        let cert = b"not a real certificate, just test bytes";
        let l = lfdi(cert);
        assert_eq!(l.len(), 20);
    }

    #[test]
    fn sfdi_is_deterministic_and_luhn_valid() {
        let cert = b"another test certificate payload";
        let l = lfdi(cert);
        let s = sfdi(&l);
        // the full SFDI decimal string (value + check digit) must
        // itself pass the Luhn checksum
        let digits: Vec<u64> = s
            .to_string()
            .chars()
            .map(|c| c.to_digit(10).unwrap() as u64)
            .collect();
        let mut sum = 0u64;
        for (i, &d) in digits.iter().rev().enumerate() {
            let v = if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            };
            sum += v;
        }
        assert_eq!(sum % 10, 0);
    }

    #[test]
    fn lfdi_changes_with_certificate() {
        let a = lfdi(b"certificate one");
        let b = lfdi(b"certificate two");
        assert_ne!(a, b);
    }
}
