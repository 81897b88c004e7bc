//! Certificate serial numbers.
//!
//! Serials are drawn uniformly from [0, 2^130) using the OS CSPRNG. No
//! persistent uniqueness table is kept; collisions are ruled out
//! probabilistically.

use rand::rngs::OsRng;
use rand::RngCore;
use rcgen::SerialNumber;

/// Serial width in bytes: 136 bits of randomness masked down to 130.
const SERIAL_LEN: usize = 17;

fn new_serial_bytes() -> [u8; SERIAL_LEN] {
    let mut bytes = [0u8; SERIAL_LEN];
    OsRng.fill_bytes(&mut bytes);
    // Keep the serial below 2^130.
    bytes[0] &= 0x03;
    bytes
}

/// Issues a fresh certificate serial number.
pub fn new_serial() -> SerialNumber {
    SerialNumber::from_slice(&new_serial_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn serials_stay_below_the_cap() {
        for _ in 0..1000 {
            let bytes = new_serial_bytes();
            assert!(bytes[0] <= 0x03, "top bits must be masked");
        }
    }

    #[test]
    fn a_hundred_thousand_draws_have_no_duplicates() {
        let mut seen = HashSet::with_capacity(100_000);
        for _ in 0..100_000 {
            assert!(seen.insert(new_serial_bytes()), "duplicate serial drawn");
        }
    }
}
