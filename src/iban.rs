//! IBAN checksum validation (ISO 13616 mod-97).
//!
//! The mirror rejects records whose account identifier fails this check,
//! and the origin uses the same check at export time to mark its own log
//! entries faulty. Any structural problem counts as invalid; there is no
//! distinction between "wrong shape" and "wrong check digits" at this
//! level.

/// Returns true if the IBAN passes the structural and mod-97 checks.
pub fn is_valid(iban: &str) -> bool {
    let bytes = iban.as_bytes();

    if bytes.len() < 15 || bytes.len() > 34 {
        return false;
    }
    if !bytes[..2].iter().all(|b| b.is_ascii_uppercase()) {
        return false;
    }
    if !bytes[2..4].iter().all(|b| b.is_ascii_digit()) {
        return false;
    }
    if !bytes.iter().all(|b| b.is_ascii_alphanumeric()) {
        return false;
    }

    // Move the country code and check digits to the end, then compute
    // the whole string mod 97 with letters mapped to 10..35.
    let rearranged = bytes[4..].iter().chain(bytes[..4].iter());
    mod97(rearranged) == 1
}

/// Compute the two check digits for a country code and BBAN, so the
/// seeder can generate IBANs that actually validate.
pub fn check_digits(country: &str, bban: &str) -> u32 {
    let candidate = format!("{}{}00", bban, country);
    98 - mod97(candidate.as_bytes().iter())
}

fn mod97<'a>(bytes: impl Iterator<Item = &'a u8>) -> u32 {
    let mut remainder: u32 = 0;
    for &b in bytes {
        let value = if b.is_ascii_digit() {
            (b - b'0') as u32
        } else {
            (b.to_ascii_uppercase() - b'A') as u32 + 10
        };
        remainder = if value < 10 {
            (remainder * 10 + value) % 97
        } else {
            (remainder * 100 + value) % 97
        };
    }
    remainder
}
