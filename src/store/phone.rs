//! Phone-number normalisation for account linking.
//!
//! Linked phones are stored in one canonical form: digits only, with the
//! Brazilian country code. Sender addresses do not always match that form:
//! older accounts report mobile numbers without the ninth digit, and people
//! type numbers with or without the country code. [`lookup_candidates`]
//! enumerates every form a sender's number may have been linked under.

use crate::whatsapp::jid;

/// Country code assumed for national numbers.
pub const COUNTRY_CODE: &str = "55";

/// National number lengths: area code + 8 or 9 digit subscriber number.
const NATIONAL_LENGTHS: [usize; 2] = [10, 11];

/// Shortest number accepted for linking.
const MIN_DIGITS: usize = 8;

/// Keep only ASCII digits.
pub fn digits(input: &str) -> String {
    input.chars().filter(char::is_ascii_digit).collect()
}

/// Digits of the user part of a sender address.
pub fn sender_digits(sender_id: &str) -> String {
    digits(jid::user_part(sender_id))
}

/// Canonical stored form of a phone number typed by a person.
///
/// Returns `None` when the input has too few digits.
pub fn normalize(input: &str) -> Option<String> {
    let digits = digits(input);
    if digits.len() < MIN_DIGITS {
        return None;
    }
    if NATIONAL_LENGTHS.contains(&digits.len()) {
        return Some(format!("{COUNTRY_CODE}{digits}"));
    }
    Some(digits)
}

/// Every stored form under which the sender's number may have been linked.
///
/// The first candidate is always the raw digits.
pub fn lookup_candidates(sender_id: &str) -> Vec<String> {
    let raw = sender_digits(sender_id);
    let mut candidates = vec![raw.clone()];

    let national = match raw.strip_prefix(COUNTRY_CODE) {
        Some(rest) if NATIONAL_LENGTHS.contains(&rest.len()) => rest.to_owned(),
        _ if NATIONAL_LENGTHS.contains(&raw.len()) => raw.clone(),
        _ => return candidates,
    };

    for variant in ninth_digit_variants(&national) {
        for form in [format!("{COUNTRY_CODE}{variant}"), variant] {
            if !candidates.contains(&form) {
                candidates.push(form);
            }
        }
    }
    candidates
}

/// The national number with and without the mobile ninth digit.
fn ninth_digit_variants(national: &str) -> Vec<String> {
    let (area, subscriber) = national.split_at(2);
    let mut variants = vec![national.to_owned()];
    match subscriber.len() {
        9 if subscriber.starts_with('9') => {
            variants.push(format!("{area}{}", &subscriber[1..]));
        }
        8 => variants.push(format!("{area}9{subscriber}")),
        _ => {}
    }
    variants
}
