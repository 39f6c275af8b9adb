//! Field-type-specific canonical forms, applied before hashing.

use common::record::FieldType;
use common::VaultError;

/// Digit bounds of an E.164 number, country code included.
const MIN_PHONE_DIGITS: usize = 7;
const MAX_PHONE_DIGITS: usize = 15;

/// National numbers of this many digits or fewer get the default country code.
const MAX_NATIONAL_DIGITS: usize = 10;

/// Canonical form of `value` for `field_type`.
///
/// # Errors
///
/// Returns [`VaultError::EmptyOrInvalidSearchInput`] for blank input and for
/// phone numbers that cannot be put in `+<digits>` form.
pub fn normalize(
    field_type: FieldType,
    value: &str,
    default_country_code: &str,
) -> Result<String, VaultError> {
    let normalized = match field_type {
        FieldType::FirstName | FieldType::LastName | FieldType::Address => collapse(value),
        FieldType::Email => value.trim().to_lowercase(),
        FieldType::Phone => normalize_phone(value, default_country_code)?,
    };
    if normalized.is_empty() {
        return Err(VaultError::EmptyOrInvalidSearchInput(format!(
            "{field_type} is empty"
        )));
    }
    Ok(normalized)
}

/// Lower-case, trim and collapse inner whitespace runs to one space.
fn collapse(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn normalize_phone(value: &str, default_country_code: &str) -> Result<String, VaultError> {
    let trimmed = value.trim();
    let invalid = || VaultError::EmptyOrInvalidSearchInput("phone number is invalid".into());

    let (explicit_plus, rest) = match trimmed.strip_prefix('+') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    if !rest
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '-' | '.' | '(' | ')' | '/'))
    {
        return Err(invalid());
    }

    let digits: String = rest.chars().filter(char::is_ascii_digit).collect();
    let international = if explicit_plus {
        digits
    } else if let Some(stripped) = digits.strip_prefix("00") {
        stripped.to_owned()
    } else {
        let national = digits.strip_prefix('0').unwrap_or(&digits);
        if national.len() <= MAX_NATIONAL_DIGITS {
            format!("{default_country_code}{national}")
        } else {
            national.to_owned()
        }
    };

    if !(MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&international.len()) {
        return Err(invalid());
    }
    Ok(format!("+{international}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phone(v: &str) -> Result<String, VaultError> {
        normalize(FieldType::Phone, v, "1")
    }

    #[test]
    fn names_are_trimmed_lowercased_and_collapsed() {
        assert_eq!(normalize(FieldType::FirstName, "  Jane ", "1").unwrap(), "jane");
        assert_eq!(
            normalize(FieldType::LastName, "Van   der\tBerg", "1").unwrap(),
            "van der berg"
        );
    }

    #[test]
    fn emails_are_trimmed_and_lowercased() {
        assert_eq!(
            normalize(FieldType::Email, " Jane.Doe@Example.COM ", "1").unwrap(),
            "jane.doe@example.com"
        );
    }

    #[test]
    fn blank_input_is_rejected() {
        for ft in [FieldType::FirstName, FieldType::Email, FieldType::Address] {
            assert!(matches!(
                normalize(ft, "   ", "1"),
                Err(VaultError::EmptyOrInvalidSearchInput(_))
            ));
        }
    }

    #[test]
    fn phone_formats_collide() {
        let expected = "+15551234567";
        assert_eq!(phone("(555) 123-4567").unwrap(), expected);
        assert_eq!(phone("555.123.4567").unwrap(), expected);
        assert_eq!(phone("+1 555 123 4567").unwrap(), expected);
        assert_eq!(phone("001-555-123-4567").unwrap(), expected);
        assert_eq!(phone("1 555 123 4567").unwrap(), expected);
    }

    #[test]
    fn trunk_prefix_is_dropped() {
        assert_eq!(
            normalize(FieldType::Phone, "07700 900123", "44").unwrap(),
            "+447700900123"
        );
        assert_eq!(
            normalize(FieldType::Phone, "+44 7700 900123", "44").unwrap(),
            "+447700900123"
        );
    }

    #[test]
    fn invalid_phones_are_rejected() {
        assert!(phone("").is_err());
        assert!(phone("12").is_err());
        assert!(phone("+1234567890123456").is_err());
        assert!(phone("555-CALL-NOW").is_err());
    }
}
