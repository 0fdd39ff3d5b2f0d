/// Country code assumed for bare 10-digit national numbers.
const HOME_COUNTRY_CODE: &str = "1";

/// Best-effort conversion of a free-form phone number to an E.164-like string.
///
/// This is not validation: anything that is not recognizably a home-country
/// number is passed through with a `+` prefix and left for the gateway to
/// accept or reject.
pub fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    if digits.len() == 10 {
        return format!("+{}{}", HOME_COUNTRY_CODE, digits);
    }
    if digits.len() == 11 && digits.starts_with(HOME_COUNTRY_CODE) {
        return format!("+{}", digits);
    }
    // Already international (`+44 7911 ...`) or unrecognized: keep the digits.
    format!("+{}", digits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn national_numbers_get_home_country_code() {
        assert_eq!(normalize_phone("(555) 123-4567"), "+15551234567");
        assert_eq!(normalize_phone("555.123.4567"), "+15551234567");
    }

    #[test]
    fn eleven_digits_with_leading_country_code() {
        assert_eq!(normalize_phone("1-555-123-4567"), "+15551234567");
        assert_eq!(normalize_phone("+1 (555) 123-4567"), "+15551234567");
    }

    #[test]
    fn international_numbers_pass_through() {
        assert_eq!(normalize_phone("+447911123456"), "+447911123456");
        assert_eq!(normalize_phone("+44 7911 123456"), "+447911123456");
    }

    #[test]
    fn malformed_input_is_not_rejected() {
        assert_eq!(normalize_phone("12345"), "+12345");
        assert_eq!(normalize_phone("25555123456"), "+25555123456");
        assert_eq!(normalize_phone("call me"), "+");
    }
}
