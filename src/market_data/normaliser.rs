// Convert wire strings into internal integer cents.
// Fixed scale: two decimal places, extra digits truncated.

pub const CENTS_PER_DOLLAR: i64 = 100;

pub fn dollars_to_cents(s: &str) -> Option<i64> {
    let s = s.trim();
    let (negative, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let (integer_part, decimal_part) = match s.find('.') {
        Some(dot_pos) => (&s[..dot_pos], &s[dot_pos + 1..]),
        None => (s, ""),
    };
    if integer_part.is_empty() && decimal_part.is_empty() {
        return None;
    }

    let integer: i64 = if integer_part.is_empty() { 0 } else { integer_part.parse().ok()? };
    // Pad or truncate decimal part to two digits
    let decimal: i64 = if decimal_part.is_empty() {
        0
    } else {
        if !decimal_part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let padded = format!("{:0<2}", decimal_part);
        padded[..2].parse().ok()?
    };

    let cents = integer.checked_mul(CENTS_PER_DOLLAR)?.checked_add(decimal)?;
    Some(if negative { -cents } else { cents })
}

pub fn cents_to_dollars(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dollars_to_cents() {
        assert_eq!(dollars_to_cents("101.25"), Some(10_125));
        assert_eq!(dollars_to_cents("101.2"), Some(10_120));
        assert_eq!(dollars_to_cents("101.259"), Some(10_125));
        assert_eq!(dollars_to_cents("99"), Some(9_900));
        assert_eq!(dollars_to_cents(" .5 "), Some(50));
        assert_eq!(dollars_to_cents("-1.05"), Some(-105));
        assert_eq!(dollars_to_cents("abc"), None);
        assert_eq!(dollars_to_cents("1.x"), None);
        assert_eq!(dollars_to_cents(""), None);
    }

    #[test]
    fn test_cents_to_dollars() {
        assert_eq!(cents_to_dollars(10_125), "101.25");
        assert_eq!(cents_to_dollars(5), "0.05");
        assert_eq!(cents_to_dollars(-20_000), "-200.00");
    }
}
