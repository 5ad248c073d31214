use regex::Regex;
use std::sync::LazyLock;

/// `<number>[<exponent>][<suffix>]`, e.g. `500m`, `1.5Gi`, `2e3`, `4`.
static QUANTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\+?([0-9]+(?:\.[0-9]*)?|\.[0-9]+)(?:[eE]([+-]?[0-9]+))?(Ki|Mi|Gi|Ti|Pi|Ei|n|u|m|k|M|G|T|P|E)?$")
        .expect("quantity regex is valid")
});

/// Parse a Kubernetes-style quantity string into an integer.
///
/// When `milli` is set the result is expressed in thousandths of a unit
/// (`"1"` → 1000, `"250m"` → 250), which is how CPU is stored.
/// Fractional results are rounded up, as the API server does.
/// Returns `None` for malformed or negative input.
pub fn parse_quantity(raw: &str, milli: bool) -> Option<i64> {
    let caps = QUANTITY_RE.captures(raw.trim())?;
    let number = caps.get(1)?.as_str();

    let (int_part, frac_part) = match number.split_once('.') {
        Some((i, f)) => (i, f),
        None => (number, ""),
    };
    let digits = format!("{}{}", int_part, frac_part);
    let mut mantissa: i128 = if digits.is_empty() {
        0
    } else {
        digits.parse().ok()?
    };

    let mut exp10: i32 = -(frac_part.len() as i32);
    if let Some(e) = caps.get(2) {
        exp10 = exp10.checked_add(e.as_str().parse::<i32>().ok()?)?;
    }
    if milli {
        exp10 = exp10.checked_add(3)?;
    }

    match caps.get(3).map(|m| m.as_str()) {
        None => {}
        Some(suffix) => match binary_power(suffix) {
            Some(pow) => mantissa = mantissa.checked_mul(1i128.checked_shl(pow)?)?,
            None => exp10 = exp10.checked_add(decimal_power(suffix)?)?,
        },
    }

    Some(scale(mantissa, exp10))
}

/// Format a milli-unit value the way quantities are usually written.
pub fn format_milli(value: i64) -> String {
    if value % 1000 == 0 {
        (value / 1000).to_string()
    } else {
        format!("{}m", value)
    }
}

fn binary_power(suffix: &str) -> Option<u32> {
    match suffix {
        "Ki" => Some(10),
        "Mi" => Some(20),
        "Gi" => Some(30),
        "Ti" => Some(40),
        "Pi" => Some(50),
        "Ei" => Some(60),
        _ => None,
    }
}

fn decimal_power(suffix: &str) -> Option<i32> {
    match suffix {
        "n" => Some(-9),
        "u" => Some(-6),
        "m" => Some(-3),
        "k" => Some(3),
        "M" => Some(6),
        "G" => Some(9),
        "T" => Some(12),
        "P" => Some(15),
        "E" => Some(18),
        _ => None,
    }
}

/// mantissa × 10^exp10, rounded up and clamped to the i64 range.
fn scale(mantissa: i128, exp10: i32) -> i64 {
    if mantissa == 0 {
        return 0;
    }
    let value = if exp10 >= 0 {
        let mut v = mantissa;
        for _ in 0..exp10 {
            v = match v.checked_mul(10) {
                Some(n) => n,
                None => return i64::MAX,
            };
        }
        v
    } else {
        let divisor = 10i128.checked_pow(exp10.unsigned_abs());
        match divisor {
            Some(d) => (mantissa + d - 1) / d,
            None => 1,
        }
    };
    i64::try_from(value).unwrap_or(i64::MAX)
}
