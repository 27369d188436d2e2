//! Human-readable number formatting for claims and messages

/// Round to a whole number and group thousands with commas: `80000.4` → `"80,000"`.
pub fn format_thousands(value: f64) -> String {
    let rounded = value.round();
    let negative = rounded < 0.0;
    let digits = format!("{:.0}", rounded.abs());

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    if negative {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

/// Compact FDV display: `2.5M`, `1.2B`, `850.0K`, `420`
pub fn format_fdv(fdv: f64) -> String {
    if fdv >= 1_000_000_000.0 {
        format!("{:.1}B", fdv / 1_000_000_000.0)
    } else if fdv >= 1_000_000.0 {
        format!("{:.1}M", fdv / 1_000_000.0)
    } else if fdv >= 1_000.0 {
        format!("{:.1}K", fdv / 1_000.0)
    } else {
        format!("{:.0}", fdv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_thousands() {
        assert_eq!(format_thousands(5000.0), "5,000");
        assert_eq!(format_thousands(80_000.4), "80,000");
        assert_eq!(format_thousands(1_234_567.0), "1,234,567");
        assert_eq!(format_thousands(999.0), "999");
        assert_eq!(format_thousands(0.0), "0");
        assert_eq!(format_thousands(-12_500.0), "-12,500");
    }

    #[test]
    fn test_format_fdv() {
        assert_eq!(format_fdv(2_500_000.0), "2.5M");
        assert_eq!(format_fdv(1_200_000_000.0), "1.2B");
        assert_eq!(format_fdv(850_000.0), "850.0K");
        assert_eq!(format_fdv(420.0), "420");
    }
}
