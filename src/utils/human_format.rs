//! Human-readable formatting and parsing of byte sizes

const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
const THRESHOLD: f64 = 1024.0;

/// Formats a size in bytes to a human-readable string with appropriate units
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0B".to_string();
    }

    #[allow(clippy::cast_precision_loss)]
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= THRESHOLD && unit_index < UNITS.len() - 1 {
        size /= THRESHOLD;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{}{}", bytes, UNITS[unit_index])
    } else if size >= 10.0 {
        format!("{:.1}{}", size, UNITS[unit_index])
    } else {
        format!("{:.2}{}", size, UNITS[unit_index])
    }
}

/// Parses a byte size such as `1048576`, `512KiB`, `10MB` or `1.5 GB`.
///
/// Units are binary (1 KB = 1024 bytes) and case-insensitive; `KB`, `KiB`
/// and `K` are equivalent.
pub fn parse_byte_size(value: &str) -> Result<u64, String> {
    let trimmed = value.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);

    if number.is_empty() {
        return Err(format!("Invalid size '{value}': missing number"));
    }

    let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1 << 10,
        "m" | "mb" | "mib" => 1 << 20,
        "g" | "gb" | "gib" => 1 << 30,
        "t" | "tb" | "tib" => 1 << 40,
        other => return Err(format!("Invalid size '{value}': unknown unit '{other}'")),
    };

    if let Ok(whole) = number.parse::<u64>() {
        return whole
            .checked_mul(multiplier)
            .ok_or_else(|| format!("Invalid size '{value}': too large"));
    }

    let fractional: f64 = number
        .parse()
        .map_err(|e| format!("Invalid size '{value}': {e}"))?;

    #[allow(clippy::cast_precision_loss)]
    let bytes = fractional * multiplier as f64;
    if !bytes.is_finite() || bytes >= u64::MAX as f64 {
        return Err(format!("Invalid size '{value}': too large"));
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(bytes.round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0B");
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(1024), "1.00KB");
        assert_eq!(format_bytes(1536), "1.50KB");
        assert_eq!(format_bytes(1_048_576), "1.00MB");
        assert_eq!(format_bytes(10_485_760), "10.0MB");
        assert_eq!(format_bytes(104_857_600), "100.0MB");
        assert_eq!(format_bytes(1_073_741_824), "1.00GB");
    }

    #[test]
    fn test_parse_byte_size() {
        assert_eq!(parse_byte_size("1048576"), Ok(1_048_576));
        assert_eq!(parse_byte_size("1KiB"), Ok(1024));
        assert_eq!(parse_byte_size("512kb"), Ok(512 * 1024));
        assert_eq!(parse_byte_size("10MB"), Ok(10 * 1024 * 1024));
        assert_eq!(parse_byte_size(" 2 g "), Ok(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_byte_size("1.5MB"), Ok(1_572_864));
        assert_eq!(parse_byte_size("0"), Ok(0));
    }

    #[test]
    fn test_parse_byte_size_errors() {
        assert!(parse_byte_size("").is_err());
        assert!(parse_byte_size("MB").is_err());
        assert!(parse_byte_size("-5").is_err());
        assert!(parse_byte_size("10 parsecs").is_err());
        assert!(parse_byte_size("1.2.3MB").is_err());
        assert!(parse_byte_size("99999999999999TB").is_err());
    }
}
