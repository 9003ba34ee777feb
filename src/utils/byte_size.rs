use once_cell::sync::Lazy;
use regex::Regex;

static BYTE_SIZE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(\d+(?:\.\d+)?)\s*([KMGT]?)B?\s*$").expect("byte size pattern is valid")
});

/// 解析内存阈值，单位按 1024 进位：`"500M"`、`"1.5G"`、`"200K"`、`"1048576"`
///
/// 非数字、零或溢出都返回 `None`
pub fn parse_byte_size(input: &str) -> Option<u64> {
    let captures = BYTE_SIZE.captures(input)?;
    let amount: f64 = captures.get(1)?.as_str().parse().ok()?;
    let unit = captures
        .get(2)
        .map(|m| m.as_str().to_ascii_uppercase())
        .unwrap_or_default();

    let multiplier: u64 = match unit.as_str() {
        "" => 1,
        "K" => 1024,
        "M" => 1024 * 1024,
        "G" => 1024 * 1024 * 1024,
        "T" => 1024 * 1024 * 1024 * 1024,
        _ => return None,
    };

    let bytes = amount * multiplier as f64;
    if bytes < 1.0 || bytes >= u64::MAX as f64 {
        return None;
    }
    Some(bytes.round() as u64)
}

/// 转回人类可读的写法，只在能整除时使用较大的单位
pub fn format_byte_size(bytes: u64) -> String {
    const UNITS: [(&str, u64); 4] = [
        ("T", 1024 * 1024 * 1024 * 1024),
        ("G", 1024 * 1024 * 1024),
        ("M", 1024 * 1024),
        ("K", 1024),
    ];
    for (suffix, size) in UNITS {
        if bytes >= size && bytes % size == 0 {
            return format!("{}{}", bytes / size, suffix);
        }
    }
    format!("{}B", bytes)
}
