//! Parse Kubernetes resource Quantity strings to numeric values.
//! CPU is parsed to millicores, memory to bytes.

/// Parse CPU quantity string (e.g. "500m", "2", "0.5") to millicores.
pub fn parse_cpu_str(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Some(m) = s.strip_suffix('m') {
        if let Ok(n) = m.parse::<i64>() {
            return Some(n);
        }
    }
    if let Some(n) = s.strip_suffix('n').and_then(|n| n.parse::<i64>().ok()) {
        // Nanocores show up in metrics.k8s.io responses.
        return Some(n / 1_000_000);
    }
    if let Ok(n) = s.parse::<f64>() {
        return Some((n * 1000.0) as i64);
    }
    None
}

/// Parse memory quantity string (e.g. "256Mi", "1Gi", "128974848") to bytes.
/// Binary suffixes (Ki/Mi/Gi/Ti/Pi) are 1024-based, decimal (k/M/G/T/P) 1000-based.
pub fn parse_memory_str(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    const BINARY: &[(&str, i64)] = &[
        ("Ki", 1 << 10),
        ("Mi", 1 << 20),
        ("Gi", 1 << 30),
        ("Ti", 1 << 40),
        ("Pi", 1 << 50),
    ];
    const DECIMAL: &[(&str, i64)] = &[
        ("k", 1_000),
        ("K", 1_000),
        ("M", 1_000_000),
        ("G", 1_000_000_000),
        ("T", 1_000_000_000_000),
        ("P", 1_000_000_000_000_000),
    ];
    for (suffix, unit) in BINARY {
        if let Some(num) = s.strip_suffix(suffix) {
            let n: f64 = num.parse().ok()?;
            return Some((n * *unit as f64) as i64);
        }
    }
    for (suffix, unit) in DECIMAL {
        if let Some(num) = s.strip_suffix(suffix) {
            let n: f64 = num.parse().ok()?;
            return Some((n * *unit as f64) as i64);
        }
    }
    if let Ok(n) = s.parse::<i64>() {
        return Some(n);
    }
    s.parse::<f64>().ok().map(|n| n as i64)
}

/// Format CPU millicores for display (e.g. 330 -> "330m", 2000 -> "2").
pub fn format_cpu_millis(millis: i64) -> String {
    if millis % 1000 == 0 {
        format!("{}", millis / 1000)
    } else {
        format!("{}m", millis)
    }
}

/// Format memory bytes as the largest whole binary unit (e.g. 2147483648 -> "2.0Gi").
pub fn format_memory_bytes(bytes: i64) -> String {
    const GIB: f64 = (1u64 << 30) as f64;
    const MIB: f64 = (1u64 << 20) as f64;
    let b = bytes as f64;
    if b >= GIB {
        format!("{:.1}Gi", b / GIB)
    } else if b >= MIB {
        format!("{:.0}Mi", b / MIB)
    } else {
        format!("{}", bytes)
    }
}
