// src/config/duration.rs

//! Duration strings as written in workflow configs.
//!
//! Accepted forms:
//! - suffixed integers: `500ms`, `30s`, `5m`, `2h`
//! - ISO 8601 time durations: `PT30S`, `PT1M30S`, `PT2H`
//! - in delay lists, a repeat prefix: `3*PT10S` expands to three entries.

use std::time::Duration;

pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    if let Some(iso) = s.strip_prefix("PT").or_else(|| s.strip_prefix("pt")) {
        return parse_iso_time(iso).map_err(|e| format!("invalid duration '{s}': {e}"));
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration '{s}' is missing a unit suffix"))?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{num_part}': {e}"))?;

    match unit_part.trim().to_lowercase().as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        unit => Err(format!(
            "unsupported duration unit '{unit}'; expected ms, s, m, or h"
        )),
    }
}

fn parse_iso_time(body: &str) -> Result<Duration, String> {
    if body.is_empty() {
        return Err("no components after 'PT'".to_string());
    }
    let mut total = 0u64;
    let mut digits = String::new();
    for c in body.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let value: u64 = digits
            .parse()
            .map_err(|_| format!("component '{c}' has no number"))?;
        digits.clear();
        total += match c.to_ascii_uppercase() {
            'H' => value * 3600,
            'M' => value * 60,
            'S' => value,
            other => return Err(format!("unknown component '{other}'")),
        };
    }
    if !digits.is_empty() {
        return Err(format!("trailing number '{digits}' without unit"));
    }
    Ok(Duration::from_secs(total))
}

/// Parse a list of delays, expanding `N*<duration>` repeats.
pub fn parse_delays(items: &[String]) -> Result<Vec<Duration>, String> {
    let mut out = Vec::new();
    for item in items {
        match item.split_once('*') {
            Some((count, dur)) => {
                let count: usize = count
                    .trim()
                    .parse()
                    .map_err(|e| format!("invalid repeat count in '{item}': {e}"))?;
                let dur = parse_duration(dur)?;
                out.extend(std::iter::repeat_n(dur, count));
            }
            None => out.push(parse_duration(item)?),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_suffixed_and_iso_forms() {
        assert_eq!(parse_duration("500ms"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_duration("5m"), Ok(Duration::from_secs(300)));
        assert_eq!(parse_duration("PT1M30S"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_duration("PT2H"), Ok(Duration::from_secs(7200)));
        assert!(parse_duration("PT").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("10d").is_err());
    }

    #[test]
    fn expands_repeated_delays() {
        let items = vec!["2*PT10S".to_string(), "1m".to_string()];
        assert_eq!(
            parse_delays(&items),
            Ok(vec![
                Duration::from_secs(10),
                Duration::from_secs(10),
                Duration::from_secs(60)
            ])
        );
        assert!(parse_delays(&["x*1s".to_string()]).is_err());
    }
}
