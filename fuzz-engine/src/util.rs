use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use scenario_fuzz_core::ranges::Range;

pub fn now_unix_s() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub fn parse_seed(seed: &str) -> Result<u64> {
    let s = seed.trim();
    if s.is_empty() {
        return Err(anyhow!("empty seed"));
    }
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).with_context(|| format!("invalid hex seed: {s}"))
    } else {
        s.parse::<u64>()
            .with_context(|| format!("invalid decimal seed: {s}"))
    }
}

/// Parse `name=min:max` into a user range override.
pub fn parse_range_override(input: &str) -> Result<(String, Range)> {
    let (name, range) = input
        .split_once('=')
        .ok_or_else(|| anyhow!("expected name=min:max, got '{input}'"))?;
    let (min, max) = range
        .split_once(':')
        .ok_or_else(|| anyhow!("expected name=min:max, got '{input}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(anyhow!("override '{input}' has an empty parameter name"));
    }
    let min: f64 = min
        .trim()
        .parse()
        .with_context(|| format!("invalid lower bound in override '{input}'"))?;
    let max: f64 = max
        .trim()
        .parse()
        .with_context(|| format!("invalid upper bound in override '{input}'"))?;
    Ok((name.to_string(), (min, max)))
}
