//! Throughput extraction from benchmark report text.

use anyhow::{Context, Result, bail};
use regex::Regex;

/// Default report row: the tuned binary's summary line ending in `<float> MB/s`.
pub const DEFAULT_REPORT_PATTERN: &str = r"surge \(current\).*?│\s*([\d\.]+)\s*MB/s";

/// Compile a report pattern; it must expose at least one capture group for the value.
pub fn compile_report_pattern(pattern: &str) -> Result<Regex> {
    let regex = Regex::new(pattern).with_context(|| format!("compile report pattern {pattern}"))?;
    if regex.captures_len() < 2 {
        bail!("report pattern must contain a capture group for the throughput value");
    }
    Ok(regex)
}

/// First throughput figure matched in `output`, or `None` if no row matches or the
/// captured text is not a finite number.
pub fn extract_throughput(pattern: &Regex, output: &str) -> Option<f64> {
    let caps = pattern.captures(output)?;
    let value = caps.get(1)?.as_str().parse::<f64>().ok()?;
    value.is_finite().then_some(value)
}
