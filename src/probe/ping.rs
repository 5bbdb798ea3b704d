//! Ping probe via the OS ping command.

use std::sync::OnceLock;

use regex::Regex;

use crate::config::PingConfig;

use super::{run_command, validate_target, ProbeError};

/// Run the ping utility against `target` and read the average round trip.
///
/// Returns `Ok(None)` when the command ran but reported no average (host
/// unreachable, every probe lost, unexpected output).
pub async fn run_ping(config: &PingConfig, target: &str) -> Result<Option<String>, ProbeError> {
    validate_target(target)?;

    let count = config.count.to_string();
    let output = run_command(
        &config.program,
        &[config.count_flag.as_str(), count.as_str(), target],
    )
    .await?;

    Ok(parse_ping_average(&output))
}

/// Extract the average latency from ping output.
///
/// Windows prints `Minimum = 10ms, Maximum = 20ms, Average = 15ms`; the text
/// after the last `=` of the last such line is returned verbatim. Otherwise
/// the Linux or macOS summary line is used and the average reported in ms.
pub fn parse_ping_average(output: &str) -> Option<String> {
    let windows = output
        .lines()
        .filter(|line| line.contains("Average"))
        .filter_map(|line| line.rsplit_once('='))
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
        .last();

    if let Some(value) = windows {
        return Some(value.to_string());
    }

    // Summary line "rtt min/avg/max/mdev = X/X/X/X ms" (Linux)
    // or "round-trip min/avg/max/stddev = X/X/X/X ms" (macOS)
    static SUMMARY: OnceLock<Option<Regex>> = OnceLock::new();
    let summary = SUMMARY
        .get_or_init(|| {
            Regex::new(
                r"(?:rtt|round-trip)\s+min/avg/max/(?:mdev|stddev)\s*=\s*([0-9.]+)/([0-9.]+)/([0-9.]+)",
            )
            .ok()
        })
        .as_ref()?;

    let caps = summary.captures(output)?;
    let avg = caps.get(2)?.as_str();
    Some(format!("{}ms", avg))
}
