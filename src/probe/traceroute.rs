//! Traceroute probe: runs the OS utility and turns its output into a route graph.

use crate::config::{HopLabelColumn, TracerouteConfig};
use crate::graph::{build_graph, RouteGraph};

use super::{run_command, validate_target, ProbeError};

/// Header lines `tracert` prints before the first hop.
pub const TRACERT_HEADER_LINES: usize = 4;

/// Run the configured traceroute utility against `target`.
///
/// A non-zero exit (for example an unreachable destination) still yields
/// whatever hops were printed; only a failure to launch is an error.
pub async fn run_traceroute(
    config: &TracerouteConfig,
    target: &str,
) -> Result<RouteGraph, ProbeError> {
    validate_target(target)?;

    let mut args: Vec<&str> = config.args.iter().map(String::as_str).collect();
    args.push(target);

    let output = run_command(&config.program, &args).await?;
    Ok(build_graph(parse_hops(
        &output,
        config.header_lines,
        config.label_column,
    )))
}

/// Extract hop labels from traceroute output.
///
/// The first `header_lines` lines are skipped. Every remaining non-blank line
/// with at least three whitespace-separated tokens is a hop; other lines are
/// ignored. A hop where every probe timed out (`3  * * *`, or tracert's
/// `Request timed out.`) has no address and is dropped, so unrelated
/// timeouts never share a node.
pub fn parse_hops(output: &str, header_lines: usize, column: HopLabelColumn) -> Vec<String> {
    output
        .lines()
        .skip(header_lines)
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 3 {
                return None;
            }
            let label = match column {
                HopLabelColumn::Last => {
                    if tokens.iter().skip(1).take(3).all(|t| *t == "*") {
                        return None;
                    }
                    tokens[tokens.len() - 1]
                }
                // a leading `*` is a lost first probe; the address follows
                HopLabelColumn::Second => tokens.iter().skip(1).copied().find(|t| *t != "*")?,
            };
            if label == "*" {
                return None;
            }
            Some(label.to_string())
        })
        .collect()
}

/// Parse `tracert` style output into a route graph.
pub fn parse_traceroute(output: &str) -> RouteGraph {
    build_graph(parse_hops(
        output,
        TRACERT_HEADER_LINES,
        HopLabelColumn::Last,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const TRACERT_OUTPUT: &str = "
Tracing route to dns.google [8.8.8.8]
over a maximum of 30 hops:

  1    <1 ms    <1 ms    <1 ms  192.168.1.1
  2     8 ms     7 ms     9 ms  10.20.0.1

  3    14 ms    13 ms    13 ms  8.8.8.8

Trace complete.
";

    const TRACEROUTE_OUTPUT: &str = "traceroute to 8.8.8.8 (8.8.8.8), 30 hops max, 60 byte packets
 1  192.168.1.1  0.412 ms  0.380 ms  0.371 ms
 2  10.20.0.1  8.101 ms  8.090 ms  8.213 ms
 3  8.8.8.8  13.552 ms  13.402 ms  13.377 ms
";

    #[test]
    fn test_parse_tracert_output() {
        let graph = parse_traceroute(TRACERT_OUTPUT);
        assert_eq!(graph.node_count(), 4);
        assert_eq!(graph.edge_count(), 3);
        assert!(graph.contains_edge("Start", "192.168.1.1"));
        assert!(graph.contains_edge("192.168.1.1", "10.20.0.1"));
        assert!(graph.contains_edge("10.20.0.1", "8.8.8.8"));
    }

    #[test]
    fn test_parse_unix_traceroute_output() {
        let hops = parse_hops(TRACEROUTE_OUTPUT, 1, HopLabelColumn::Second);
        assert_eq!(hops, vec!["192.168.1.1", "10.20.0.1", "8.8.8.8"]);
    }

    #[test]
    fn test_garbage_lines_are_skipped() {
        let output = "h1\nh2\nh3\nh4\nnot a\n\n  1  2  hop-a\nxx\n";
        assert_eq!(
            parse_hops(output, 4, HopLabelColumn::Last),
            vec!["hop-a"]
        );
    }

    #[test]
    fn test_timed_out_hops_are_dropped() {
        let unix = "traceroute to 8.8.8.8 (8.8.8.8), 30 hops max, 60 byte packets
 1  192.168.1.1  0.412 ms  0.380 ms  0.371 ms
 2  * * *
 3  * 10.20.0.1  8.090 ms  8.213 ms
 4  * * *
 5  8.8.8.8  13.552 ms  *  13.377 ms
";
        let graph = build_graph(parse_hops(unix, 1, HopLabelColumn::Second));
        assert_eq!(graph.nodes(), &["Start", "192.168.1.1", "10.20.0.1", "8.8.8.8"]);
        assert_eq!(graph.edge_count(), 3);

        let tracert = "
Tracing route to dns.google [8.8.8.8]
over a maximum of 30 hops:

  1    <1 ms    <1 ms    <1 ms  192.168.1.1
  2     *        *        *     Request timed out.
  3     *       12 ms    11 ms  10.20.0.1
  4     *        *        *     Request timed out.
  5    14 ms    13 ms    13 ms  8.8.8.8
";
        let graph = parse_traceroute(tracert);
        assert_eq!(graph.nodes(), &["Start", "192.168.1.1", "10.20.0.1", "8.8.8.8"]);
        assert_eq!(graph.edge_count(), 3);
    }

    #[test]
    fn test_short_output_yields_start_only() {
        let graph = parse_traceroute("only\ntwo lines");
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.edge_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_error() {
        let config = TracerouteConfig {
            program: "netnav-no-such-traceroute".to_string(),
            args: vec![],
            header_lines: 4,
            label_column: HopLabelColumn::Last,
            timeout: Duration::from_secs(5),
        };
        let result = run_traceroute(&config, "example.com").await;
        assert!(matches!(result, Err(ProbeError::Launch(_))));
    }

    #[tokio::test]
    async fn test_option_like_target_rejected() {
        let config = TracerouteConfig::default();
        let result = run_traceroute(&config, "-f").await;
        assert!(matches!(result, Err(ProbeError::Config(_))));
    }
}
