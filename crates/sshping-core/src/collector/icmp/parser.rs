//! Parser for `ping` statistics output.
//!
//! Pure function over the raw text, no I/O. Works line by line with a single
//! accumulator:
//!
//! ```text
//! --- 10.0.0.1 ping statistics ---                       <- header: new record
//! 5 packets transmitted, 5 received, 0% packet loss, ...  <- loss + status
//! rtt min/avg/max/mdev = 0.045/0.061/0.089/0.015 ms      <- RTT fields
//! ```
//!
//! Each header starts a fresh record, so with several statistics blocks only
//! the last one survives. Lines before the first header are ignored.
//!
//! Lines are recognised by keyword rather than by a strict pattern, which also
//! covers BSD (`0.0% packet loss`, `round-trip min/avg/max/stddev`) and the
//! `+N errors` variant of Linux iputils. A recognised line whose numbers do not
//! parse is a [`ParseError`], distinct from "no statistics found".

/// Probe outcome derived from the packet loss line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    Up,
    Down,
}

/// Structured result of one probe.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeResult {
    /// Name printed in the statistics header.
    pub target: String,
    /// Device that ran the probe; filled in by the caller.
    pub source: String,
    /// `None` when no loss line followed the header (undetermined).
    pub status: Option<ProbeStatus>,
    pub packet_loss_percent: f64,
    pub rtt_min_ms: f64,
    pub rtt_avg_ms: f64,
    pub rtt_max_ms: f64,
}

impl ProbeResult {
    /// True when no statistics header was found.
    pub fn is_empty(&self) -> bool {
        self.target.is_empty()
    }
}

/// A recognised statistics line carried a malformed number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub field: &'static str,
    pub text: String,
}

impl ParseError {
    pub fn new(field: &'static str, text: impl Into<String>) -> Self {
        Self {
            field,
            text: text.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed {} value {:?}", self.field, self.text)
    }
}

impl std::error::Error for ParseError {}

const HEADER_PREFIX: &str = "--- ";
const HEADER_SUFFIX: &str = " ping statistics ---";
const LOSS_MARKER: &str = "% packet loss";
const RTT_MARKER: &str = "min/avg/max";

/// Parses raw probe output.
///
/// Returns an empty [`ProbeResult`] when no statistics header is present.
pub fn parse_probe_output(output: &str) -> Result<ProbeResult, ParseError> {
    let mut current: Option<ProbeResult> = None;

    for line in output.lines() {
        if let Some(target) = parse_header(line) {
            current = (!target.is_empty()).then(|| ProbeResult {
                target: target.to_string(),
                ..ProbeResult::default()
            });
            continue;
        }

        let Some(record) = current.as_mut() else {
            continue;
        };

        if let Some(loss) = parse_loss(line) {
            let loss = loss?;
            record.packet_loss_percent = loss;
            record.status = Some(if loss == 100.0 {
                ProbeStatus::Down
            } else {
                ProbeStatus::Up
            });
        }

        if let Some(rtt) = parse_rtt(line) {
            let (min, avg, max) = rtt?;
            record.rtt_min_ms = min;
            record.rtt_avg_ms = avg;
            record.rtt_max_ms = max;
        }
    }

    Ok(current.unwrap_or_default())
}

/// Max minus min RTT, truncated (not rounded) to 3 decimal places.
pub fn jitter_ms(rtt_min_ms: f64, rtt_max_ms: f64) -> f64 {
    // The epsilon absorbs binary representation error (0.3 - 0.1 = 0.19999...).
    ((rtt_max_ms - rtt_min_ms) * 1000.0 + 1e-6).trunc() / 1000.0
}

fn parse_header(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix(HEADER_PREFIX)?;
    let end = rest.rfind(HEADER_SUFFIX)?;
    Some(rest[..end].trim())
}

fn parse_loss(line: &str) -> Option<Result<f64, ParseError>> {
    let idx = line.find(LOSS_MARKER)?;
    let token = line[..idx]
        .rsplit(|c: char| c == ',' || c.is_whitespace())
        .next()
        .unwrap_or_default();
    Some(parse_number("packet loss", token))
}

fn parse_rtt(line: &str) -> Option<Result<(f64, f64, f64), ParseError>> {
    let start = line.find(RTT_MARKER)?;
    let after = &line[start + RTT_MARKER.len()..];
    let (_, values) = after.split_once('=')?;
    let values = values.trim_start();
    let end = values.find("ms")?;
    let fields: Vec<&str> = values[..end].trim().split('/').collect();
    if fields.len() < 3 {
        return Some(Err(ParseError::new("rtt", values[..end].trim())));
    }
    Some(rtt_triplet(&fields))
}

fn rtt_triplet(fields: &[&str]) -> Result<(f64, f64, f64), ParseError> {
    Ok((
        parse_number("rtt min", fields[0])?,
        parse_number("rtt avg", fields[1])?,
        parse_number("rtt max", fields[2])?,
    ))
}

/// Accepts plain integer or decimal text only (no signs, exponents or `inf`).
fn parse_number(field: &'static str, text: &str) -> Result<f64, ParseError> {
    let text = text.trim();
    let well_formed = text.chars().any(|c| c.is_ascii_digit())
        && text.chars().all(|c| c.is_ascii_digit() || c == '.');
    if !well_formed {
        return Err(ParseError::new(field, text));
    }
    text.parse().map_err(|_| ParseError::new(field, text))
}
