use std::time::Duration;

use tokio::time::Instant;
use tonic::metadata::MetadataMap;

const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Deadline of a call: the caller's `grpc-timeout` if it sent one, never later than `cap`.
///
/// A missing or malformed header falls back to `cap`.
pub(crate) fn call_deadline(metadata: &MetadataMap, cap: Duration) -> Instant {
    let requested = metadata
        .get(GRPC_TIMEOUT_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_grpc_timeout);

    let timeout = match requested {
        Some(requested) => requested.min(cap),
        None => cap,
    };

    Instant::now() + timeout
}

/// Parse a `grpc-timeout` value: at most eight ASCII digits followed by one unit character.
fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if !value.is_ascii() || value.len() < 2 || value.len() > 9 {
        return None;
    }

    let (digits, unit) = value.split_at(value.len() - 1);
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;

    let timeout = match unit {
        "H" => Duration::from_secs(amount * 60 * 60),
        "M" => Duration::from_secs(amount * 60),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };

    Some(timeout)
}
