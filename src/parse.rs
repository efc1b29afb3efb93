//! Decoders for the ThinkGear text stream.
//!
//! Two layers, both free of I/O:
//!
//! | Item | Input | Output |
//! |---|---|---|
//! | [`LineAssembler`] | raw byte chunks of any size | complete text lines |
//! | [`parse_line`] | one text line | `Option<MetricSample>` |
//!
//! [`parse_line`] is a keyword heuristic, not a grammar. It is reached
//! through the [`LineDecoder`] trait so the ingestion thread can be handed a
//! stricter decoder without any change to the mapper or the channel plumbing.

use crate::protocol::{ATTENTION_KEYWORDS, BLINK_KEYWORDS, MEDITATION_KEYWORDS, SIGNAL_KEYWORDS};
use crate::types::{Metric, MetricSample};

// ── Line parser ───────────────────────────────────────────────────────────────

/// Keyword table in classification priority order.
const KEYWORDS: [(Metric, &[&str]); 4] = [
    (Metric::Attention, ATTENTION_KEYWORDS),
    (Metric::Meditation, MEDITATION_KEYWORDS),
    (Metric::Blink, BLINK_KEYWORDS),
    (Metric::SignalQuality, SIGNAL_KEYWORDS),
];

/// Return the first contiguous run of ASCII digits in `line` as an integer.
///
/// Returns `None` when the line has no digits or the run overflows `u32`.
///
/// ```
/// # use thinkgear_arm::parse::extract_int;
/// assert_eq!(extract_int("poorSignalLevel: 26"), Some(26));
/// assert_eq!(extract_int("ch2 = 40"), Some(2));
/// assert_eq!(extract_int("no digits"), None);
/// ```
pub fn extract_int(line: &str) -> Option<u32> {
    let start = line.find(|c: char| c.is_ascii_digit())?;
    let rest = &line[start..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    rest[..end].parse().ok()
}

/// Classify one line by keyword.
pub fn classify(line: &str) -> Option<Metric> {
    let lower = line.to_lowercase();
    KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| lower.contains(w)))
        .map(|(metric, _)| *metric)
}

/// Decode one telemetry line into a single-metric sample.
///
/// The metric is chosen by case-insensitive keyword match (attention,
/// meditation, blink, poor signal; first match wins); the value is the first
/// run of digits anywhere in the line. Anything else yields `None`.
///
/// ```
/// # use thinkgear_arm::parse::parse_line;
/// let s = parse_line("Attention:65\n").unwrap();
/// assert_eq!(s.attention, Some(65));
/// assert!(parse_line("noise xyz").is_none());
/// ```
pub fn parse_line(line: &str) -> Option<MetricSample> {
    let metric = classify(line)?;
    let value = extract_int(line)?;
    Some(MetricSample::single(metric, value))
}

/// Turns one complete telemetry line into a sample.
pub trait LineDecoder: Send {
    fn decode(&mut self, line: &str) -> Option<MetricSample>;
}

/// The keyword heuristic of [`parse_line`] as a [`LineDecoder`].
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordDecoder;

impl LineDecoder for KeywordDecoder {
    fn decode(&mut self, line: &str) -> Option<MetricSample> {
        parse_line(line)
    }
}

impl<F> LineDecoder for F
where
    F: FnMut(&str) -> Option<MetricSample> + Send,
{
    fn decode(&mut self, line: &str) -> Option<MetricSample> {
        self(line)
    }
}

// ── Stream reassembly ─────────────────────────────────────────────────────────

/// Residual size above which an unterminated fragment is thrown away.
///
/// A MindWave left in binary packet mode never sends a line terminator; without
/// this cap the residual would grow for as long as the port stays open.
pub const MAX_RESIDUAL_BYTES: usize = 4096;

/// Reassembles lines from a byte stream delivered in arbitrary chunks.
///
/// ```
/// # use thinkgear_arm::parse::LineAssembler;
/// let mut acc = LineAssembler::new();
/// assert!(acc.push(b"atten").is_empty());                 // incomplete
/// assert_eq!(acc.push(b"tion: 65\r\nmed"), ["attention: 65"]);
/// assert_eq!(acc.push(b"itation: 40\n"), ["meditation: 40"]);
/// ```
///
/// `\n`, `\r` and `\r\n` all terminate a line. Empty lines are dropped, so a
/// `\r\n` pair split across two chunks produces the same output as an unsplit
/// one. Splitting happens on bytes and decoding happens per complete line, so
/// a UTF-8 sequence cut in half by a chunk boundary is rejoined before it is
/// decoded; bytes that are still invalid become U+FFFD.
#[derive(Debug, Default)]
pub struct LineAssembler {
    residual: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self { residual: Vec::new() }
    }

    /// Append `chunk` and return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        if chunk.is_empty() {
            return lines;
        }
        self.residual.extend_from_slice(chunk);

        let mut start = 0;
        for (i, &b) in self.residual.iter().enumerate() {
            if b == b'\n' || b == b'\r' {
                if i > start {
                    lines.push(String::from_utf8_lossy(&self.residual[start..i]).into_owned());
                }
                start = i + 1;
            }
        }
        self.residual.drain(..start);

        if self.residual.len() > MAX_RESIDUAL_BYTES {
            log::debug!(
                "dropping {} unterminated bytes from the sensor stream",
                self.residual.len()
            );
            self.residual.clear();
        }
        lines
    }

    /// Take whatever unterminated fragment is buffered, as a final line.
    pub fn flush(&mut self) -> Option<String> {
        if self.residual.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.residual).into_owned();
        self.residual.clear();
        Some(line)
    }

    /// Number of buffered bytes that are not yet part of a complete line.
    pub fn pending(&self) -> usize {
        self.residual.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_and_digits_are_case_and_spacing_insensitive() {
        let expected = MetricSample { attention: Some(65), ..Default::default() };
        assert_eq!(parse_line("attention: 65"), Some(expected));
        assert_eq!(parse_line("Attention:65\n"), Some(expected));
        assert_eq!(parse_line("  ATTENTION 65  "), Some(expected));
    }

    #[test]
    fn each_metric_keyword_is_recognised() {
        assert_eq!(parse_line("meditation: 40").unwrap().meditation, Some(40));
        assert_eq!(parse_line("blinkStrength: 75").unwrap().blink_strength, Some(75));
        assert_eq!(parse_line("poorSignalLevel: 0").unwrap().signal_quality, Some(0));
        assert_eq!(parse_line("Poor Signal = 200").unwrap().signal_quality, Some(200));
    }

    #[test]
    fn unrecognised_or_digitless_lines_are_dropped() {
        assert_eq!(parse_line("noise xyz"), None);
        assert_eq!(parse_line("rawEeg: 512"), None);
        assert_eq!(parse_line("attention: --"), None);
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("attention: 99999999999999999999"), None);
    }

    #[test]
    fn first_keyword_in_priority_order_wins() {
        // Both keywords present: attention outranks meditation.
        let s = parse_line("meditation/attention 55").unwrap();
        assert_eq!(s.attention, Some(55));
        assert_eq!(s.meditation, None);

        // Blink outranks poor signal.
        let s = parse_line("blink during poor signal: 12").unwrap();
        assert_eq!(s.blink_strength, Some(12));
    }

    #[test]
    fn value_is_first_digit_run() {
        assert_eq!(parse_line("attention 42 (was 17)").unwrap().attention, Some(42));
    }

    #[test]
    fn closures_are_decoders() {
        let mut strict = |line: &str| {
            line.strip_prefix("A=")
                .and_then(|v| v.parse().ok())
                .map(|v| MetricSample::single(Metric::Attention, v))
        };
        assert_eq!(strict.decode("A=80").unwrap().attention, Some(80));
        assert_eq!(strict.decode("attention: 80"), None);
    }

    #[test]
    fn empty_chunks_produce_nothing() {
        let mut acc = LineAssembler::new();
        assert!(acc.push(b"").is_empty());
        assert!(acc.push(b"attention").is_empty());
        assert!(acc.push(b"").is_empty());
        assert_eq!(acc.pending(), "attention".len());
    }

    #[test]
    fn all_terminator_styles_split_lines() {
        let mut acc = LineAssembler::new();
        let lines = acc.push(b"a: 1\nb: 2\r\nc: 3\rd: 4\n\n\r\n");
        assert_eq!(lines, ["a: 1", "b: 2", "c: 3", "d: 4"]);
        assert_eq!(acc.pending(), 0);
    }

    #[test]
    fn split_at_every_offset_matches_unsplit() {
        let text = "poorSignalLevel: 0\r\nblinkStrength: 75\r\nattention: 80\nméditation: 7\n";
        let bytes = text.as_bytes();
        let whole = LineAssembler::new().push(bytes);
        assert_eq!(whole.len(), 4);

        for cut in 0..=bytes.len() {
            let mut acc = LineAssembler::new();
            let mut lines = acc.push(&bytes[..cut]);
            lines.extend(acc.push(&bytes[cut..]));
            assert_eq!(lines, whole, "split at byte {cut}");
        }
    }

    #[test]
    fn invalid_bytes_are_substituted_not_fatal() {
        let mut acc = LineAssembler::new();
        let lines = acc.push(b"atten\xFFtion: 65\n");
        assert_eq!(lines, ["atten\u{FFFD}tion: 65"]);
        assert_eq!(parse_line(&lines[0]), None);

        let lines = acc.push(b"\xC3attention: 70\n");
        assert_eq!(parse_line(&lines[0]).unwrap().attention, Some(70));
    }

    #[test]
    fn oversized_residual_is_discarded() {
        let mut acc = LineAssembler::new();
        let junk = vec![0xAAu8; MAX_RESIDUAL_BYTES + 1];
        assert!(acc.push(&junk).is_empty());
        assert_eq!(acc.pending(), 0);
        assert_eq!(acc.push(b"attention: 1\n"), ["attention: 1"]);
    }

    #[test]
    fn flush_returns_trailing_fragment_once() {
        let mut acc = LineAssembler::new();
        acc.push(b"blink: 9");
        assert_eq!(acc.flush().as_deref(), Some("blink: 9"));
        assert_eq!(acc.flush(), None);
    }
}
