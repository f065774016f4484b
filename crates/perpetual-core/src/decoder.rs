//! Server-sent-events decoding for streaming chat completions
//!
//! The transport hands over raw text chunks at arbitrary boundaries. The
//! decoder reassembles the line framing, extracts content deltas from
//! `data: ` payloads, and reports completion. It never produces an `Error`
//! event itself: a malformed payload line is dropped, not fatal, while
//! transport failures are surfaced by the caller.

use serde::Deserialize;

use crate::error::{Error, Result};

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "data: [DONE]";

/// Events emitted while decoding a response stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Incremental fragment of assistant content
    Delta(String),
    /// Stream completed cleanly
    Done,
    /// Stream failed; emitted by the transport layer, never by the decoder
    Error(String),
}

impl StreamEvent {
    /// Check if this is a terminal event (Done or Error)
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error(_))
    }
}

/// Incremental SSE decoder for one response stream.
///
/// State machine: Open -> Terminal on `Done`. Feeding a terminal decoder
/// fails with [`Error::InvalidState`].
#[derive(Debug, Default)]
pub struct StreamDecoder {
    /// Carry-over for a possibly-incomplete trailing line
    buffer: String,
    terminal: bool,
    malformed_lines: u32,
}

impl StreamDecoder {
    /// Create a decoder in the Open state
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume the next raw chunk from the transport and return the events
    /// decoded from every complete line it closed off.
    ///
    /// The final line fragment without a trailing newline is retained for
    /// the next call, never emitted.
    pub fn feed(&mut self, chunk: &str) -> Result<Vec<StreamEvent>> {
        if self.terminal {
            return Err(Error::InvalidState);
        }

        self.buffer.push_str(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim();

            if line.is_empty() {
                continue;
            }

            if line == DONE_SENTINEL {
                self.terminal = true;
                self.buffer.clear();
                events.push(StreamEvent::Done);
                break;
            }

            if let Some(payload) = line.strip_prefix(DATA_PREFIX) {
                if let Some(delta) = self.decode_payload(payload) {
                    events.push(StreamEvent::Delta(delta));
                }
            }
            // Non-blank lines without a data prefix (comments, event/id
            // fields) are ignored.
        }

        Ok(events)
    }

    /// Signal end-of-transport. A server that closes the connection without
    /// the `[DONE]` sentinel is treated as a clean completion.
    pub fn finish(&mut self) -> Result<Vec<StreamEvent>> {
        if self.terminal {
            return Err(Error::InvalidState);
        }
        self.terminal = true;
        Ok(vec![StreamEvent::Done])
    }

    /// Whether a terminal event has been emitted
    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Number of data lines dropped because their payload failed to parse
    pub fn malformed_lines(&self) -> u32 {
        self.malformed_lines
    }

    /// Parse one `data: ` payload, returning its content delta if present.
    ///
    /// A payload that is not valid JSON is dropped with a diagnostic; a
    /// valid record lacking the delta shape is silently ignored.
    fn decode_payload(&mut self, payload: &str) -> Option<String> {
        let chunk: StreamChunk = match serde_json::from_str(payload) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.malformed_lines += 1;
                tracing::debug!("dropping malformed stream payload: {e}");
                return None;
            }
        };

        chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|content| !content.is_empty())
    }
}

// Wire format of one streaming chunk. Only the delta content is of
// interest; everything else is tolerated and discarded.

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta_chunk(text: &str) -> String {
        format!(
            "data: {{\"choices\":[{{\"delta\":{{\"content\":{}}}}}]}}\n\n",
            serde_json::to_string(text).unwrap()
        )
    }

    fn deltas(events: &[StreamEvent]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Delta(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_single_chunk_stream() {
        let mut decoder = StreamDecoder::new();
        let input = format!("{}{}data: [DONE]\n", delta_chunk("Hello"), delta_chunk(", world"));

        let events = decoder.feed(&input).unwrap();
        assert_eq!(
            events,
            vec![
                StreamEvent::Delta("Hello".into()),
                StreamEvent::Delta(", world".into()),
                StreamEvent::Done,
            ]
        );
        assert!(decoder.is_terminal());
    }

    #[test]
    fn test_framing_invariant_under_arbitrary_splits() {
        let input = format!(
            "{}{}{}data: [DONE]\n",
            delta_chunk("The quick"),
            delta_chunk(" brown"),
            delta_chunk(" fox")
        );

        // Reference: the whole stream in one feed.
        let mut reference = StreamDecoder::new();
        let expected = reference.feed(&input).unwrap();

        // Re-feed the same bytes split at every possible boundary width,
        // including mid-line, mid-token, and mid-sentinel.
        for width in 1..=7 {
            let mut decoder = StreamDecoder::new();
            let mut events = Vec::new();
            let chars: Vec<char> = input.chars().collect();
            for piece in chars.chunks(width) {
                let piece: String = piece.iter().collect();
                events.extend(decoder.feed(&piece).unwrap());
            }
            assert_eq!(events, expected, "split width {width}");
        }
    }

    #[test]
    fn test_sentinel_terminates_and_refuses_input() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.feed("data: [DONE]\n").unwrap();
        assert_eq!(events, vec![StreamEvent::Done]);

        assert!(matches!(decoder.feed("data: x\n"), Err(Error::InvalidState)));
        assert!(matches!(decoder.finish(), Err(Error::InvalidState)));
    }

    #[test]
    fn test_sentinel_tolerates_surrounding_whitespace() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.feed("  data: [DONE]  \r\n").unwrap();
        assert_eq!(events, vec![StreamEvent::Done]);
    }

    #[test]
    fn test_finish_without_sentinel_is_clean_completion() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.feed(&delta_chunk("hi")).unwrap();
        assert_eq!(events, vec![StreamEvent::Delta("hi".into())]);

        let events = decoder.finish().unwrap();
        assert_eq!(events, vec![StreamEvent::Done]);
        assert!(matches!(decoder.finish(), Err(Error::InvalidState)));
    }

    #[test]
    fn test_malformed_line_dropped_between_valid_lines() {
        let mut decoder = StreamDecoder::new();
        let input = format!("{}data: {{not json\n{}", delta_chunk("a"), delta_chunk("b"));

        let events = decoder.feed(&input).unwrap();
        assert_eq!(deltas(&events), vec!["a", "b"]);
        assert_eq!(decoder.malformed_lines(), 1);
    }

    #[test]
    fn test_record_without_delta_shape_is_ignored() {
        let mut decoder = StreamDecoder::new();
        // Valid JSON, wrong shape: tolerated, not counted as malformed.
        let events = decoder
            .feed("data: {\"object\":\"chat.completion.chunk\"}\n")
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(decoder.malformed_lines(), 0);
    }

    #[test]
    fn test_empty_content_delta_suppressed() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.feed(&delta_chunk("")).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_blank_and_non_data_lines_ignored() {
        let mut decoder = StreamDecoder::new();
        let events = decoder
            .feed("\n: keepalive\nevent: message\n\n")
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(decoder.malformed_lines(), 0);
    }

    #[test]
    fn test_incomplete_trailing_line_carried_over() {
        let mut decoder = StreamDecoder::new();
        let full = delta_chunk("carry");
        let (head, tail) = full.split_at(10);

        assert!(decoder.feed(head).unwrap().is_empty());
        let events = decoder.feed(tail).unwrap();
        assert_eq!(deltas(&events), vec!["carry"]);
    }

    #[test]
    fn test_split_mid_sentinel() {
        let mut decoder = StreamDecoder::new();
        assert!(decoder.feed("data: [DO").unwrap().is_empty());
        let events = decoder.feed("NE]\n").unwrap();
        assert_eq!(events, vec![StreamEvent::Done]);
        assert!(decoder.is_terminal());
    }
}
