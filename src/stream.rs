//! Incremental decoder for Ollama's newline-delimited JSON response stream.
//!
//! Network chunks arrive at arbitrary boundaries, so bytes are accumulated
//! in a carry-over buffer and only complete `\n`-terminated lines are
//! parsed. Buffering at the byte level also means a multi-byte UTF-8
//! code point split across chunks is reassembled before any string
//! conversion happens.
//!
//! Each complete line is an independent JSON record. Records come in three
//! known shapes, checked in priority order: `{"response": ...}` from
//! `/api/generate`, `{"message":{"content": ...}}` from `/api/chat`, and
//! `{"error": ...}`. Anything else (the `{"done":true}` terminator, stats
//! records) yields no fragment. A line that is not valid JSON is logged and
//! skipped; it never aborts the stream.

use serde::Deserialize;
use tracing::{error, warn};

/// Receives the text fragments extracted from a stream.
///
/// The first fragment of a session arrives via [`replace`], every later
/// one via [`append`]. A consumer that pre-seeded its transcript entry
/// with placeholder text is overwritten cleanly on first data instead of
/// accumulating the placeholder.
///
/// [`replace`]: FragmentSink::replace
/// [`append`]: FragmentSink::append
pub trait FragmentSink {
    fn replace(&mut self, text: &str);
    fn append(&mut self, text: &str);
}

/// One decoded stream record. Variant order is the extraction priority:
/// a record carrying both `response` and `message` uses `response`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StreamRecord {
    Generate { response: String },
    Chat { message: ChatContent },
    Error { error: String },
}

#[derive(Debug, Deserialize)]
struct ChatContent {
    content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingFirst,
    Streaming,
}

/// Push-style decoder: feed byte chunks, fragments come out through the
/// sink. Call [`finish`](StreamDecoder::finish) at end-of-stream so a
/// final line without a trailing line feed is still delivered.
#[derive(Debug)]
pub struct StreamDecoder {
    carry: Vec<u8>,
    phase: Phase,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self {
            carry: Vec::new(),
            phase: Phase::AwaitingFirst,
        }
    }

    /// Feed one chunk of the response body, emitting a fragment for every
    /// complete line it finishes. The unterminated tail stays buffered.
    pub fn feed(&mut self, chunk: &[u8], sink: &mut dyn FragmentSink) {
        self.carry.extend_from_slice(chunk);
        while let Some(pos) = self.carry.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.carry.drain(..=pos).collect();
            self.emit_line(&line[..pos], sink);
        }
    }

    /// Signal end-of-stream. A trailing partial line is parsed as a final
    /// record; some servers close the body without a terminating line feed.
    pub fn finish(mut self, sink: &mut dyn FragmentSink) {
        let rest = std::mem::take(&mut self.carry);
        self.emit_line(&rest, sink);
    }

    fn emit_line(&mut self, line: &[u8], sink: &mut dyn FragmentSink) {
        let line = match line {
            [head @ .., b'\r'] => head,
            other => other,
        };
        if line.is_empty() {
            return;
        }

        let value: serde_json::Value = match serde_json::from_slice(line) {
            Ok(value) => value,
            Err(err) => {
                warn!(%err, line = %String::from_utf8_lossy(line), "skipping malformed stream line");
                return;
            }
        };

        let fragment = match serde_json::from_value::<StreamRecord>(value) {
            Ok(StreamRecord::Generate { response }) => response,
            Ok(StreamRecord::Chat { message }) => message.content,
            Ok(StreamRecord::Error { error }) => {
                error!(%error, "server reported an error mid-stream");
                format!("\n\nERRO: {error}")
            }
            // Unrecognized but valid JSON ({"done":true} and friends).
            Err(_) => return,
        };

        match self.phase {
            Phase::AwaitingFirst => {
                sink.replace(&fragment);
                self.phase = Phase::Streaming;
            }
            Phase::Streaming => sink.append(&fragment),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sink that records every call so tests can assert on the
    /// replace/append distinction as well as the final text.
    #[derive(Default)]
    struct Recorder {
        text: String,
        replaces: usize,
        appends: usize,
    }

    impl FragmentSink for Recorder {
        fn replace(&mut self, text: &str) {
            self.text = text.to_string();
            self.replaces += 1;
        }

        fn append(&mut self, text: &str) {
            self.text.push_str(text);
            self.appends += 1;
        }
    }

    fn decode(chunks: &[&[u8]]) -> Recorder {
        let mut sink = Recorder::default();
        let mut decoder = StreamDecoder::new();
        for chunk in chunks {
            decoder.feed(chunk, &mut sink);
        }
        decoder.finish(&mut sink);
        sink
    }

    #[test]
    fn concatenates_fragments_in_line_order() {
        let sink = decode(&[b"{\"response\":\"Hel\"}\n{\"response\":\"lo\"}\n"]);
        assert_eq!(sink.text, "Hello");
    }

    #[test]
    fn first_fragment_replaces_rest_append() {
        let sink = decode(&[b"{\"response\":\"a\"}\n{\"response\":\"b\"}\n{\"response\":\"c\"}\n"]);
        assert_eq!(sink.replaces, 1);
        assert_eq!(sink.appends, 2);
        assert_eq!(sink.text, "abc");
    }

    #[test]
    fn line_split_across_chunks_is_reassembled() {
        let sink = decode(&[b"{\"respon", b"se\":\"Hel\"}\n{\"resp", b"onse\":\"lo\"}\n"]);
        assert_eq!(sink.text, "Hello");
    }

    #[test]
    fn utf8_code_point_split_across_chunks() {
        // "çã" is four bytes; cut the stream in the middle of "ç".
        let bytes = "{\"response\":\"maçã\"}\n".as_bytes();
        let sink = decode(&[&bytes[..16], &bytes[16..]]);
        assert_eq!(sink.text, "maçã");
    }

    #[test]
    fn malformed_line_is_skipped_not_fatal() {
        let sink = decode(&[b"{\"response\":\"A\"}\nnot json\n{\"response\":\"B\"}\n"]);
        assert_eq!(sink.text, "AB");
        assert_eq!(sink.replaces, 1);
        assert_eq!(sink.appends, 1);
    }

    #[test]
    fn chat_shape_content_is_extracted() {
        let sink = decode(&[b"{\"message\":{\"content\":\"oi\"}}\n"]);
        assert_eq!(sink.text, "oi");
    }

    #[test]
    fn response_takes_priority_over_message() {
        let sink =
            decode(&[b"{\"response\":\"ganha\",\"message\":{\"content\":\"perde\"}}\n"]);
        assert_eq!(sink.text, "ganha");
    }

    #[test]
    fn error_record_is_annotated_inline() {
        let sink = decode(&[b"{\"error\":\"model not found\"}\n"]);
        assert!(sink.text.contains("ERRO: model not found"));
    }

    #[test]
    fn error_mid_stream_does_not_abort() {
        let sink = decode(&[b"{\"response\":\"x\"}\n{\"error\":\"boom\"}\n{\"response\":\"y\"}\n"]);
        assert_eq!(sink.text, "x\n\nERRO: boomy");
    }

    #[test]
    fn unrecognized_records_are_ignored() {
        let sink = decode(&[
            b"{\"done\":true,\"total_duration\":12}\n{\"response\":\"ok\"}\n{\"done\":true}\n",
        ]);
        assert_eq!(sink.text, "ok");
        assert_eq!(sink.replaces, 1);
        assert_eq!(sink.appends, 0);
    }

    #[test]
    fn empty_lines_yield_nothing() {
        let sink = decode(&[b"\n\n{\"response\":\"ok\"}\n\n"]);
        assert_eq!(sink.text, "ok");
    }

    #[test]
    fn crlf_lines_are_handled() {
        let sink = decode(&[b"{\"response\":\"a\"}\r\n{\"response\":\"b\"}\r\n"]);
        assert_eq!(sink.text, "ab");
    }

    #[test]
    fn trailing_line_without_newline_is_flushed() {
        let sink = decode(&[b"{\"response\":\"a\"}\n{\"response\":\"fim\"}"]);
        assert_eq!(sink.text, "afim");
    }

    #[test]
    fn empty_stream_emits_nothing() {
        let sink = decode(&[]);
        assert_eq!(sink.text, "");
        assert_eq!(sink.replaces, 0);
        assert_eq!(sink.appends, 0);
    }

    #[test]
    fn empty_response_string_still_counts_as_first_fragment() {
        // Ollama's final generate record carries response:"" plus stats.
        let sink = decode(&[b"{\"response\":\"\",\"done\":true}\n{\"response\":\"x\"}\n"]);
        assert_eq!(sink.replaces, 1);
        assert_eq!(sink.appends, 1);
        assert_eq!(sink.text, "x");
    }

    #[test]
    fn escaped_newlines_inside_strings_do_not_split_records() {
        let sink = decode(&[b"{\"response\":\"linha1\\nlinha2\"}\n"]);
        assert_eq!(sink.text, "linha1\nlinha2");
    }
}
