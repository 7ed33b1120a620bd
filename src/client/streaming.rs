// Chat-completion SSE stream parsing
// Author: kelexine (https://github.com/kelexine)

use super::sink::ReplySink;
use crate::models::{ChunkPayload, StreamChunk, Usage};
use futures::stream::Stream;
use std::io::{self, BufRead};
use tracing::{debug, warn};

/// Payload that marks the end of the stream.
pub const DONE_MARKER: &str = "[DONE]";

/// Parse a single SSE line into the chunks it carries.
///
/// Lines that are not `data:` frames (comments, `event:` lines, blanks) and
/// frames whose JSON cannot be decoded yield no chunks.
pub fn parse_sse_line(line: &str) -> Vec<StreamChunk> {
    let line = line.trim_end_matches(['\r', '\n']);

    let data = match line.strip_prefix("data:") {
        Some(data) => data.strip_prefix(' ').unwrap_or(data),
        None => return Vec::new(),
    };

    if data.trim() == DONE_MARKER {
        debug!("Received DONE marker");
        return vec![StreamChunk::Done];
    }

    if data.trim().is_empty() {
        return Vec::new();
    }

    match serde_json::from_str::<ChunkPayload>(data) {
        Ok(payload) => payload.into_chunks(),
        Err(e) => {
            warn!("Failed to parse SSE JSON: {}", e);
            debug!("Raw data: {}", data.chars().take(200).collect::<String>());
            Vec::new()
        }
    }
}

/// Whether the stream should keep being read after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    Continue,
    Done,
}

/// Rebuilds the reply and usage from successive SSE lines.
///
/// Shared by the blocking and async call forms; only the way lines are
/// obtained differs between them.
#[derive(Debug, Default)]
pub struct ReplyAccumulator {
    reply: String,
    usage: Option<Usage>,
}

impl ReplyAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one line, forwarding content fragments to `sink`.
    pub fn feed_line(&mut self, line: &str, sink: &mut dyn ReplySink) -> LineOutcome {
        for chunk in parse_sse_line(line) {
            match chunk {
                StreamChunk::Content(text) => {
                    sink.emit(&text);
                    self.reply.push_str(&text);
                }
                // Usage normally only arrives on the final frame; later frames win.
                StreamChunk::Usage(usage) => self.usage = Some(usage),
                StreamChunk::Done => return LineOutcome::Done,
            }
        }
        LineOutcome::Continue
    }

    pub fn into_parts(self) -> (String, Option<Usage>) {
        (self.reply, self.usage)
    }
}

/// Decode one raw line without its trailing newline.
///
/// Invalid UTF-8 is replaced rather than rejected, so one bad line never ends
/// the stream.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(&b"\n"[..]).unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Blocking line splitter over a response body.
///
/// Yields the same lines as [`sse_lines`] does for the same bytes.
pub struct BlockingLines<R> {
    reader: R,
    buffer: Vec<u8>,
}

impl<R: BufRead> Iterator for BlockingLines<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buffer.clear();
        match self.reader.read_until(b'\n', &mut self.buffer) {
            Ok(0) => None,
            Ok(_) => Some(Ok(decode_line(&self.buffer))),
            Err(e) => Some(Err(e)),
        }
    }
}

pub fn blocking_lines<R: BufRead>(reader: R) -> BlockingLines<R> {
    BlockingLines {
        reader,
        buffer: Vec::new(),
    }
}

/// Split a response byte stream into text lines.
///
/// Bytes are buffered until a newline arrives so multi-byte characters split
/// across network chunks decode intact. A final line without a trailing
/// newline is still yielded.
pub fn sse_lines<S>(byte_stream: S) -> impl Stream<Item = reqwest::Result<String>>
where
    S: Stream<Item = reqwest::Result<bytes::Bytes>>,
{
    use futures::StreamExt;

    async_stream::stream! {
        let mut buffer: Vec<u8> = Vec::new();

        futures::pin_mut!(byte_stream);

        while let Some(chunk_result) = byte_stream.next().await {
            match chunk_result {
                Ok(chunk) => {
                    debug!("Received chunk: {} bytes", chunk.len());
                    buffer.extend_from_slice(&chunk);

                    while let Some(line_end) = buffer.iter().position(|&b| b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=line_end).collect();
                        yield Ok(decode_line(&line));
                    }
                }
                Err(e) => {
                    warn!("Stream error: {}", e);
                    yield Err(e);
                    break;
                }
            }
        }

        // This handles cases where the final line doesn't have a trailing \n
        if !buffer.is_empty() {
            debug!("Processing remaining buffer: {} bytes", buffer.len());
            yield Ok(decode_line(&buffer));
        }

        debug!("SSE stream ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: [&str; 4] = [
        r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#,
        r#"data: {"choices":[{"delta":{"content":"lo"}}]}"#,
        r#"data: {"usage":{"prompt_tokens":5,"completion_tokens":2}}"#,
        "data: [DONE]",
    ];

    fn run(lines: &[&str]) -> (String, Option<Usage>, String) {
        let mut acc = ReplyAccumulator::new();
        let mut printed = String::new();
        for line in lines {
            if acc.feed_line(line, &mut printed) == LineOutcome::Done {
                break;
            }
        }
        let (reply, usage) = acc.into_parts();
        (reply, usage, printed)
    }

    #[test]
    fn test_reconstructs_reply_and_usage() {
        let (reply, usage, printed) = run(&SCRIPT);
        assert_eq!(reply, "Hello");
        assert_eq!(printed, "Hello");
        assert_eq!(
            usage,
            Some(Usage {
                prompt_tokens: 5,
                completion_tokens: 2
            })
        );
    }

    #[test]
    fn test_malformed_line_is_skipped() {
        let lines = [SCRIPT[0], "data: {not-json", SCRIPT[1], SCRIPT[2], SCRIPT[3]];
        let (reply, usage, _) = run(&lines);
        assert_eq!(reply, "Hello");
        assert!(usage.is_some());
    }

    #[test]
    fn test_stops_at_done() {
        let lines = [
            SCRIPT[0],
            "data: [DONE]",
            r#"data: {"choices":[{"delta":{"content":"ignored"}}]}"#,
        ];
        let (reply, _, _) = run(&lines);
        assert_eq!(reply, "Hel");
    }

    #[test]
    fn test_last_usage_wins() {
        let lines = [
            r#"data: {"choices":[],"usage":{"prompt_tokens":1,"completion_tokens":1}}"#,
            r#"data: {"choices":[],"usage":{"prompt_tokens":9,"completion_tokens":4}}"#,
        ];
        let (_, usage, _) = run(&lines);
        assert_eq!(
            usage,
            Some(Usage {
                prompt_tokens: 9,
                completion_tokens: 4
            })
        );
    }

    #[test]
    fn test_non_data_lines_ignored() {
        assert!(parse_sse_line(": keep-alive").is_empty());
        assert!(parse_sse_line("event: message").is_empty());
        assert!(parse_sse_line("").is_empty());
        assert_eq!(parse_sse_line("data: [DONE]\r"), vec![StreamChunk::Done]);
    }

    #[test]
    fn test_data_without_space() {
        assert_eq!(
            parse_sse_line(r#"data:{"choices":[{"delta":{"content":"x"}}]}"#),
            vec![StreamChunk::Content("x".to_string())]
        );
    }

    #[tokio::test]
    async fn test_sse_lines_rejoins_split_chunks() {
        use futures::StreamExt;

        let parts: Vec<reqwest::Result<bytes::Bytes>> = vec![
            Ok(bytes::Bytes::from_static(b"data: {\"a\"")),
            Ok(bytes::Bytes::from_static(b":1}\n\ndata: caf\xc3")),
            Ok(bytes::Bytes::from_static(b"\xa9\ndata: [DONE]")),
        ];
        let lines: Vec<String> = sse_lines(futures::stream::iter(parts))
            .map(|line| line.unwrap())
            .collect()
            .await;

        assert_eq!(
            lines,
            vec!["data: {\"a\":1}", "", "data: café", "data: [DONE]"]
        );
    }

    #[tokio::test]
    async fn test_invalid_utf8_splits_the_same_in_both_forms() {
        use futures::StreamExt;

        let body: &[u8] = b"data: a\n: note \xff\ndata: b";
        let blocking: Vec<String> = blocking_lines(body).map(|line| line.unwrap()).collect();

        let parts: Vec<reqwest::Result<bytes::Bytes>> = vec![Ok(bytes::Bytes::from_static(body))];
        let streamed: Vec<String> = sse_lines(futures::stream::iter(parts))
            .map(|line| line.unwrap())
            .collect()
            .await;

        assert_eq!(blocking, streamed);
        assert_eq!(blocking, vec!["data: a", ": note \u{fffd}", "data: b"]);
    }
}
