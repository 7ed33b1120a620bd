// Chat-completion SSE payload types
// Author: kelexine (https://github.com/kelexine)

use super::chat::Usage;
use serde::Deserialize;

/// JSON body of one `data:` frame.
///
/// Every field is optional: a frame may carry a content delta, a usage record,
/// both, or neither.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkPayload {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: Option<ChunkDelta>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
}

/// A unit of data extracted from the event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    /// Text fragment from `choices[0].delta.content`.
    Content(String),
    /// Top-level `usage` record.
    Usage(Usage),
    /// The `[DONE]` terminator.
    Done,
}

impl ChunkPayload {
    /// Splits the payload into its content and usage chunks, content first.
    pub fn into_chunks(self) -> Vec<StreamChunk> {
        let mut chunks = Vec::with_capacity(2);

        let content = self
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta)
            .and_then(|delta| delta.content);
        if let Some(text) = content {
            chunks.push(StreamChunk::Content(text));
        }

        if let Some(usage) = self.usage {
            chunks.push(StreamChunk::Usage(usage));
        }

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_and_usage_in_one_frame() {
        let payload: ChunkPayload = serde_json::from_str(
            r#"{"choices":[{"delta":{"content":"Hi"}}],"usage":{"prompt_tokens":1,"completion_tokens":2}}"#,
        )
        .unwrap();

        assert_eq!(
            payload.into_chunks(),
            vec![
                StreamChunk::Content("Hi".to_string()),
                StreamChunk::Usage(Usage {
                    prompt_tokens: 1,
                    completion_tokens: 2
                }),
            ]
        );
    }

    #[test]
    fn test_role_only_delta_yields_nothing() {
        let payload: ChunkPayload =
            serde_json::from_str(r#"{"choices":[{"delta":{"role":"assistant"}}],"usage":null}"#)
                .unwrap();
        assert!(payload.into_chunks().is_empty());
    }

    #[test]
    fn test_empty_choices() {
        let payload: ChunkPayload = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(payload.into_chunks().is_empty());
    }
}
