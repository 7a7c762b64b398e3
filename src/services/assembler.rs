use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::models::Message;
use crate::providers::types::{CompletionChunk, ProviderError};

const DONE_SENTINEL: &str = "[DONE]";

/// How a successful assembly ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The upstream sent its `[DONE]` record.
    Completed,
    /// The stream closed without a sentinel.
    Exhausted,
    /// The caller asked to stop generating.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Done,
}

/// Line decoder state carried between chunks.
#[derive(Debug, Default)]
pub struct StreamAssembler {
    byte_buf: Vec<u8>,
    buffer: String,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk. Returns `Ok(true)` once the done sentinel is reached,
    /// after which the rest of the chunk is ignored.
    pub fn feed(&mut self, chunk: &[u8], target: &mut Message) -> Result<bool, ProviderError> {
        self.decode(chunk);

        while let Some(line_end) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=line_end).collect();
            if apply_record(&line, target)? == Flow::Done {
                self.buffer.clear();
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Apply a final record left without a trailing newline.
    pub fn finish(&mut self, target: &mut Message) -> Result<(), ProviderError> {
        if !self.byte_buf.is_empty() {
            let rest = std::mem::take(&mut self.byte_buf);
            self.buffer.push_str(&String::from_utf8_lossy(&rest));
        }
        let line = std::mem::take(&mut self.buffer);
        apply_record(&line, target).map(|_| ())
    }

    // Keeps an incomplete trailing UTF-8 sequence for the next chunk.
    fn decode(&mut self, chunk: &[u8]) {
        self.byte_buf.extend_from_slice(chunk);

        let valid_up_to = match std::str::from_utf8(&self.byte_buf) {
            Ok(_) => self.byte_buf.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            // Invalid bytes in the middle: decode lossily rather than stall.
            Err(_) => self.byte_buf.len(),
        };
        let rest = self.byte_buf.split_off(valid_up_to);
        self.buffer.push_str(&String::from_utf8_lossy(&self.byte_buf));
        self.byte_buf = rest;
    }
}

fn apply_record(line: &str, target: &mut Message) -> Result<Flow, ProviderError> {
    let Some(payload) = line.trim().strip_prefix("data:") else {
        return Ok(Flow::Continue);
    };
    let payload = payload.trim();
    if payload == DONE_SENTINEL {
        return Ok(Flow::Done);
    }

    let chunk = match serde_json::from_str::<CompletionChunk>(payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::warn!("Dropping malformed stream record: {}", e);
            return Ok(Flow::Continue);
        }
    };

    if let Some(error) = chunk.error {
        return Err(ProviderError::RequestFailed(error.message));
    }

    if let Some(choice) = chunk.choices.first() {
        if let Some(content) = &choice.delta.content {
            target.content.push_str(content);
        }
        if let Some(reasoning) = choice.delta.reasoning.as_deref().filter(|r| !r.is_empty()) {
            target
                .reasoning
                .get_or_insert_with(String::new)
                .push_str(reasoning);
        }
    }
    Ok(Flow::Continue)
}

/// Drive `chunks` to completion, appending deltas to `target`.
///
/// On a transport error the content gathered so far stays in `target` and
/// the error is returned. The stream is dropped on every exit path.
pub async fn assemble<S>(
    mut chunks: S,
    target: &mut Message,
    cancel: &CancellationToken,
) -> Result<Termination, ProviderError>
where
    S: Stream<Item = Result<Bytes, ProviderError>> + Unpin,
{
    let mut assembler = StreamAssembler::new();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("Generation stopped after {} bytes", target.content.len());
                return Ok(Termination::Cancelled);
            }
            next = chunks.next() => {
                match next {
                    Some(Ok(bytes)) => {
                        if assembler.feed(&bytes, target)? {
                            return Ok(Termination::Completed);
                        }
                    }
                    Some(Err(e)) => return Err(e),
                    None => {
                        assembler.finish(target)?;
                        return Ok(Termination::Exhausted);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn chunk(text: &str) -> Result<Bytes, ProviderError> {
        Ok(Bytes::from(text.to_string()))
    }

    fn delta(content: &str) -> String {
        format!("data: {{\"choices\":[{{\"delta\":{{\"content\":\"{content}\"}}}}]}}\n")
    }

    fn target() -> Message {
        Message::pending_reply("u1", "deepseek-r1")
    }

    #[tokio::test]
    async fn test_done_sentinel_stops_reading() {
        let chunks = stream::iter(vec![
            chunk("data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n"),
            chunk("data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\ndata: [DONE]\n"),
            Err(ProviderError::NetworkError("must not be read".to_string())),
        ]);
        let mut msg = target();

        let result = assemble(chunks, &mut msg, &CancellationToken::new()).await;

        assert_eq!(result.unwrap(), Termination::Completed);
        assert_eq!(msg.content, "Hello");
    }

    #[tokio::test]
    async fn test_malformed_record_is_dropped() {
        let body = format!("{}data: not-json\n{}", delta("foo"), delta("bar"));
        let chunks = stream::iter(vec![chunk(&body)]);
        let mut msg = target();

        let result = assemble(chunks, &mut msg, &CancellationToken::new()).await;

        assert_eq!(result.unwrap(), Termination::Exhausted);
        assert_eq!(msg.content, "foobar");
    }

    #[tokio::test]
    async fn test_record_split_across_chunks() {
        let record = delta("split");
        let (head, tail) = record.split_at(17);
        let chunks = stream::iter(vec![chunk(head), chunk(tail), chunk("data: [DONE]\n")]);
        let mut msg = target();

        let result = assemble(chunks, &mut msg, &CancellationToken::new()).await;

        assert_eq!(result.unwrap(), Termination::Completed);
        assert_eq!(msg.content, "split");
    }

    #[tokio::test]
    async fn test_multibyte_char_split_across_chunks() {
        let record = delta("héllo").into_bytes();
        let split = record.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let chunks = stream::iter(vec![
            Ok(Bytes::copy_from_slice(&record[..split])),
            Ok(Bytes::copy_from_slice(&record[split..])),
        ]);
        let mut msg = target();

        assemble(chunks, &mut msg, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(msg.content, "héllo");
    }

    #[tokio::test]
    async fn test_transport_error_keeps_partial_content() {
        let chunks = stream::iter(vec![
            chunk(&delta("partial")),
            Err(ProviderError::NetworkError("connection reset".to_string())),
        ]);
        let mut msg = target();

        let result = assemble(chunks, &mut msg, &CancellationToken::new()).await;

        assert!(matches!(result, Err(ProviderError::NetworkError(_))));
        assert_eq!(msg.content, "partial");
    }

    #[tokio::test]
    async fn test_error_record_fails_assembly() {
        let body = format!(
            "{}data: {{\"error\":{{\"message\":\"upstream overloaded\"}}}}\n",
            delta("so far")
        );
        let mut msg = target();

        let result = assemble(stream::iter(vec![chunk(&body)]), &mut msg, &CancellationToken::new()).await;

        match result {
            Err(ProviderError::RequestFailed(message)) => assert_eq!(message, "upstream overloaded"),
            other => panic!("Expected RequestFailed, got {:?}", other),
        }
        assert_eq!(msg.content, "so far");
    }

    #[tokio::test]
    async fn test_comments_and_crlf_are_ignored() {
        let body = ": OPENROUTER PROCESSING\r\n\r\ndata: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\r\n\r\n";
        let mut msg = target();

        assemble(stream::iter(vec![chunk(body)]), &mut msg, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(msg.content, "ok");
    }

    #[tokio::test]
    async fn test_trailing_record_without_newline() {
        let record = delta("tail");
        let chunks = stream::iter(vec![chunk(record.trim_end())]);
        let mut msg = target();

        let result = assemble(chunks, &mut msg, &CancellationToken::new()).await;

        assert_eq!(result.unwrap(), Termination::Exhausted);
        assert_eq!(msg.content, "tail");
    }

    #[tokio::test]
    async fn test_reasoning_channel() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"\",\"reasoning\":\"think\"}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"\",\"reasoning\":\"ing\"}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"answer\",\"reasoning\":null}}]}\n",
        );
        let mut msg = target();

        assemble(stream::iter(vec![chunk(body)]), &mut msg, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(msg.reasoning.as_deref(), Some("thinking"));
        assert_eq!(msg.content, "answer");
    }

    #[tokio::test]
    async fn test_cancel_keeps_accumulated_content() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let chunks = stream::iter(vec![chunk(&delta("before stop"))])
            .chain(stream::once(async move {
                trigger.cancel();
                Ok(Bytes::new())
            }))
            .chain(stream::pending());
        let mut msg = target();

        let result = assemble(Box::pin(chunks), &mut msg, &cancel).await;

        assert_eq!(result.unwrap(), Termination::Cancelled);
        assert_eq!(msg.content, "before stop");
    }
}
