//! Server-sent events framing
//!
//! Providers stream `data: {...}` lines separated by blank lines. Network
//! chunks do not respect line boundaries, so bytes are buffered until a
//! full line is available.

use futures::{Stream, StreamExt};

/// One decoded SSE payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// Contents of a `data:` line
    Data(String),
    /// The `[DONE]` sentinel
    Done,
}

/// Incremental SSE line decoder
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every event completed by them
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = parse_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Decode whatever is left once the stream ends without a final newline
    pub fn finish(&mut self) -> Option<SseEvent> {
        let line = std::mem::take(&mut self.buffer);
        parse_line(&line)
    }
}

fn parse_line(raw: &[u8]) -> Option<SseEvent> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches(['\n', '\r']);

    // Comments, `event:`/`id:` fields and blank separators carry no payload
    let payload = line.strip_prefix("data:")?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload);

    if payload.trim() == "[DONE]" {
        Some(SseEvent::Done)
    } else if payload.trim().is_empty() {
        None
    } else {
        Some(SseEvent::Data(payload.to_string()))
    }
}

/// Pulls SSE events out of a byte stream
pub struct SseReader<S> {
    stream: S,
    decoder: SseDecoder,
    pending: std::collections::VecDeque<SseEvent>,
    exhausted: bool,
}

impl<S, B, E> SseReader<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            decoder: SseDecoder::new(),
            pending: Default::default(),
            exhausted: false,
        }
    }

    /// Next event, `Ok(None)` once the byte stream is exhausted
    pub async fn next_event(&mut self) -> Result<Option<SseEvent>, E> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            if self.exhausted {
                return Ok(None);
            }

            match self.stream.next().await {
                Some(chunk) => {
                    let chunk = chunk?;
                    self.pending.extend(self.decoder.feed(chunk.as_ref()));
                }
                None => {
                    self.exhausted = true;
                    self.pending.extend(self.decoder.finish());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: {\"a\":").is_empty());
        let events = decoder.feed(b"1}\r\n\r\ndata: [DONE]\n\n");
        assert_eq!(
            events,
            vec![SseEvent::Data("{\"a\":1}".to_string()), SseEvent::Done]
        );
    }

    #[test]
    fn test_ignores_non_data_lines() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b": keep-alive\nevent: message_start\nid: 4\ndata:{}\n");
        assert_eq!(events, vec![SseEvent::Data("{}".to_string())]);
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: tail").is_empty());
        assert_eq!(decoder.finish(), Some(SseEvent::Data("tail".to_string())));
        assert_eq!(decoder.finish(), None);
    }

    #[tokio::test]
    async fn test_reader_over_stream() {
        let chunks: Vec<Result<Vec<u8>, std::io::Error>> = vec![
            Ok(b"data: one\n\nda".to_vec()),
            Ok(b"ta: two\n\n".to_vec()),
            Ok(b"data: [DONE]".to_vec()),
        ];
        let mut reader = SseReader::new(futures::stream::iter(chunks));

        assert_eq!(reader.next_event().await.unwrap(), Some(SseEvent::Data("one".into())));
        assert_eq!(reader.next_event().await.unwrap(), Some(SseEvent::Data("two".into())));
        assert_eq!(reader.next_event().await.unwrap(), Some(SseEvent::Done));
        assert_eq!(reader.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reader_propagates_errors() {
        let chunks: Vec<Result<Vec<u8>, std::io::Error>> = vec![
            Ok(b"data: one\n".to_vec()),
            Err(std::io::Error::new(std::io::ErrorKind::Other, "reset")),
        ];
        let mut reader = SseReader::new(futures::stream::iter(chunks));
        assert!(reader.next_event().await.unwrap().is_some());
        assert!(reader.next_event().await.is_err());
    }
}
