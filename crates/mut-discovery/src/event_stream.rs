//! Server-Sent Events (SSE) parser.
//!
//! Used for streamable-HTTP response bodies framed as `text/event-stream` and
//! for the long-lived stream of the SSE transport.

/// A single SSE event parsed from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event_type: Option<String>,
    pub data: String,
}

impl SseEvent {
    /// Event name, defaulting to `message` as EventSource does.
    pub fn kind(&self) -> &str {
        self.event_type
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or("message")
    }
}

/// Incremental SSE parser that turns text chunks into events.
///
/// Accepts `\n`, `\r\n` and lone `\r` line endings, including a `\r\n`
/// split across two chunks.
#[derive(Debug, Default)]
pub struct SseParser {
    /// Text seen so far with every line ending rewritten to `\n`.
    buffer: String,
    /// The previous chunk ended in `\r`; a leading `\n` is part of it.
    skip_lf: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of text and return any complete events.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.push_normalized(chunk);

        let mut events = Vec::new();
        // Event blocks are separated by a blank line
        while let Some(pos) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..pos + 2).collect();
            events.extend(Self::parse_block(&block[..pos]));
        }
        events
    }

    /// Flush a trailing block that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        self.skip_lf = false;
        let block = std::mem::take(&mut self.buffer);
        Self::parse_block(block.trim_end_matches('\n'))
    }

    fn push_normalized(&mut self, chunk: &str) {
        let mut rest = chunk;
        if self.skip_lf && !rest.is_empty() {
            self.skip_lf = false;
            rest = rest.strip_prefix('\n').unwrap_or(rest);
        }

        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '\r' {
                self.buffer.push(c);
                continue;
            }
            self.buffer.push('\n');
            match chars.peek() {
                Some('\n') => {
                    chars.next();
                }
                Some(_) => {}
                None => self.skip_lf = true,
            }
        }
    }

    fn parse_block(block: &str) -> Option<SseEvent> {
        let mut event_type = None;
        let mut data: Option<String> = None;

        // Lines starting with ':' are comments (keep-alives)
        for line in block.split('\n').filter(|line| !line.starts_with(':')) {
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => event_type = Some(value.to_string()),
                "data" => match data.as_mut() {
                    Some(joined) => {
                        joined.push('\n');
                        joined.push_str(value);
                    }
                    None => data = Some(value.to_string()),
                },
                _ => {}
            }
        }

        data.map(|data| SseEvent { event_type, data })
    }
}

/// The data of the first event in a complete `text/event-stream` body.
pub fn first_data(body: &str) -> Option<String> {
    let mut parser = SseParser::new();
    parser
        .feed(body)
        .into_iter()
        .next()
        .or_else(|| parser.finish())
        .map(|event| event.data)
}
