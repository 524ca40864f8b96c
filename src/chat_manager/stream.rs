use serde_json::Value;

use super::types::Citation;

pub const ANNOTATIONS_SENTINEL: &str = "||ANNOTATIONS||";
pub const SMART_PROMPTS_SENTINEL: &str = "||SMART_PROMPTS||";

/// Incremental output of the ingestor. Content deltas stream as they become
/// unambiguous; the trailing structured segments arrive at most once each,
/// after the stream ends.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Delta { text: String },
    Citations { citations: Vec<Citation> },
    FollowUpPrompts { prompts: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment {
    Content,
    Annotations,
    Prompts,
}

/// Buffered decoder for the raw completion stream: plain assistant text,
/// optionally followed by `||ANNOTATIONS||` + a JSON citation array and/or
/// `||SMART_PROMPTS||` + JSON follow-up questions, in either order.
///
/// Handles sentinels and UTF-8 sequences split across chunk boundaries: a
/// buffer suffix that could still grow into a sentinel is held back and never
/// leaks into emitted content. One instance per request; `feed` after
/// `finish` yields nothing.
pub struct StreamIngestor {
    buffer: Vec<u8>,
    segment: Segment,
    content: String,
    annotations_raw: Option<Vec<u8>>,
    prompts_raw: Option<Vec<u8>>,
    seen_annotations: bool,
    seen_prompts: bool,
    finished: bool,
}

impl StreamIngestor {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            segment: Segment::Content,
            content: String::new(),
            annotations_raw: None,
            prompts_raw: None,
            seen_annotations: false,
            seen_prompts: false,
            finished: false,
        }
    }

    /// All content emitted so far.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Feed one raw chunk, returning the events it unlocked.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        self.scan(false, &mut events);
        events
    }

    /// Signal end of stream: flushes held-back content and parses the
    /// structured segments. Parse failures are logged and swallowed; a bad
    /// segment never affects content or the other segment.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut events = Vec::new();
        self.scan(true, &mut events);

        if let Some(raw) = self.annotations_raw.take() {
            let text = String::from_utf8_lossy(&raw);
            match serde_json::from_str::<Vec<Citation>>(text.trim()) {
                Ok(parsed) => {
                    let total = parsed.len();
                    let citations: Vec<Citation> = parsed
                        .into_iter()
                        .filter(|c| {
                            !c.matched_text.is_empty() && self.content.contains(&c.matched_text)
                        })
                        .collect();
                    if citations.len() < total {
                        tracing::debug!(
                            dropped = total - citations.len(),
                            "dropped citations with unlocatable matched text"
                        );
                    }
                    events.push(StreamEvent::Citations { citations });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to parse annotations segment");
                }
            }
        }

        if let Some(raw) = self.prompts_raw.take() {
            let text = String::from_utf8_lossy(&raw);
            match serde_json::from_str::<Value>(text.trim()) {
                Ok(value) => match prompts_from_value(&value) {
                    Some(prompts) => events.push(StreamEvent::FollowUpPrompts { prompts }),
                    None => {
                        tracing::warn!("unrecognized follow-up prompts shape");
                    }
                },
                Err(e) => {
                    tracing::warn!(error = %e, "failed to parse follow-up prompts segment");
                }
            }
        }

        events
    }

    fn scan(&mut self, at_end: bool, events: &mut Vec<StreamEvent>) {
        // Split off every complete sentinel currently in the buffer, earliest
        // first. The first occurrence of each sentinel wins; later ones are
        // literal text of whatever segment is open.
        loop {
            let mut earliest: Option<(usize, usize, Segment)> = None;
            if !self.seen_annotations {
                if let Some(pos) = find_subslice(&self.buffer, ANNOTATIONS_SENTINEL.as_bytes()) {
                    earliest = Some((pos, ANNOTATIONS_SENTINEL.len(), Segment::Annotations));
                }
            }
            if !self.seen_prompts {
                if let Some(pos) = find_subslice(&self.buffer, SMART_PROMPTS_SENTINEL.as_bytes()) {
                    if earliest.map_or(true, |(p, _, _)| pos < p) {
                        earliest = Some((pos, SMART_PROMPTS_SENTINEL.len(), Segment::Prompts));
                    }
                }
            }

            let Some((pos, sentinel_len, next)) = earliest else {
                break;
            };

            let head: Vec<u8> = self.buffer.drain(..pos + sentinel_len).collect();
            self.close_segment(&head[..pos], events);
            match next {
                Segment::Annotations => self.seen_annotations = true,
                Segment::Prompts => self.seen_prompts = true,
                Segment::Content => {}
            }
            self.segment = next;
        }

        if at_end {
            let rest = std::mem::take(&mut self.buffer);
            self.close_segment(&rest, events);
        } else if self.segment == Segment::Content {
            let safe = self.safe_emit_len();
            if safe > 0 {
                let head: Vec<u8> = self.buffer.drain(..safe).collect();
                self.emit_content(&head, events);
            }
        }
        // Non-content segments stay buffered until their closing sentinel or
        // end of stream; nothing is emitted from them incrementally.
    }

    fn close_segment(&mut self, bytes: &[u8], events: &mut Vec<StreamEvent>) {
        match self.segment {
            Segment::Content => self.emit_content(bytes, events),
            Segment::Annotations => {
                self.annotations_raw = Some(bytes.to_vec());
            }
            Segment::Prompts => {
                self.prompts_raw = Some(bytes.to_vec());
            }
        }
    }

    fn emit_content(&mut self, bytes: &[u8], events: &mut Vec<StreamEvent>) {
        if bytes.is_empty() {
            return;
        }
        let text = String::from_utf8_lossy(bytes).into_owned();
        self.content.push_str(&text);
        events.push(StreamEvent::Delta { text });
    }

    /// How many buffered bytes can be emitted as content right now: holds
    /// back any suffix that is a prefix of a still-pending sentinel, and any
    /// incomplete trailing UTF-8 sequence.
    fn safe_emit_len(&self) -> usize {
        let len = self.buffer.len();
        let mut hold = 0usize;

        let mut consider = |sentinel: &[u8]| {
            let max_k = sentinel.len().saturating_sub(1).min(len);
            for k in (1..=max_k).rev() {
                if self.buffer[len - k..] == sentinel[..k] {
                    hold = hold.max(k);
                    break;
                }
            }
        };
        if !self.seen_annotations {
            consider(ANNOTATIONS_SENTINEL.as_bytes());
        }
        if !self.seen_prompts {
            consider(SMART_PROMPTS_SENTINEL.as_bytes());
        }

        let mut safe = len - hold;
        if let Err(e) = std::str::from_utf8(&self.buffer[..safe]) {
            safe = e.valid_up_to();
        }
        safe
    }
}

impl Default for StreamIngestor {
    fn default() -> Self {
        Self::new()
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// The prompts segment tolerates several wrapper shapes: a bare array,
/// `{"prompts": [...]}`, `{"questions": [...]}`, or a single-key object
/// whose lone value is an array. First recognized shape wins.
fn prompts_from_value(value: &Value) -> Option<Vec<String>> {
    let items = match value {
        Value::Array(items) => Some(items),
        Value::Object(map) => map
            .get("prompts")
            .and_then(Value::as_array)
            .or_else(|| map.get("questions").and_then(Value::as_array))
            .or_else(|| {
                if map.len() == 1 {
                    map.values().next().and_then(Value::as_array)
                } else {
                    None
                }
            }),
        _ => None,
    }?;
    Some(
        items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
    )
}
