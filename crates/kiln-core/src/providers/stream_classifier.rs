//! Incremental classifier for streamed assistant text.
//!
//! Decides, fragment by fragment, whether accumulating content looks like
//! the start of a structured tool call rather than prose. Suspect text is
//! withheld from rendering until either disproven (flushed as prose) or the
//! stream ends (handed to the extractor). Also hosts the runaway-repetition
//! and truncated-call checks used by the agent loop.

use crate::providers::json_tool_parser::find_balanced_json;

/// Abort the stream once a call-shaped marker repeats this many times.
pub const REPETITION_ABORT_THRESHOLD: usize = 4;

const CALL_MARKER: &str = "{\"name\"";

/// Classification of accumulated stream content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamShape {
    /// Ordinary prose; fragments are safe to render as they arrive.
    Prose,
    /// Plausibly the start of a structured tool call; withhold from display.
    SuspectStructured,
    /// Looked structured at some point but was disproven; render everything.
    Rejected,
}

/// Incremental stream classifier.
///
/// Feed fragments through [`StreamClassifier::push`]; the return value is
/// the text (if any) that is safe to render now. Withheld text is returned
/// in one piece as soon as the structured interpretation is rejected, and
/// can be recovered at end of stream via [`StreamClassifier::take_withheld`].
#[derive(Debug)]
pub struct StreamClassifier {
    known_tools: Vec<String>,
    buffer: String,
    state: StreamShape,
}

impl StreamClassifier {
    pub fn new(known_tools: Vec<String>) -> Self {
        Self {
            known_tools,
            buffer: String::new(),
            state: StreamShape::Prose,
        }
    }

    pub fn state(&self) -> StreamShape {
        self.state
    }

    /// Consumes one fragment, returning text that may be rendered now.
    pub fn push(&mut self, fragment: &str) -> Option<String> {
        match self.state {
            StreamShape::Rejected => Some(fragment.to_string()),
            StreamShape::Prose | StreamShape::SuspectStructured => {
                self.buffer.push_str(fragment);
                if self.plausible_call_prefix() {
                    self.state = StreamShape::SuspectStructured;
                    None
                } else if let Some(split) = self.interior_call_start() {
                    // Prose immediately followed by the start of a call in
                    // the same fragment: flush the prose, withhold the rest.
                    let tail = self.buffer.split_off(split);
                    let head = std::mem::replace(&mut self.buffer, tail);
                    self.state = StreamShape::SuspectStructured;
                    Some(head)
                } else if self.state == StreamShape::SuspectStructured {
                    self.state = StreamShape::Rejected;
                    Some(std::mem::take(&mut self.buffer))
                } else {
                    self.state = StreamShape::Prose;
                    Some(std::mem::take(&mut self.buffer))
                }
            }
        }
    }

    /// Returns any text still withheld at end of stream.
    pub fn take_withheld(&mut self) -> Option<String> {
        (!self.buffer.is_empty()).then(|| std::mem::take(&mut self.buffer))
    }

    /// Byte index of an interior `{` whose tail still looks like the start
    /// of a call object, if any.
    fn interior_call_start(&self) -> Option<usize> {
        let mut search = 1;
        while let Some(rel) = self.buffer.get(search..)?.find('{') {
            let i = search + rel;
            if prefix_matches_ignoring_whitespace(&self.buffer[i..], CALL_MARKER) {
                return Some(i);
            }
            search = i + 1;
        }
        None
    }

    /// True while the accumulated text could still be the start of a
    /// structured call: a `{"name"` object, or a known tool name optionally
    /// followed by `(` or `{`.
    fn plausible_call_prefix(&self) -> bool {
        let text = self.buffer.trim_start();
        if text.is_empty() {
            return false;
        }

        if text.starts_with('{') {
            return prefix_matches_ignoring_whitespace(text, CALL_MARKER);
        }

        let probe = text.trim_end();
        for tool in &self.known_tools {
            if tool.starts_with(probe) {
                return true;
            }
            if let Some(rest) = probe.strip_prefix(tool.as_str()) {
                let rest = rest.trim_start();
                if rest.is_empty() || rest.starts_with('(') || rest.starts_with('{') {
                    return true;
                }
            }
        }
        false
    }
}

/// Checks that `text`, with whitespace skipped, either starts with
/// `pattern` or is a prefix of it.
fn prefix_matches_ignoring_whitespace(text: &str, pattern: &str) -> bool {
    let mut pattern_chars = pattern.chars();
    let mut expected = pattern_chars.next();

    for c in text.chars() {
        let Some(want) = expected else {
            // Full pattern consumed; anything may follow.
            return true;
        };
        if c.is_whitespace() {
            continue;
        }
        if c != want {
            return false;
        }
        expected = pattern_chars.next();
    }
    // Text exhausted while still matching the pattern prefix.
    true
}

/// Detects pathological output where the model repeats the same
/// call-shaped substring instead of terminating.
pub fn detect_runaway_repetition(text: &str) -> bool {
    let mut count = 0;
    let mut search = 0;
    while let Some(rel) = text[search..].find(CALL_MARKER) {
        count += 1;
        if count >= REPETITION_ABORT_THRESHOLD {
            return true;
        }
        search += rel + CALL_MARKER.len();
    }
    false
}

/// True if the content is tool-call shaped but structurally incomplete:
/// starts with an opening brace, carries a `"name"` key, and the braces
/// never balance. This is the signal for the corrective-retry path.
pub fn is_truncated_tool_call(text: &str) -> bool {
    let trimmed = text.trim_start();
    let offset = text.len() - trimmed.len();
    trimmed.starts_with('{')
        && trimmed.contains("\"name\"")
        && find_balanced_json(text, offset).is_none()
}
