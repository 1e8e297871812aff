//! Per-test output buffers
//!
//! Four append-only accumulators, one per message category, drained in a
//! fixed order when a test finishes.

use crate::models::{MessageCategory, ResultMessage};

/// Categories in the order their messages are attached to a result
const CATEGORY_ORDER: [MessageCategory; 4] = [
    MessageCategory::StdOut,
    MessageCategory::StdErr,
    MessageCategory::DebugTrace,
    MessageCategory::AdditionalInfo,
];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OutputBuffers {
    stdout: String,
    stderr: String,
    trace: String,
    additional_info: String,
}

impl OutputBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    fn buffer_mut(&mut self, category: MessageCategory) -> &mut String {
        match category {
            MessageCategory::StdOut => &mut self.stdout,
            MessageCategory::StdErr => &mut self.stderr,
            MessageCategory::DebugTrace => &mut self.trace,
            MessageCategory::AdditionalInfo => &mut self.additional_info,
        }
    }

    #[cfg(test)]
    pub fn get(&self, category: MessageCategory) -> &str {
        match category {
            MessageCategory::StdOut => &self.stdout,
            MessageCategory::StdErr => &self.stderr,
            MessageCategory::DebugTrace => &self.trace,
            MessageCategory::AdditionalInfo => &self.additional_info,
        }
    }

    /// Append one line; the line terminator is added here
    pub fn append_line(&mut self, category: MessageCategory, line: &str) {
        let buffer = self.buffer_mut(category);
        buffer.push_str(line);
        buffer.push('\n');
    }

    /// Read and clear every buffer. Blank buffers produce no message.
    pub fn take_messages(&mut self) -> Vec<ResultMessage> {
        CATEGORY_ORDER
            .into_iter()
            .filter_map(|category| {
                let buffered = std::mem::take(self.buffer_mut(category));
                let text = buffered.strip_suffix('\n').unwrap_or(buffered.as_str());
                (!text.trim().is_empty()).then(|| ResultMessage::new(category, text))
            })
            .collect()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        CATEGORY_ORDER.iter().all(|c| self.get(*c).is_empty())
    }
}

/// Strip exactly one trailing line terminator (`\r\n`, `\n` or `\r`)
pub fn strip_line_ending(text: &str) -> &str {
    text.strip_suffix("\r\n")
        .or_else(|| text.strip_suffix('\n'))
        .or_else(|| text.strip_suffix('\r'))
        .unwrap_or(text)
}
