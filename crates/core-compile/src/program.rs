//! The motion program container.
//!
//! Append-only while being built, immutable once handed out. Lines are
//! stored verbatim including `;` comments; [`MotionProgram::command_count`]
//! and [`MotionProgram::commands`] expose the protocol view the streamer
//! uses (comments and blanks stripped).

/// An ordered sequence of controller protocol lines.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MotionProgram {
    lines: Vec<String>,
}

impl MotionProgram {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub(crate) fn extend(&mut self, lines: impl IntoIterator<Item = String>) {
        self.lines.extend(lines);
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Real commands: comment text after `;` and blank lines removed.
    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter_map(|l| {
            let cmd = l.split(';').next().unwrap_or("").trim();
            (!cmd.is_empty()).then_some(cmd)
        })
    }

    pub fn command_count(&self) -> usize {
        self.commands().count()
    }

    /// The artifact text: every line, newline-joined, byte-for-byte.
    pub fn to_text(&self) -> String {
        self.lines.join("\n")
    }

    /// Parse an artifact blob back into a program (redo fast path).
    pub fn from_text(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
        }
    }
}
