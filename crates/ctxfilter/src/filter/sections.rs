//! Delimited section extraction for system prompts
//!
//! A section is found by scanning for its opening marker and then for the
//! first closing marker after it. Nothing is removed when a closing tag is
//! missing, so an unterminated `<project>` never eats the rest of the prompt.

/// How a section ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Close {
    /// Closing tag, removed together with the section
    Tag(&'static str),
    /// Ends right before the first of these terminators that occurs after the
    /// opening marker, or at the end of the text when none does. Earlier
    /// entries take priority; the terminator itself is kept.
    Before(&'static [&'static str]),
}

/// A named, delimited span inside a prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub name: &'static str,
    pub open: &'static str,
    pub close: Close,
}

/// Repository tree injected by coding agents
pub const PROJECT: Section = Section {
    name: "project",
    open: "<project>",
    close: Close::Tag("</project>"),
};

/// Environment block (working directory, platform, git status, ...)
pub const ENV: Section = Section {
    name: "env",
    open: "<env>",
    close: Close::Tag("</env>"),
};

/// `Instructions from: AGENTS.md` style blocks. Runs to the next blank line,
/// else to the end of the label line, else to the end of the prompt.
pub const INSTRUCTIONS: Section = Section {
    name: "instructions",
    open: "Instructions from:",
    close: Close::Before(&["\n\n", "\n"]),
};

/// Sections removed from small-model prompts, in removal order
pub const DEFAULT_SECTIONS: [Section; 3] = [PROJECT, ENV, INSTRUCTIONS];

/// Result of a single extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// Text with the matched span removed (or the input when nothing matched)
    pub remaining: String,
    /// The removed span, empty when nothing matched
    pub removed: String,
}

impl Extraction {
    pub fn is_match(&self) -> bool {
        !self.removed.is_empty()
    }

    /// Size of the removed span in characters
    pub fn removed_size(&self) -> usize {
        self.removed.chars().count()
    }
}

impl Section {
    /// Byte range of the first complete occurrence of this section
    pub fn find(&self, text: &str) -> Option<(usize, usize)> {
        let start = text.find(self.open)?;
        let body_start = start + self.open.len();
        let rest = &text[body_start..];

        let end = match self.close {
            Close::Tag(tag) => body_start + rest.find(tag)? + tag.len(),
            Close::Before(terminators) => {
                body_start
                    + terminators
                        .iter()
                        .find_map(|t| rest.find(t))
                        .unwrap_or(rest.len())
            }
        };

        Some((start, end))
    }

    /// Remove the first occurrence of this section from `text`
    pub fn extract(&self, text: &str) -> Extraction {
        match self.find(text) {
            Some((start, end)) => {
                let mut remaining = String::with_capacity(text.len() - (end - start));
                remaining.push_str(&text[..start]);
                remaining.push_str(&text[end..]);
                Extraction {
                    remaining,
                    removed: text[start..end].to_string(),
                }
            }
            None => Extraction {
                remaining: text.to_string(),
                removed: String::new(),
            },
        }
    }

    /// Remove every occurrence, one first-match at a time.
    ///
    /// Returns the remaining text and the total removed size in characters.
    pub fn extract_all(&self, text: &str) -> (String, usize) {
        let mut current = text.to_string();
        let mut removed = 0;

        loop {
            let extraction = self.extract(&current);
            if !extraction.is_match() {
                return (current, removed);
            }
            removed += extraction.removed_size();
            current = extraction.remaining;
        }
    }
}
