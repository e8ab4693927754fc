use std::{
    fmt,
    sync::{Arc, OnceLock},
};

use crate::{ObjectId, Visitable, Visitor};

/// Byte offset into a script's source, or a synthetic marker.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenPosition(pub i32);

impl TokenPosition {
    pub const NO_SOURCE: Self = Self(-1);
    pub const MIN_SOURCE: Self = Self(0);

    pub fn is_real(self) -> bool {
        self.0 >= 0
    }
}

impl Default for TokenPosition {
    fn default() -> Self {
        Self::NO_SOURCE
    }
}

impl fmt::Display for TokenPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_real() {
            write!(f, "{}", self.0)
        } else {
            f.write_str("no-source")
        }
    }
}

pub struct Script {
    pub url: ObjectId,
    source: Option<Arc<str>>,
    line_starts: OnceLock<Vec<usize>>,
}

impl Script {
    pub fn new(url: ObjectId, source: Option<Arc<str>>) -> Self {
        Self {
            url,
            source,
            line_starts: OnceLock::new(),
        }
    }

    pub fn source(&self) -> Option<&Arc<str>> {
        self.source.as_ref()
    }

    pub fn set_source(&mut self, source: Arc<str>) {
        self.source = Some(source);
        self.line_starts = OnceLock::new();
    }

    fn line_starts(&self, source: &str) -> &[usize] {
        self.line_starts.get_or_init(|| {
            std::iter::once(0)
                .chain(source.match_indices('\n').map(|(i, _)| i + 1))
                .collect()
        })
    }

    /// 1-based line and column of `pos`.
    pub fn location(&self, pos: TokenPosition) -> Option<(usize, usize)> {
        let source = self.source.as_deref()?;
        if !pos.is_real() || pos.0 as usize > source.len() {
            return None;
        }
        let offset = pos.0 as usize;
        let starts = self.line_starts(source);
        let line = starts.partition_point(|&start| start <= offset);
        let column = offset - starts[line - 1] + 1;
        Some((line, column))
    }

    /// Text of the 1-based `line` without its terminator.
    pub fn line_text(&self, line: usize) -> Option<&str> {
        let source = self.source.as_deref()?;
        let starts = self.line_starts(source);
        let start = *starts.get(line.checked_sub(1)?)?;
        let end = starts.get(line).map_or(source.len(), |&next| next - 1);
        Some(source[start..end].trim_end_matches('\r'))
    }
}

impl Visitable for Script {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        visitor.visit_id(self.url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(source: &str) -> Script {
        Script::new(ObjectId(1), Some(Arc::from(source)))
    }

    #[test]
    fn location_is_one_based() {
        let script = script("class A {\n  int x;\n}\n");
        assert_eq!(script.location(TokenPosition(0)), Some((1, 1)));
        assert_eq!(script.location(TokenPosition(12)), Some((2, 3)));
        assert_eq!(script.location(TokenPosition::NO_SOURCE), None);
    }

    #[test]
    fn line_text_strips_terminators() {
        let script = script("first\r\nsecond\nthird");
        assert_eq!(script.line_text(1), Some("first"));
        assert_eq!(script.line_text(2), Some("second"));
        assert_eq!(script.line_text(3), Some("third"));
        assert_eq!(script.line_text(4), None);
        assert_eq!(script.line_text(0), None);
    }

    #[test]
    fn missing_source_has_no_location() {
        let script = Script::new(ObjectId(1), None);
        assert_eq!(script.location(TokenPosition(3)), None);
    }
}
