use std::fmt;

/// 1-based position in the source text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl Location {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }

    /// Location of the character at byte `offset` of `src`.
    pub fn from_offset(src: &str, offset: usize) -> Self {
        let before = &src[..offset.min(src.len())];
        let line = before.matches('\n').count() + 1;
        let column = match before.rfind('\n') {
            Some(nl) => before[nl + 1..].chars().count() + 1,
            None => before.chars().count() + 1,
        };
        Self { line, column }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// Errors raised while turning policy text into rules.
#[derive(thiserror::Error, Clone, Debug, PartialEq)]
pub enum ParseError {
    #[error("'{token}' caused an integer overflow at {loc}")]
    IntegerOverflow { token: String, loc: Location },
    #[error("'{}' is not a valid character. Found in {token} at {loc}", .c.escape_default())]
    InvalidTokenCharacter {
        token: String,
        c: char,
        loc: Location,
    },
    #[error("did not expect to find the token '{token}' at {loc}")]
    UnrecognizedToken { token: String, loc: Location },
    #[error("hit the end of the file unexpectedly. Did you forget a semi-colon at {loc}")]
    UnrecognizedEof { loc: Location },
    #[error("'{token}' is not a valid float at {loc}")]
    InvalidFloat { token: String, loc: Location },
    #[error("{message} at {loc}")]
    InvalidExpression { message: String, loc: Location },
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_location_from_offset() {
        let src = "f(1);\ng(x) if x = 2;";
        assert_eq!(Location::from_offset(src, 0), Location::new(1, 1));
        assert_eq!(Location::from_offset(src, 2), Location::new(1, 3));
        assert_eq!(Location::from_offset(src, 6), Location::new(2, 1));
        assert_eq!(Location::from_offset(src, 17), Location::new(2, 12));
    }

    #[test]
    fn test_messages() {
        let err = ParseError::InvalidTokenCharacter {
            token: "This is not".to_string(),
            c: '\n',
            loc: Location::new(1, 25),
        };
        assert_eq!(
            err.to_string(),
            "'\\n' is not a valid character. Found in This is not at line 1, column 25"
        );
        let err = ParseError::UnrecognizedToken {
            token: "1".to_string(),
            loc: Location::new(1, 1),
        };
        assert_eq!(
            err.to_string(),
            "did not expect to find the token '1' at line 1, column 1"
        );
    }
}
