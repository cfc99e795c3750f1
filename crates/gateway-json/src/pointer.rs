use std::fmt;

/// A single parsed segment of a [`Pointer`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Token {
    /// An object property name.
    Property(String),
    /// A concrete array index, as observed while scanning a document.
    Index(usize),
    /// The wildcard tail token (`^`), which matches any array index at this
    /// position. Only ever appears as the *last* token of a configured
    /// target `Pointer` — never as part of an observed concrete path.
    Wildcard,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Property(p) => write!(f, "{p}"),
            Token::Index(i) => write!(f, "{i}"),
            Token::Wildcard => write!(f, "^"),
        }
    }
}

/// A parsed JSON-pointer-with-wildcard-tail, e.g. `/records/^` or `/status_code`.
///
/// This is a deliberately narrower cousin of a full RFC 6901 pointer: it
/// exists to name the paths the streaming extractor watches for, not to
/// address arbitrary depth. A trailing `^` token means "each element of the
/// array at this path", matching the upstream adapters' configured paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pointer(pub Vec<Token>);

impl Pointer {
    pub fn root() -> Pointer {
        Pointer(Vec::new())
    }

    pub fn parse(s: &str) -> Pointer {
        if s.is_empty() || s == "/" {
            return Pointer::root();
        }
        let mut tokens = Vec::new();
        for raw in s.split('/').skip(if s.starts_with('/') { 1 } else { 0 }) {
            let decoded = raw.replace("~1", "/").replace("~0", "~");
            tokens.push(if decoded == "^" {
                Token::Wildcard
            } else {
                match decoded.parse::<usize>() {
                    // Leading-zero numerals (other than "0" itself) are property
                    // names, matching how the teacher's `json::ptr` treats tokens.
                    Ok(i) if !(decoded.len() > 1 && decoded.starts_with('0')) => Token::Index(i),
                    _ => Token::Property(decoded),
                }
            });
        }
        Pointer(tokens)
    }

    /// Does this target pointer describe an array whose elements should be
    /// emitted one at a time, i.e. does it end in `Wildcard`?
    pub fn is_wildcard_array(&self) -> bool {
        matches!(self.0.last(), Some(Token::Wildcard))
    }

    /// The pointer with its trailing wildcard stripped, e.g. `/records/^` -> `/records`.
    pub fn container_path(&self) -> &[Token] {
        if self.is_wildcard_array() {
            &self.0[..self.0.len() - 1]
        } else {
            &self.0[..]
        }
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for tok in &self.0 {
            write!(f, "/{tok}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_property_paths() {
        assert_eq!(
            Pointer::parse("/status_code").0,
            vec![Token::Property("status_code".to_string())]
        );
    }

    #[test]
    fn parses_wildcard_tail() {
        let p = Pointer::parse("/records/^");
        assert!(p.is_wildcard_array());
        assert_eq!(p.container_path(), &[Token::Property("records".to_string())]);
    }

    #[test]
    fn round_trips_display() {
        let p = Pointer::parse("/data/^");
        assert_eq!(p.to_string(), "/data/^");
    }

    #[test]
    fn root_is_empty() {
        assert_eq!(Pointer::parse(""), Pointer::root());
    }
}
