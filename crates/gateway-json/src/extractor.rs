use crate::pointer::{Pointer, Token};

/// A value yielded by [`Extractor::feed`], paired with the target pointer it
/// satisfied.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub path: Pointer,
    pub value: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("malformed JSON at byte offset {offset}: {reason}")]
    Malformed { offset: usize, reason: &'static str },
}

/// Feeds partial HTTP response bodies to an incremental scanner and yields
/// `(path, value)` pairs as soon as the value at a configured path has fully
/// arrived, without waiting for the rest of the document.
///
/// The extractor only understands top-level response objects of the shape
/// both upstreams produce: a flat object whose values are either scalars,
/// whole arrays reported verbatim (`/warnings`, `/errors`), or one array
/// whose elements should be reported individually (`/records/^`,
/// `/data/^`). That is the complete vocabulary of paths this gateway is
/// configured with; it is not a general-purpose JSON Pointer evaluator.
///
/// Once `feed` returns an error the extractor is poisoned: the caller must
/// stop feeding it further chunks for this response, per spec.
pub struct Extractor {
    targets: Vec<Pointer>,
    buf: Vec<u8>,
    pos: usize,
    phase: Phase,
    poisoned: bool,
}

#[derive(Debug, Clone)]
enum Phase {
    BeforeOpenBrace,
    ExpectKeyOrClose { seen_any: bool },
    ExpectColon { key: String },
    ExpectValue { key: String },
    InWildcardArray { key: String, next_index: usize },
    AfterWildcardElem { key: String, next_index: usize },
    AfterRoot,
}

enum Scan {
    Complete { end: usize },
    Incomplete,
    Error(&'static str),
}

impl Extractor {
    pub fn new(targets: Vec<Pointer>) -> Self {
        Self {
            targets,
            buf: Vec::new(),
            pos: 0,
            phase: Phase::BeforeOpenBrace,
            poisoned: false,
        }
    }

    /// Feed another chunk of (UTF-8) response body bytes. Returns the values
    /// newly completed by this chunk, in document order.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Extracted>, ExtractError> {
        if self.poisoned {
            return Ok(Vec::new());
        }
        self.buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        if let Err(err) = self.drive(&mut out) {
            self.poisoned = true;
            return Err(err);
        }

        // Bound memory: drop fully-consumed bytes from the front.
        if self.pos > 0 {
            self.buf.drain(0..self.pos);
            self.pos = 0;
        }

        Ok(out)
    }

    fn drive(&mut self, out: &mut Vec<Extracted>) -> Result<(), ExtractError> {
        loop {
            match self.phase.clone() {
                Phase::BeforeOpenBrace => {
                    let Some(i) = skip_ws(&self.buf, self.pos) else {
                        return Ok(());
                    };
                    if self.buf[i] != b'{' {
                        return Err(self.err(i, "expected '{' at start of document"));
                    }
                    self.pos = i + 1;
                    self.phase = Phase::ExpectKeyOrClose { seen_any: false };
                }

                Phase::ExpectKeyOrClose { seen_any } => {
                    let Some(i) = skip_ws(&self.buf, self.pos) else {
                        return Ok(());
                    };
                    match self.buf[i] {
                        b'}' => {
                            self.pos = i + 1;
                            self.phase = Phase::AfterRoot;
                            return Ok(());
                        }
                        b',' if seen_any => {
                            let Some(j) = skip_ws(&self.buf, i + 1) else {
                                return Ok(());
                            };
                            if self.buf[j] != b'"' {
                                return Err(self.err(j, "expected property name after ','"));
                            }
                            match scan_value(&self.buf, j) {
                                Scan::Incomplete => return Ok(()),
                                Scan::Error(reason) => return Err(self.err(j, reason)),
                                Scan::Complete { end } => {
                                    let key = self.take_key(j, end)?;
                                    self.pos = end;
                                    self.phase = Phase::ExpectColon { key };
                                }
                            }
                        }
                        b'"' if !seen_any => match scan_value(&self.buf, i) {
                            Scan::Incomplete => return Ok(()),
                            Scan::Error(reason) => return Err(self.err(i, reason)),
                            Scan::Complete { end } => {
                                let key = self.take_key(i, end)?;
                                self.pos = end;
                                self.phase = Phase::ExpectColon { key };
                            }
                        },
                        _ => return Err(self.err(i, "expected '\"', ',' or '}' in object")),
                    }
                }

                Phase::ExpectColon { key } => {
                    let Some(i) = skip_ws(&self.buf, self.pos) else {
                        return Ok(());
                    };
                    if self.buf[i] != b':' {
                        return Err(self.err(i, "expected ':' after property name"));
                    }
                    self.pos = i + 1;
                    self.phase = Phase::ExpectValue { key };
                }

                Phase::ExpectValue { key } => {
                    let Some(i) = skip_ws(&self.buf, self.pos) else {
                        return Ok(());
                    };

                    if self.wants_wildcard_array(&key) {
                        if self.buf[i] != b'[' {
                            return Err(
                                self.err(i, "expected array for a wildcard-configured path")
                            );
                        }
                        self.pos = i + 1;
                        self.phase = Phase::InWildcardArray { key, next_index: 0 };
                        continue;
                    }

                    match scan_value(&self.buf, i) {
                        Scan::Incomplete => return Ok(()),
                        Scan::Error(reason) => return Err(self.err(i, reason)),
                        Scan::Complete { end } => {
                            if let Some(target) = self.matching_scalar_target(&key) {
                                let value = serde_json::from_slice(&self.buf[i..end])
                                    .map_err(|_| self.err(i, "invalid JSON value"))?;
                                out.push(Extracted {
                                    path: target,
                                    value,
                                });
                            }
                            self.pos = end;
                            self.phase = Phase::ExpectKeyOrClose { seen_any: true };
                        }
                    }
                }

                Phase::InWildcardArray { key, next_index } => {
                    let Some(i) = skip_ws(&self.buf, self.pos) else {
                        return Ok(());
                    };
                    if self.buf[i] == b']' {
                        self.pos = i + 1;
                        self.phase = Phase::ExpectKeyOrClose { seen_any: true };
                        continue;
                    }
                    match scan_value(&self.buf, i) {
                        Scan::Incomplete => return Ok(()),
                        Scan::Error(reason) => return Err(self.err(i, reason)),
                        Scan::Complete { end } => {
                            let value = serde_json::from_slice(&self.buf[i..end])
                                .map_err(|_| self.err(i, "invalid JSON array element"))?;
                            out.push(Extracted {
                                path: Pointer(vec![
                                    Token::Property(key.clone()),
                                    Token::Wildcard,
                                ]),
                                value,
                            });
                            self.pos = end;
                            self.phase = Phase::AfterWildcardElem {
                                key,
                                next_index: next_index + 1,
                            };
                        }
                    }
                }

                Phase::AfterWildcardElem { key, next_index } => {
                    let Some(i) = skip_ws(&self.buf, self.pos) else {
                        return Ok(());
                    };
                    match self.buf[i] {
                        b']' => {
                            self.pos = i + 1;
                            self.phase = Phase::ExpectKeyOrClose { seen_any: true };
                        }
                        b',' => {
                            self.pos = i + 1;
                            self.phase = Phase::InWildcardArray { key, next_index };
                        }
                        _ => return Err(self.err(i, "expected ',' or ']' in array")),
                    }
                }

                Phase::AfterRoot => return Ok(()),
            }
        }
    }

    fn take_key(&self, start: usize, end: usize) -> Result<String, ExtractError> {
        let raw = std::str::from_utf8(&self.buf[start + 1..end - 1])
            .map_err(|_| self.err(start, "property name is not valid UTF-8"))?;
        Ok(unescape(raw))
    }

    fn wants_wildcard_array(&self, key: &str) -> bool {
        let needle = [Token::Property(key.to_string())];
        self.targets
            .iter()
            .any(|t| t.is_wildcard_array() && t.container_path() == needle.as_slice())
    }

    fn matching_scalar_target(&self, key: &str) -> Option<Pointer> {
        self.targets
            .iter()
            .find(|t| !t.is_wildcard_array() && t.0 == [Token::Property(key.to_string())])
            .cloned()
    }

    fn err(&self, offset: usize, reason: &'static str) -> ExtractError {
        ExtractError::Malformed { offset, reason }
    }
}

fn skip_ws(buf: &[u8], mut i: usize) -> Option<usize> {
    while i < buf.len() {
        match buf[i] {
            b' ' | b'\t' | b'\n' | b'\r' => i += 1,
            _ => return Some(i),
        }
    }
    None
}

/// Scans a single JSON value starting at `buf[start]` (which must not be
/// whitespace). Returns the byte offset one past the value's last byte, or
/// `Incomplete` if the buffer runs out before the value is fully present.
fn scan_value(buf: &[u8], start: usize) -> Scan {
    match buf[start] {
        b'"' => scan_string(buf, start),
        b'{' => scan_bracketed(buf, start, b'{', b'}'),
        b'[' => scan_bracketed(buf, start, b'[', b']'),
        b't' => scan_literal(buf, start, b"true"),
        b'f' => scan_literal(buf, start, b"false"),
        b'n' => scan_literal(buf, start, b"null"),
        b'-' | b'0'..=b'9' => scan_number(buf, start),
        _ => Scan::Error("unexpected character starting a value"),
    }
}

fn scan_string(buf: &[u8], start: usize) -> Scan {
    debug_assert_eq!(buf[start], b'"');
    let mut i = start + 1;
    let mut escaped = false;
    while i < buf.len() {
        let b = buf[i];
        if escaped {
            escaped = false;
        } else if b == b'\\' {
            escaped = true;
        } else if b == b'"' {
            return Scan::Complete { end: i + 1 };
        }
        i += 1;
    }
    Scan::Incomplete
}

fn scan_bracketed(buf: &[u8], start: usize, open: u8, close: u8) -> Scan {
    let mut depth = 0usize;
    let mut i = start;
    let mut in_string = false;
    let mut escaped = false;
    while i < buf.len() {
        let b = buf[i];
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
        } else if b == b'"' {
            in_string = true;
        } else if b == open {
            depth += 1;
        } else if b == close {
            depth -= 1;
            if depth == 0 {
                return Scan::Complete { end: i + 1 };
            }
        }
        i += 1;
    }
    Scan::Incomplete
}

fn scan_literal(buf: &[u8], start: usize, literal: &[u8]) -> Scan {
    let end = start + literal.len();
    if end > buf.len() {
        // Not enough bytes yet to tell - but if what we do have mismatches,
        // it's a genuine error rather than a partial read.
        if buf[start..].iter().zip(literal).any(|(a, b)| a != b) {
            return Scan::Error("invalid literal");
        }
        return Scan::Incomplete;
    }
    if &buf[start..end] == literal {
        Scan::Complete { end }
    } else {
        Scan::Error("invalid literal")
    }
}

fn scan_number(buf: &[u8], start: usize) -> Scan {
    let mut i = start;
    if buf[i] == b'-' {
        i += 1;
    }
    let digits_start = i;
    while i < buf.len() && buf[i].is_ascii_digit() {
        i += 1;
    }
    if i == digits_start {
        return if i >= buf.len() {
            Scan::Incomplete
        } else {
            Scan::Error("malformed number")
        };
    }
    if i < buf.len() && buf[i] == b'.' {
        i += 1;
        let frac_start = i;
        while i < buf.len() && buf[i].is_ascii_digit() {
            i += 1;
        }
        if i == frac_start {
            return if i >= buf.len() {
                Scan::Incomplete
            } else {
                Scan::Error("malformed number")
            };
        }
    }
    if i < buf.len() && (buf[i] == b'e' || buf[i] == b'E') {
        i += 1;
        if i < buf.len() && (buf[i] == b'+' || buf[i] == b'-') {
            i += 1;
        }
        let exp_start = i;
        while i < buf.len() && buf[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            return if i >= buf.len() {
                Scan::Incomplete
            } else {
                Scan::Error("malformed number")
            };
        }
    }
    // A number only terminates when we see a non-number byte; at end of
    // buffer we can't yet tell whether more digits are coming.
    if i >= buf.len() {
        Scan::Incomplete
    } else {
        Scan::Complete { end: i }
    }
}

fn unescape(raw: &str) -> String {
    if !raw.contains('\\') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('b') => out.push('\u{08}'),
            Some('f') => out.push('\u{0C}'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                if let Ok(code) = u32::from_str_radix(&hex, 16) {
                    if let Some(ch) = char::from_u32(code) {
                        out.push(ch);
                    }
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets() -> Vec<Pointer> {
        vec![
            Pointer::parse("/records/^"),
            Pointer::parse("/success"),
            Pointer::parse("/message"),
            Pointer::parse("/status_code"),
            Pointer::parse("/warnings"),
        ]
    }

    #[test]
    fn extracts_values_fed_in_one_chunk() {
        let mut ex = Extractor::new(targets());
        let body = br#"{"records":[{"id":1},{"id":2}],"success":true,"status_code":200}"#;
        let out = ex.feed(body).unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out[0].path, Pointer::parse("/records/^"));
        assert_eq!(out[0].value, serde_json::json!({"id": 1}));
        assert_eq!(out[1].value, serde_json::json!({"id": 2}));
        assert_eq!(out[2].path, Pointer::parse("/success"));
        assert_eq!(out[2].value, serde_json::json!(true));
        assert_eq!(out[3].path, Pointer::parse("/status_code"));
        assert_eq!(out[3].value, serde_json::json!(200));
    }

    #[test]
    fn buffers_partial_tokens_across_chunks() {
        let mut ex = Extractor::new(targets());
        let body = br#"{"records":[{"name":"Can"#;
        let rest = br#"is"}],"success":true}"#;
        let first = ex.feed(body).unwrap();
        assert!(first.is_empty());
        let second = ex.feed(rest).unwrap();
        assert_eq!(second.len(), 2);
        assert_eq!(second[0].value, serde_json::json!({"name": "Canis"}));
        assert_eq!(second[1].value, serde_json::json!(true));
    }

    #[test]
    fn malformed_json_is_an_error_and_poisons_further_feeds() {
        let mut ex = Extractor::new(targets());
        let err = ex.feed(b"{not json").unwrap_err();
        assert!(matches!(err, ExtractError::Malformed { .. }));
        // Further feeds are silently ignored once poisoned.
        assert_eq!(ex.feed(b"more garbage").unwrap(), Vec::new());
    }

    #[test]
    fn whole_array_targets_are_emitted_as_one_value() {
        let mut ex = Extractor::new(targets());
        let out = ex
            .feed(br#"{"warnings":["a","b"],"success":false}"#)
            .unwrap();
        assert_eq!(out[0].path, Pointer::parse("/warnings"));
        assert_eq!(out[0].value, serde_json::json!(["a", "b"]));
    }
}
