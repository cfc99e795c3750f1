//! Percent-encoding of outbound query-parameter values, §4.1.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC};

/// Characters the allowlist leaves unescaped, beyond plain ASCII
/// alphanumerics: `- . _ ~ , * ( ) !`
const ALLOWLIST: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b',')
    .remove(b'*')
    .remove(b'(')
    .remove(b')')
    .remove(b'!');

/// Percent-encodes `value` against the allowlist, as UTF-8 bytes.
pub fn encode_value(value: &str) -> String {
    percent_encoding::utf8_percent_encode(value, ALLOWLIST).to_string()
}

/// Builds one `name=value` query pair, per §4.1.
pub fn encode_pair(name: &str, value: &str) -> String {
    format!("{name}={}", encode_value(value))
}

/// Accumulates `name=value` pairs into a `?a=1&b=2`-style query string,
/// appended to a base URL that may or may not already end in a path.
#[derive(Debug, Default)]
pub struct QueryBuilder {
    pairs: Vec<String>,
}

impl QueryBuilder {
    pub fn new() -> QueryBuilder {
        QueryBuilder::default()
    }

    pub fn push(&mut self, name: &str, value: impl std::fmt::Display) -> &mut Self {
        self.pairs.push(encode_pair(name, &value.to_string()));
        self
    }

    pub fn push_opt(&mut self, name: &str, value: Option<impl std::fmt::Display>) -> &mut Self {
        if let Some(v) = value {
            self.push(name, v);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn build(&self, base: &str) -> String {
        if self.pairs.is_empty() {
            base.to_string()
        } else {
            format!("{base}?{}", self.pairs.join("&"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowlist_chars_pass_through_unescaped() {
        assert_eq!(encode_value("a-z.A_Z~0,9*(!)"), "a-z.A_Z~0,9*(!)");
    }

    #[test]
    fn spaces_and_colons_are_encoded() {
        assert_eq!(encode_value("Canis lupus"), "Canis%20lupus");
        assert_eq!(encode_value("pbdb:txn:1"), "pbdb%3Atxn%3A1");
    }

    #[test]
    fn empty_value_produces_bare_name_equals() {
        assert_eq!(encode_pair("taxon_name", ""), "taxon_name=");
    }

    #[test]
    fn query_builder_joins_with_ampersand() {
        let mut qb = QueryBuilder::new();
        qb.push("a", 1).push("b", "x y");
        assert_eq!(qb.build("http://h/ep"), "http://h/ep?a=1&b=x%20y");
    }

    #[test]
    fn query_builder_omits_question_mark_when_empty() {
        let qb = QueryBuilder::new();
        assert_eq!(qb.build("http://h/ep"), "http://h/ep");
    }
}
