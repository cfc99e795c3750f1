//! External identifier grammar: `<domain>:<type>:<number>`, `<domain>:<number>`,
//! or a bare positive integer. See spec §4.2.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Paleo,
    Quaternary,
}

impl Domain {
    /// The wire-format prefix this domain is emitted under, per spec §6.
    pub fn wire_prefix(self) -> &'static str {
        match self {
            Domain::Paleo => "pbdb",
            Domain::Quaternary => "neotoma",
        }
    }

    /// Matches a `ds`-style upstream selector against this domain's aliases,
    /// case-insensitively.
    pub fn from_alias(s: &str) -> Option<Domain> {
        match s.to_ascii_lowercase().as_str() {
            "paleo" | "p" | "pbdb" => Some(Domain::Paleo),
            "quaternary" | "q" | "neotoma" => Some(Domain::Quaternary),
            _ => None,
        }
    }

    pub fn all() -> [Domain; 2] {
        [Domain::Paleo, Domain::Quaternary]
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_prefix())
    }
}

/// The short type tag carried by an identifier. `Unk` denotes an identifier
/// parsed without an explicit type tag (either a bare number, or a
/// `domain:number` pair).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdType {
    Occ,
    Sit,
    Col,
    Txn,
    Dst,
    Unk,
}

impl IdType {
    fn from_tag(s: &str) -> Option<IdType> {
        match s.to_ascii_lowercase().as_str() {
            "occ" => Some(IdType::Occ),
            "sit" => Some(IdType::Sit),
            "col" => Some(IdType::Col),
            "txn" => Some(IdType::Txn),
            "dst" => Some(IdType::Dst),
            "unk" => Some(IdType::Unk),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            IdType::Occ => "occ",
            IdType::Sit => "sit",
            IdType::Col => "col",
            IdType::Txn => "txn",
            IdType::Dst => "dst",
            IdType::Unk => "unk",
        }
    }
}

impl fmt::Display for IdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdentError {
    #[error("'{0}' is not a recognized identifier domain")]
    UnknownDomain(String),
    #[error("'{0}' is not a recognized identifier type")]
    UnknownType(String),
    #[error("'{0}' is not a positive identifier number")]
    InvalidNumber(String),
    #[error("'{0}' does not match domain:number, domain:type:number, or a bare number")]
    Malformed(String),
}

/// A parsed, possibly domain-ambiguous external identifier.
///
/// `domain` is `None` when the input named no domain at all (a bare
/// number); callers must resolve it against the request's enabled-upstream
/// set, per spec §3 ("An empty domain is resolved against the request's
/// single-enabled-upstream... or rejected with a warning").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalId {
    pub domain: Option<Domain>,
    pub kind: IdType,
    pub number: u64,
}

impl ExternalId {
    pub fn parse(s: &str) -> Result<ExternalId, IdentError> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [num] => {
                let number = parse_number(num)?;
                Ok(ExternalId {
                    domain: None,
                    kind: IdType::Unk,
                    number,
                })
            }
            [domain, num] => {
                let domain = Domain::from_alias(domain)
                    .ok_or_else(|| IdentError::UnknownDomain(domain.to_string()))?;
                let number = parse_number(num)?;
                Ok(ExternalId {
                    domain: Some(domain),
                    kind: IdType::Unk,
                    number,
                })
            }
            [domain, kind, num] => {
                let domain = Domain::from_alias(domain)
                    .ok_or_else(|| IdentError::UnknownDomain(domain.to_string()))?;
                let kind = IdType::from_tag(kind)
                    .ok_or_else(|| IdentError::UnknownType(kind.to_string()))?;
                let number = parse_number(num)?;
                Ok(ExternalId {
                    domain: Some(domain),
                    kind,
                    number,
                })
            }
            _ => Err(IdentError::Malformed(s.to_string())),
        }
    }

    /// Resolves an ambiguous (domain-less) identifier against the set of
    /// currently-enabled upstream domains. Returns the identifier's own
    /// domain unchanged if it already has one.
    pub fn resolve_domain(&self, enabled: &[Domain]) -> Result<Domain, ResolveError> {
        if let Some(d) = self.domain {
            return Ok(d);
        }
        match enabled {
            [only] => Ok(*only),
            [] => Err(ResolveError::NoUpstreamsEnabled),
            _ => Err(ResolveError::Ambiguous),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("identifier has no domain and multiple upstreams are enabled")]
    Ambiguous,
    #[error("identifier has no domain and no upstreams are enabled")]
    NoUpstreamsEnabled,
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.domain {
            Some(d) => write!(f, "{d}:{}:{}", self.kind, self.number),
            None => write!(f, "{}", self.number),
        }
    }
}

/// Formats the canonical `domain:type:number` form for an identifier that is
/// known to be fully resolved, using the upstream wire prefixes from §6.
pub fn format(domain: Domain, kind: IdType, number: u64) -> String {
    format!("{}:{}:{}", domain.wire_prefix(), kind.tag(), number)
}

impl FromStr for ExternalId {
    type Err = IdentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExternalId::parse(s)
    }
}

fn parse_number(s: &str) -> Result<u64, IdentError> {
    match s.parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(IdentError::InvalidNumber(s.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_number() {
        let id = ExternalId::parse("41055").unwrap();
        assert_eq!(
            id,
            ExternalId {
                domain: None,
                kind: IdType::Unk,
                number: 41055
            }
        );
    }

    #[test]
    fn parses_domain_number() {
        let id = ExternalId::parse("pbdb:41055").unwrap();
        assert_eq!(id.domain, Some(Domain::Paleo));
        assert_eq!(id.number, 41055);
    }

    #[test]
    fn parses_domain_type_number_case_insensitive_aliases() {
        let id = ExternalId::parse("P:TXN:41055").unwrap();
        assert_eq!(id.domain, Some(Domain::Paleo));
        assert_eq!(id.kind, IdType::Txn);
        assert_eq!(id.number, 41055);
    }

    #[test]
    fn rejects_unknown_domain() {
        assert_eq!(
            ExternalId::parse("xyz:1").unwrap_err(),
            IdentError::UnknownDomain("xyz".to_string())
        );
    }

    #[test]
    fn rejects_zero_and_negative_numbers() {
        assert!(ExternalId::parse("0").is_err());
        assert!(ExternalId::parse("pbdb:-1").is_err());
    }

    #[test]
    fn format_round_trips_through_parse() {
        for (d, t, n) in [
            (Domain::Paleo, IdType::Occ, 1u64),
            (Domain::Quaternary, IdType::Sit, 2u64),
        ] {
            let s = format(d, t, n);
            let parsed = ExternalId::parse(&s).unwrap();
            assert_eq!(parsed.domain, Some(d));
            assert_eq!(parsed.kind, t);
            assert_eq!(parsed.number, n);
        }
    }

    #[test]
    fn resolve_domain_is_unambiguous_with_one_enabled_upstream() {
        let id = ExternalId::parse("99").unwrap();
        assert_eq!(
            id.resolve_domain(&[Domain::Quaternary]).unwrap(),
            Domain::Quaternary
        );
        assert_eq!(
            id.resolve_domain(&[Domain::Paleo, Domain::Quaternary])
                .unwrap_err(),
            ResolveError::Ambiguous
        );
    }
}
