//! Canonical age unit is years-before-present (ybp). Clients may express
//! ages in ybp directly or in millions-of-years (Ma); §4.7.

use crate::Error;

const YEARS_PER_MA: f64 = 1_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeUnit {
    Ma,
    Ybp,
}

impl AgeUnit {
    pub fn parse(s: &str) -> Result<AgeUnit, Error> {
        match s.to_ascii_lowercase().as_str() {
            "ma" => Ok(AgeUnit::Ma),
            "ybp" => Ok(AgeUnit::Ybp),
            other => Err(Error::caller_input(format!("unknown ageunit '{other}'"))),
        }
    }
}

impl Default for AgeUnit {
    fn default() -> Self {
        AgeUnit::Ybp
    }
}

/// Converts a value already in years-before-present into the given unit.
pub fn ybp_to_unit(ybp: f64, unit: AgeUnit) -> f64 {
    match unit {
        AgeUnit::Ybp => ybp,
        AgeUnit::Ma => ybp / YEARS_PER_MA,
    }
}

/// Converts a value expressed in `unit` into years-before-present.
pub fn unit_to_ybp(v: f64, unit: AgeUnit) -> f64 {
    match unit {
        AgeUnit::Ybp => v,
        AgeUnit::Ma => v * YEARS_PER_MA,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeRule {
    Contain,
    Major,
    Buffer,
    Overlap,
}

impl TimeRule {
    pub fn parse(s: &str) -> Result<TimeRule, Error> {
        match s.to_ascii_lowercase().as_str() {
            "contain" => Ok(TimeRule::Contain),
            "major" => Ok(TimeRule::Major),
            "buffer" => Ok(TimeRule::Buffer),
            "overlap" => Ok(TimeRule::Overlap),
            other => Err(Error::caller_input(format!("unknown timerule '{other}'"))),
        }
    }
}

impl Default for TimeRule {
    /// §4.7: "default rule is `major`".
    fn default() -> Self {
        TimeRule::Major
    }
}

/// One side of a parsed `timebuffer` component: either a percentage of the
/// window's `range`, or an absolute magnitude already in the request's age
/// unit (still needing conversion to ybp by the caller, since this module
/// doesn't know the request's unit).
#[derive(Debug, Clone, Copy, PartialEq)]
enum BufferMagnitude {
    Percent(f64),
    Absolute(f64),
}

fn parse_magnitude(s: &str) -> Result<BufferMagnitude, Error> {
    if let Some(pct) = s.strip_suffix('%') {
        let v: f64 = pct
            .parse()
            .map_err(|_| Error::caller_input(format!("invalid timebuffer percentage '{s}'")))?;
        Ok(BufferMagnitude::Percent(v))
    } else {
        let v: f64 = s
            .parse()
            .map_err(|_| Error::caller_input(format!("invalid timebuffer value '{s}'")))?;
        Ok(BufferMagnitude::Absolute(v))
    }
}

/// Parses `timebuffer=old[,young]` into (oldbuffer_ybp, youngbuffer_ybp).
///
/// `range` is `max_ybp - min_ybp.unwrap_or(0.0)`, already in ybp. Absolute
/// (non-`%`) magnitudes are given in `unit` and are converted to ybp here.
pub fn parse_timebuffer(s: &str, range: f64, unit: AgeUnit) -> Result<(f64, f64), Error> {
    let mut parts = s.splitn(2, ',');
    let old = parts
        .next()
        .ok_or_else(|| Error::caller_input("empty timebuffer"))?;
    let young = parts.next().unwrap_or(old);

    let resolve = |m: BufferMagnitude| -> f64 {
        match m {
            BufferMagnitude::Percent(pct) => range * (pct / 100.0),
            BufferMagnitude::Absolute(v) => unit_to_ybp(v, unit),
        }
    };

    let oldbuffer_ybp = resolve(parse_magnitude(old)?);
    let youngbuffer_ybp = resolve(parse_magnitude(young)?);
    Ok((oldbuffer_ybp, youngbuffer_ybp))
}
