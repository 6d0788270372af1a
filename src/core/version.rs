// src/core/version.rs

use std::cmp::Ordering;

use thiserror::Error;

/// A parsed version: dot/dash separated segments, numeric-aware ordering.
/// Trailing zero segments are insignificant ("1.0" equals "1.0.0").
#[derive(Debug, Clone)]
pub struct Version {
    segments: Vec<Segment>,
}

// Equality must agree with `Ord` below, which treats trailing zero
// segments as insignificant; a derived impl would compare segment lists.
impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Number(u64),
    Text(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum VersionError {
    #[error("empty version string")]
    Empty,
    #[error("invalid version range '{0}'")]
    InvalidRange(String),
}

impl Version {
    pub fn parse(text: &str) -> Result<Self, VersionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(VersionError::Empty);
        }
        let segments = text
            .split(['.', '-'])
            .map(|part| match part.parse::<u64>() {
                Ok(n) => Segment::Number(n),
                Err(_) => Segment::Text(part.to_ascii_lowercase()),
            })
            .collect();
        Ok(Self { segments })
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.segments.len().max(other.segments.len());
        for i in 0..len {
            let a = self.segments.get(i);
            let b = other.segments.get(i);
            let ord = match (a, b) {
                (Some(Segment::Number(x)), Some(Segment::Number(y))) => x.cmp(y),
                (Some(Segment::Text(x)), Some(Segment::Text(y))) => x.cmp(y),
                // Numbers sort above qualifiers: 1.0 > 1.0-rc.
                (Some(Segment::Number(_)), Some(Segment::Text(_))) => Ordering::Greater,
                (Some(Segment::Text(_)), Some(Segment::Number(_))) => Ordering::Less,
                (Some(Segment::Number(x)), None) => x.cmp(&0),
                (None, Some(Segment::Number(y))) => 0.cmp(y),
                (Some(Segment::Text(_)), None) => Ordering::Less,
                (None, Some(Segment::Text(_))) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A bracket range: `[1.0,2.0)`, `(,1.5]`, `[1.0]`. A bare version string
/// is not a range; callers check [`is_range`] first.
#[derive(Debug, Clone)]
pub struct VersionRange {
    lower: Option<(Version, bool)>,
    upper: Option<(Version, bool)>,
}

/// Whether a parent version reference uses range syntax.
pub fn is_range(text: &str) -> bool {
    let text = text.trim();
    text.starts_with('[') || text.starts_with('(')
}

impl VersionRange {
    pub fn parse(text: &str) -> Result<Self, VersionError> {
        let trimmed = text.trim();
        let invalid = || VersionError::InvalidRange(text.to_string());

        let lower_inclusive = match trimmed.chars().next() {
            Some('[') => true,
            Some('(') => false,
            _ => return Err(invalid()),
        };
        let upper_inclusive = match trimmed.chars().last() {
            Some(']') => true,
            Some(')') => false,
            _ => return Err(invalid()),
        };
        let inner = &trimmed[1..trimmed.len() - 1];

        // Single-version form: [1.0] pins exactly that version.
        if !inner.contains(',') {
            if !lower_inclusive || !upper_inclusive {
                return Err(invalid());
            }
            let version = Version::parse(inner)?;
            return Ok(Self {
                lower: Some((version.clone(), true)),
                upper: Some((version, true)),
            });
        }

        let (low, high) = inner.split_once(',').ok_or_else(invalid)?;
        let lower = if low.trim().is_empty() {
            None
        } else {
            Some((Version::parse(low)?, lower_inclusive))
        };
        let upper = if high.trim().is_empty() {
            None
        } else {
            Some((Version::parse(high)?, upper_inclusive))
        };
        if lower.is_none() && upper.is_none() {
            return Err(invalid());
        }
        Ok(Self { lower, upper })
    }

    pub fn contains(&self, version: &Version) -> bool {
        if let Some((lower, inclusive)) = &self.lower {
            match version.cmp(lower) {
                Ordering::Less => return false,
                Ordering::Equal if !inclusive => return false,
                _ => {}
            }
        }
        if let Some((upper, inclusive)) = &self.upper {
            match version.cmp(upper) {
                Ordering::Greater => return false,
                Ordering::Equal if !inclusive => return false,
                _ => {}
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(text: &str) -> Version {
        Version::parse(text).unwrap()
    }

    #[test]
    fn ordering_is_numeric_aware() {
        assert!(v("1.10.0") > v("1.9.0"));
        assert!(v("2.0") > v("1.99.99"));
        assert_eq!(v("1.0"), v("1.0.0"));
        assert!(v("1.0") > v("1.0-rc1"));
    }

    #[test]
    fn closed_range_contains_bounds() {
        let range = VersionRange::parse("[1.0,2.0]").unwrap();
        assert!(range.contains(&v("1.0")));
        assert!(range.contains(&v("1.5")));
        assert!(range.contains(&v("2.0")));
        assert!(!range.contains(&v("2.0.1")));
    }

    #[test]
    fn half_open_range_excludes_upper() {
        let range = VersionRange::parse("[1.0,2.0)").unwrap();
        assert!(range.contains(&v("1.999")));
        assert!(!range.contains(&v("2.0")));
    }

    #[test]
    fn unbounded_and_pinned_forms() {
        let open_low = VersionRange::parse("(,1.5]").unwrap();
        assert!(open_low.contains(&v("0.1")));
        assert!(!open_low.contains(&v("1.6")));

        let pinned = VersionRange::parse("[1.2.3]").unwrap();
        assert!(pinned.contains(&v("1.2.3")));
        assert!(!pinned.contains(&v("1.2.4")));
    }

    #[test]
    fn range_detection() {
        assert!(is_range("[1.0,2.0)"));
        assert!(is_range("(,1.0]"));
        assert!(!is_range("1.0.0"));
    }

    #[test]
    fn malformed_ranges_are_rejected() {
        assert!(VersionRange::parse("1.0,2.0").is_err());
        assert!(VersionRange::parse("[,]").is_err());
        assert!(VersionRange::parse("(1.0)").is_err());
    }
}
