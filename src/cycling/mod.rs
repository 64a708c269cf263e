// src/cycling/mod.rs

//! Cycle points, intervals and the sequences tasks recur on.
//!
//! Points are plain integers. Every task belongs to one or more
//! [`Sequence`]s that say which points it has an instance at, and the
//! runahead computation projects the sequences forward from a base point.

use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A point on the workflow's cycling axis.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CyclePoint(i64);

impl CyclePoint {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for CyclePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CyclePoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i64>()
            .map(CyclePoint)
            .map_err(|e| format!("invalid cycle point '{s}': {e}"))
    }
}

impl From<i64> for CyclePoint {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// A signed distance between two cycle points.
///
/// Written as `P<n>` / `-P<n>` in config; a bare integer is accepted too.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Interval(i64);

impl Interval {
    pub const ZERO: Interval = Interval(0);

    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> i64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 < 0 {
            write!(f, "-P{}", -self.0)
        } else {
            write!(f, "P{}", self.0)
        }
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (negative, rest) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };
        let digits = rest
            .strip_prefix('P')
            .or_else(|| rest.strip_prefix('p'))
            .unwrap_or(rest);
        let value: i64 = digits
            .parse()
            .map_err(|e| format!("invalid interval '{s}': {e}"))?;
        Ok(Interval(if negative { -value } else { value }))
    }
}

impl Add<Interval> for CyclePoint {
    type Output = CyclePoint;

    fn add(self, rhs: Interval) -> CyclePoint {
        CyclePoint(self.0 + rhs.0)
    }
}

impl Sub<Interval> for CyclePoint {
    type Output = CyclePoint;

    fn sub(self, rhs: Interval) -> CyclePoint {
        CyclePoint(self.0 - rhs.0)
    }
}

impl Sub<CyclePoint> for CyclePoint {
    type Output = Interval;

    fn sub(self, rhs: CyclePoint) -> Interval {
        Interval(self.0 - rhs.0)
    }
}

/// A recurrence: the set of points a task has instances at.
pub trait Sequence: fmt::Debug + Send + Sync {
    /// First point on the sequence strictly after `point`.
    fn next_point(&self, point: CyclePoint) -> Option<CyclePoint>;

    /// First point on the sequence at or after `point`.
    fn first_point(&self, point: CyclePoint) -> Option<CyclePoint>;

    fn is_on_sequence(&self, point: CyclePoint) -> bool;
}

pub type SequenceRef = Arc<dyn Sequence>;

/// `start, start + step, start + 2*step, ...` up to an optional end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegerSequence {
    start: CyclePoint,
    step: i64,
    end: Option<CyclePoint>,
}

impl IntegerSequence {
    pub fn new(start: CyclePoint, step: i64, end: Option<CyclePoint>) -> Result<Self, String> {
        if step <= 0 {
            return Err(format!("sequence step must be positive (got {step})"));
        }
        if let Some(end) = end {
            if end < start {
                return Err(format!("sequence end {end} is before its start {start}"));
            }
        }
        Ok(Self { start, step, end })
    }

    pub fn start(&self) -> CyclePoint {
        self.start
    }

    pub fn step(&self) -> i64 {
        self.step
    }

    fn within_end(&self, point: CyclePoint) -> Option<CyclePoint> {
        match self.end {
            Some(end) if point > end => None,
            _ => Some(point),
        }
    }
}

impl Sequence for IntegerSequence {
    fn next_point(&self, point: CyclePoint) -> Option<CyclePoint> {
        self.first_point(CyclePoint(point.0 + 1))
    }

    fn first_point(&self, point: CyclePoint) -> Option<CyclePoint> {
        if point <= self.start {
            return self.within_end(self.start);
        }
        let offset = point.0 - self.start.0;
        let steps = (offset + self.step - 1) / self.step;
        self.within_end(CyclePoint(self.start.0 + steps * self.step))
    }

    fn is_on_sequence(&self, point: CyclePoint) -> bool {
        point >= self.start
            && (point.0 - self.start.0) % self.step == 0
            && self.within_end(point).is_some()
    }
}

/// Earliest point strictly after `point` across several sequences.
pub fn next_point_on_any(sequences: &[SequenceRef], point: CyclePoint) -> Option<CyclePoint> {
    sequences.iter().filter_map(|s| s.next_point(point)).min()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_parses_iso_like_forms() {
        assert_eq!("P2".parse::<Interval>(), Ok(Interval::new(2)));
        assert_eq!("-P1".parse::<Interval>(), Ok(Interval::new(-1)));
        assert_eq!("+P3".parse::<Interval>(), Ok(Interval::new(3)));
        assert_eq!("4".parse::<Interval>(), Ok(Interval::new(4)));
        assert!("Px".parse::<Interval>().is_err());
        assert_eq!(Interval::new(-2).to_string(), "-P2");
    }

    #[test]
    fn point_arithmetic() {
        let p = CyclePoint::new(5);
        assert_eq!(p + Interval::new(2), CyclePoint::new(7));
        assert_eq!(p - Interval::new(-1), CyclePoint::new(6));
        assert_eq!(CyclePoint::new(9) - p, Interval::new(4));
    }

    #[test]
    fn integer_sequence_walks_forward() {
        let seq = IntegerSequence::new(CyclePoint::new(1), 2, Some(CyclePoint::new(7))).unwrap();
        assert_eq!(seq.first_point(CyclePoint::new(-3)), Some(CyclePoint::new(1)));
        assert_eq!(seq.first_point(CyclePoint::new(4)), Some(CyclePoint::new(5)));
        assert_eq!(seq.next_point(CyclePoint::new(5)), Some(CyclePoint::new(7)));
        assert_eq!(seq.next_point(CyclePoint::new(7)), None);
        assert!(seq.is_on_sequence(CyclePoint::new(3)));
        assert!(!seq.is_on_sequence(CyclePoint::new(4)));
        assert!(!seq.is_on_sequence(CyclePoint::new(9)));
    }

    #[test]
    fn rejects_bad_sequences() {
        assert!(IntegerSequence::new(CyclePoint::new(1), 0, None).is_err());
        assert!(IntegerSequence::new(CyclePoint::new(5), 1, Some(CyclePoint::new(2))).is_err());
    }

    #[test]
    fn next_point_on_any_picks_earliest() {
        let a: SequenceRef = Arc::new(IntegerSequence::new(CyclePoint::new(0), 3, None).unwrap());
        let b: SequenceRef = Arc::new(IntegerSequence::new(CyclePoint::new(1), 2, None).unwrap());
        assert_eq!(next_point_on_any(&[a, b], CyclePoint::new(3)), Some(CyclePoint::new(5)));
        assert_eq!(next_point_on_any(&[], CyclePoint::new(3)), None);
    }
}
