//! Interval sets and duration-weighted conversion
//!
//! Intervals are hour ranges within a reference year of 8760 hours. An
//! interval may wrap around the year end (`end < start`), as seasonal
//! definitions do. Extensive quantities split proportional to overlap
//! duration; intensive quantities take duration-weighted averages.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::coefficients::Coefficients;
use crate::error::{Error, Result};

/// Hours in the reference year.
pub const HOURS_IN_YEAR: u32 = 8760;

/// A named period within the reference year, in hours from year start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub name: String,
    pub start_hour: u32,
    pub end_hour: u32,
}

impl Interval {
    pub fn new(name: &str, start_hour: u32, end_hour: u32) -> Self {
        Self {
            name: name.to_string(),
            start_hour,
            end_hour,
        }
    }

    /// The whole reference year.
    pub fn annual(name: &str) -> Self {
        Self::new(name, 0, HOURS_IN_YEAR)
    }

    /// Duration in hours, accounting for wrap-around.
    pub fn duration(&self) -> u32 {
        if self.end_hour >= self.start_hour {
            self.end_hour - self.start_hour
        } else {
            HOURS_IN_YEAR - self.start_hour + self.end_hour
        }
    }

    /// Decompose into non-wrapping [start, end) segments.
    fn segments(&self) -> Vec<(u32, u32)> {
        if self.end_hour >= self.start_hour {
            vec![(self.start_hour, self.end_hour)]
        } else {
            vec![(self.start_hour, HOURS_IN_YEAR), (0, self.end_hour)]
        }
    }

    /// Hours shared with another interval.
    pub fn overlap_hours(&self, other: &Interval) -> u32 {
        let mut overlap = 0;
        for (a0, a1) in self.segments() {
            for (b0, b1) in other.segments() {
                let lo = a0.max(b0);
                let hi = a1.min(b1);
                if hi > lo {
                    overlap += hi - lo;
                }
            }
        }
        overlap
    }
}

/// An ordered set of intervals forming one temporal resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalSet {
    pub name: String,
    pub intervals: Vec<Interval>,
}

impl IntervalSet {
    pub fn new(name: &str, intervals: Vec<Interval>) -> Self {
        Self {
            name: name.to_string(),
            intervals,
        }
    }

    /// A single interval covering the whole year.
    pub fn annual(name: &str, interval_name: &str) -> Self {
        Self::new(name, vec![Interval::annual(interval_name)])
    }

    /// `n` equal consecutive intervals named by a closure over the index.
    pub fn uniform(name: &str, n: u32, label: impl Fn(u32) -> String) -> Self {
        let step = HOURS_IN_YEAR / n;
        let intervals = (0..n)
            .map(|i| {
                let end = if i == n - 1 { HOURS_IN_YEAR } else { (i + 1) * step };
                Interval::new(&label(i), i * step, end)
            })
            .collect();
        Self::new(name, intervals)
    }

    fn covers_ids(&self, ids: &[String]) -> bool {
        if self.intervals.len() != ids.len() {
            return false;
        }
        let names: IndexSet<&str> = self.intervals.iter().map(|i| i.name.as_str()).collect();
        ids.iter().all(|id| names.contains(id.as_str()))
    }

    fn interval(&self, name: &str) -> Option<&Interval> {
        self.intervals.iter().find(|i| i.name == name)
    }
}

/// Registry of interval sets.
#[derive(Debug, Clone, Default)]
pub struct IntervalRegister {
    sets: Vec<IntervalSet>,
}

impl IntervalRegister {
    pub fn register(&mut self, set: IntervalSet) {
        debug!(set = %set.name, intervals = set.intervals.len(), "interval set registered");
        self.sets.push(set);
    }

    pub fn get(&self, name: &str) -> Option<&IntervalSet> {
        self.sets.iter().find(|s| s.name == name)
    }

    /// Find the registered set whose interval names match a coordinate list.
    pub fn find_set(&self, ids: &[String]) -> Option<&IntervalSet> {
        self.sets.iter().find(|set| set.covers_ids(ids))
    }

    /// Build the sink×source coefficient matrix between two coordinate lists.
    ///
    /// Extensive weights are overlap/source-duration (splitting each source
    /// quantity across sinks); intensive weights are overlap/sink-duration
    /// (duration-weighted averaging). Coverage below `1 - 1e-6` is rejected.
    pub fn coefficients(
        &self,
        dim: &str,
        source_ids: &[String],
        sink_ids: &[String],
        extensive: bool,
    ) -> Result<Coefficients> {
        let source_set = self
            .find_set(source_ids)
            .ok_or_else(|| Error::MissingIntervalSet {
                dim: dim.to_string(),
            })?;
        let sink_set = self
            .find_set(sink_ids)
            .ok_or_else(|| Error::MissingIntervalSet {
                dim: dim.to_string(),
            })?;

        let sources: Vec<&Interval> = source_ids
            .iter()
            .map(|id| source_set.interval(id).expect("find_set checked membership"))
            .collect();
        let sinks: Vec<&Interval> = sink_ids
            .iter()
            .map(|id| sink_set.interval(id).expect("find_set checked membership"))
            .collect();

        let mut coeff = Coefficients::zeros(sinks.len(), sources.len());
        for (col, source) in sources.iter().enumerate() {
            for (row, sink) in sinks.iter().enumerate() {
                let overlap = source.overlap_hours(sink) as f64;
                if overlap == 0.0 {
                    continue;
                }
                let denominator = if extensive {
                    source.duration() as f64
                } else {
                    sink.duration() as f64
                };
                coeff.set(row, col, overlap / denominator);
            }
        }

        if extensive {
            for (col, source) in sources.iter().enumerate() {
                let coverage = coeff.col_sum(col);
                if coverage < 1.0 - 1e-6 {
                    return Err(Error::PartialCoverage {
                        dim: dim.to_string(),
                        name: source.name.clone(),
                        coverage,
                    });
                }
            }
        } else {
            for (row, sink) in sinks.iter().enumerate() {
                let coverage = coeff.row_sum(row);
                if coverage < 1.0 - 1e-6 {
                    return Err(Error::PartialCoverage {
                        dim: dim.to_string(),
                        name: sink.name.clone(),
                        coverage,
                    });
                }
            }
        }

        Ok(coeff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register() -> IntervalRegister {
        let mut register = IntervalRegister::default();
        register.register(IntervalSet::annual("annual", "year"));
        register.register(IntervalSet::new(
            "seasons",
            vec![
                // Meteorological seasons by hour, winter wrapping the year end
                Interval::new("winter", 8016, 1416),
                Interval::new("spring", 1416, 3624),
                Interval::new("summer", 3624, 5832),
                Interval::new("autumn", 5832, 8016),
            ],
        ));
        register
    }

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_wraparound_duration() {
        let winter = Interval::new("winter", 8016, 1416);
        assert_eq!(winter.duration(), 8760 - 8016 + 1416);
    }

    #[test]
    fn test_annual_to_seasons_splits_by_duration() {
        let register = register();
        let coeff = register
            .coefficients(
                "interval",
                &ids(&["year"]),
                &ids(&["winter", "spring", "summer", "autumn"]),
                true,
            )
            .unwrap();

        let out = coeff.apply(&[8760.0], &[1], 0).unwrap();
        // Each season receives its share of hours
        assert!((out[0] - 2160.0).abs() < 1e-9);
        assert!((out[1] - 2208.0).abs() < 1e-9);
        assert!((out[2] - 2208.0).abs() < 1e-9);
        assert!((out[3] - 2184.0).abs() < 1e-9);
        let total: f64 = out.iter().sum();
        assert!((total - 8760.0).abs() < 1e-9);
    }

    #[test]
    fn test_seasons_to_annual_sums() {
        let register = register();
        let coeff = register
            .coefficients(
                "interval",
                &ids(&["winter", "spring", "summer", "autumn"]),
                &ids(&["year"]),
                true,
            )
            .unwrap();

        let out = coeff.apply(&[100.0, 110.0, 90.0, 105.0], &[4], 0).unwrap();
        assert!((out[0] - 405.0).abs() < 1e-9);
    }

    #[test]
    fn test_intensive_annual_average() {
        let register = register();
        let coeff = register
            .coefficients(
                "interval",
                &ids(&["winter", "spring", "summer", "autumn"]),
                &ids(&["year"]),
                false,
            )
            .unwrap();

        // Constant price across seasons averages to itself
        let out = coeff.apply(&[870.0, 870.0, 870.0, 870.0], &[4], 0).unwrap();
        assert!((out[0] - 870.0).abs() < 1e-9);
    }

    #[test]
    fn test_intensive_fill_on_disaggregation() {
        let register = register();
        let coeff = register
            .coefficients(
                "interval",
                &ids(&["year"]),
                &ids(&["winter", "spring", "summer", "autumn"]),
                false,
            )
            .unwrap();

        // A yearly price copies to each season
        let out = coeff.apply(&[870.0], &[1], 0).unwrap();
        for price in out {
            assert!((price - 870.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_partial_coverage_rejected() {
        let mut register = register();
        register.register(IntervalSet::new(
            "summer_only",
            vec![Interval::new("jun_jul_aug", 3624, 5832)],
        ));

        let result = register.coefficients(
            "interval",
            &ids(&["year"]),
            &ids(&["jun_jul_aug"]),
            true,
        );
        assert!(matches!(result, Err(Error::PartialCoverage { .. })));
    }
}
