//! Region sets and area-weighted conversion
//!
//! Regions are defined over a shared atlas of atomic zones, each with an
//! area. The intersection of two regions is the total area of the zones they
//! share, which gives deterministic area weights without any geometry
//! dependency: a region set at a coarser resolution simply groups more zones
//! per region.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::coefficients::Coefficients;
use crate::error::{Error, Result};

/// A named region: the atomic zones it covers and their areas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    /// zone id -> area within this region
    pub zones: IndexMap<String, f64>,
}

impl Region {
    pub fn new(name: &str, zones: Vec<(&str, f64)>) -> Self {
        Self {
            name: name.to_string(),
            zones: zones
                .into_iter()
                .map(|(id, area)| (id.to_string(), area))
                .collect(),
        }
    }

    pub fn area(&self) -> f64 {
        self.zones.values().sum()
    }

    /// Area shared with another region: zones present in both.
    pub fn intersection_area(&self, other: &Region) -> f64 {
        self.zones
            .iter()
            .filter_map(|(zone, area)| other.zones.get(zone).map(|b| area.min(*b)))
            .sum()
    }
}

/// An ordered set of regions forming one spatial resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSet {
    pub name: String,
    pub regions: Vec<Region>,
}

impl RegionSet {
    pub fn new(name: &str, regions: Vec<Region>) -> Self {
        Self {
            name: name.to_string(),
            regions,
        }
    }

    pub fn region_names(&self) -> Vec<&str> {
        self.regions.iter().map(|r| r.name.as_str()).collect()
    }

    /// True if the set contains exactly these region names, ignoring order.
    fn covers_ids(&self, ids: &[String]) -> bool {
        if self.regions.len() != ids.len() {
            return false;
        }
        let names: IndexSet<&str> = self.regions.iter().map(|r| r.name.as_str()).collect();
        ids.iter().all(|id| names.contains(id.as_str()))
    }

    fn region(&self, name: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.name == name)
    }
}

/// Registry of region sets, resolving coordinate lists to definitions and
/// computing conversion coefficients between resolutions.
#[derive(Debug, Clone, Default)]
pub struct RegionRegister {
    sets: IndexMap<String, RegionSet>,
}

impl RegionRegister {
    pub fn register(&mut self, set: RegionSet) {
        debug!(set = %set.name, regions = set.regions.len(), "region set registered");
        self.sets.insert(set.name.clone(), set);
    }

    pub fn get(&self, name: &str) -> Option<&RegionSet> {
        self.sets.get(name)
    }

    /// Find the registered set whose region names match a coordinate list.
    pub fn find_set(&self, ids: &[String]) -> Option<&RegionSet> {
        self.sets.values().find(|set| set.covers_ids(ids))
    }

    /// Build the sink×source coefficient matrix between two coordinate lists.
    ///
    /// Extensive quantities are apportioned by the fraction of each source
    /// region's area intersecting the sink region, conserving totals.
    /// Intensive quantities take the overlap-area weighted average of source
    /// values. Coverage below `1 - 1e-6` of a source region (extensive) or a
    /// sink region (intensive) is rejected.
    pub fn coefficients(
        &self,
        dim: &str,
        source_ids: &[String],
        sink_ids: &[String],
        extensive: bool,
    ) -> Result<Coefficients> {
        let source_set = self
            .find_set(source_ids)
            .ok_or_else(|| Error::MissingRegionSet {
                dim: dim.to_string(),
            })?;
        let sink_set = self
            .find_set(sink_ids)
            .ok_or_else(|| Error::MissingRegionSet {
                dim: dim.to_string(),
            })?;

        let sources: Vec<&Region> = source_ids
            .iter()
            .map(|id| source_set.region(id).expect("find_set checked membership"))
            .collect();
        let sinks: Vec<&Region> = sink_ids
            .iter()
            .map(|id| sink_set.region(id).expect("find_set checked membership"))
            .collect();

        let mut coeff = Coefficients::zeros(sinks.len(), sources.len());
        for (col, source) in sources.iter().enumerate() {
            for (row, sink) in sinks.iter().enumerate() {
                let overlap = source.intersection_area(sink);
                if overlap == 0.0 {
                    continue;
                }
                let denominator = if extensive {
                    source.area()
                } else {
                    sink.area()
                };
                coeff.set(row, col, overlap / denominator);
            }
        }

        // Conservative coverage check: extensive conversion must not drop
        // source mass; intensive averages must be taken over full sink area.
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
