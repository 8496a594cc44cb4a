//! Adaptors and the conversion pipeline
//!
//! An [`Adaptor`] converts a source data array toward a sink spec. The
//! built-in adaptors each handle one concern and are composed in a fixed
//! order: axis reorder, region, interval, unit. [`ConvertRegister`] bundles
//! the unit/region/interval registers and drives the pipeline.

use smif_metadata::{DataArray, Spec};
use tracing::trace;

use crate::coefficients::Coefficients;
use crate::error::{Error, Result};
use crate::interval::IntervalRegister;
use crate::region::RegionRegister;
use crate::unit::UnitRegistry;

/// Converts a data array from its own spec toward a sink spec.
///
/// Adaptors are pure: the same inputs always produce the same output, and
/// NaN values propagate untouched.
pub trait Adaptor {
    fn name(&self) -> &'static str;

    /// Convert as far as this adaptor's concern reaches.
    ///
    /// Dimensions or units outside the adaptor's concern pass through for a
    /// later pipeline stage.
    fn convert(&self, data: &DataArray, sink: &Spec) -> Result<DataArray>;
}

/// Cache for conversion coefficients, keyed by source and sink spec.
///
/// Implemented by stores; a miss computes in-line, a failed write-back is
/// the implementor's concern, not the adaptor's.
pub trait CoefficientCache {
    fn read_coefficients(&self, source: &Spec, sink: &Spec) -> Option<Coefficients>;
    fn write_coefficients(&self, source: &Spec, sink: &Spec, coefficients: &Coefficients);
}

/// No-op cache: always miss, never store.
pub struct NoCache;

impl CoefficientCache for NoCache {
    fn read_coefficients(&self, _source: &Spec, _sink: &Spec) -> Option<Coefficients> {
        None
    }

    fn write_coefficients(&self, _source: &Spec, _sink: &Spec, _coefficients: &Coefficients) {}
}

/// Passes values through unchanged when source and sink specs match.
pub struct IdentityAdaptor;

impl Adaptor for IdentityAdaptor {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn convert(&self, data: &DataArray, sink: &Spec) -> Result<DataArray> {
        if !data.spec().matches(sink) {
            return Err(Error::DimMismatch {
                src: data.spec().name().to_string(),
                sink: sink.name().to_string(),
            });
        }
        DataArray::new(sink.clone(), data.values().to_vec()).map_err(Into::into)
    }
}

/// Converts region dimensions via area-weighted coefficients.
pub struct RegionAdaptor<'a> {
    register: &'a RegionRegister,
    cache: &'a dyn CoefficientCache,
}

impl<'a> RegionAdaptor<'a> {
    pub fn new(register: &'a RegionRegister) -> Self {
        Self {
            register,
            cache: &NoCache,
        }
    }

    pub fn with_cache(register: &'a RegionRegister, cache: &'a dyn CoefficientCache) -> Self {
        Self { register, cache }
    }

    /// True if this adaptor can bridge the coordinate lists of a dimension.
    fn handles(&self, source_ids: &[String], sink_ids: &[String]) -> bool {
        self.register.find_set(source_ids).is_some() && self.register.find_set(sink_ids).is_some()
    }
}

impl Adaptor for RegionAdaptor<'_> {
    fn name(&self) -> &'static str {
        "region"
    }

    fn convert(&self, data: &DataArray, sink: &Spec) -> Result<DataArray> {
        let mut current = data.clone();
        for dim in sink.dims().to_vec() {
            let source_ids = match current.spec().coords(&dim) {
                Some(ids) => ids.to_vec(),
                None => continue,
            };
            let sink_ids = match sink.coords(&dim) {
                Some(ids) => ids.to_vec(),
                None => continue,
            };
            if source_ids == sink_ids || !self.handles(&source_ids, &sink_ids) {
                continue;
            }

            let extensive = current.spec().is_extensive();
            let target_spec = current.spec().with_coords(&dim, sink_ids.clone())?;

            let coefficients = match self.cache.read_coefficients(current.spec(), &target_spec) {
                Some(cached) => cached,
                None => {
                    let computed =
                        self.register
                            .coefficients(&dim, &source_ids, &sink_ids, extensive)?;
                    self.cache
                        .write_coefficients(current.spec(), &target_spec, &computed);
                    computed
                }
            };

            let axis = current
                .spec()
                .axis(&dim)
                .expect("dim present in current spec");
            let shape = current.spec().shape();
            trace!(dim = %dim, axis, "converting region dimension");
            let values = coefficients.apply(current.values(), &shape, axis)?;
            current = DataArray::new(target_spec, values)?;
        }
        Ok(current)
    }
}

/// Converts interval dimensions via duration-weighted coefficients.
pub struct IntervalAdaptor<'a> {
    register: &'a IntervalRegister,
    cache: &'a dyn CoefficientCache,
}

impl<'a> IntervalAdaptor<'a> {
    pub fn new(register: &'a IntervalRegister) -> Self {
        Self {
            register,
            cache: &NoCache,
        }
    }

    pub fn with_cache(register: &'a IntervalRegister, cache: &'a dyn CoefficientCache) -> Self {
        Self { register, cache }
    }

    fn handles(&self, source_ids: &[String], sink_ids: &[String]) -> bool {
        self.register.find_set(source_ids).is_some() && self.register.find_set(sink_ids).is_some()
    }
}

impl Adaptor for IntervalAdaptor<'_> {
    fn name(&self) -> &'static str {
        "interval"
    }

    fn convert(&self, data: &DataArray, sink: &Spec) -> Result<DataArray> {
        let mut current = data.clone();
        for dim in sink.dims().to_vec() {
            let source_ids = match current.spec().coords(&dim) {
                Some(ids) => ids.to_vec(),
                None => continue,
            };
            let sink_ids = match sink.coords(&dim) {
                Some(ids) => ids.to_vec(),
                None => continue,
            };
            if source_ids == sink_ids || !self.handles(&source_ids, &sink_ids) {
                continue;
            }

            let extensive = current.spec().is_extensive();
            let target_spec = current.spec().with_coords(&dim, sink_ids.clone())?;

            let coefficients = match self.cache.read_coefficients(current.spec(), &target_spec) {
                Some(cached) => cached,
                None => {
                    let computed =
                        self.register
                            .coefficients(&dim, &source_ids, &sink_ids, extensive)?;
                    self.cache
                        .write_coefficients(current.spec(), &target_spec, &computed);
                    computed
                }
            };

            let axis = current
                .spec()
                .axis(&dim)
                .expect("dim present in current spec");
            let shape = current.spec().shape();
            trace!(dim = %dim, axis, "converting interval dimension");
            let values = coefficients.apply(current.values(), &shape, axis)?;
            current = DataArray::new(target_spec, values)?;
        }
        Ok(current)
    }
}

/// Rescales values between units of the same physical dimension.
pub struct UnitAdaptor<'a> {
    registry: &'a UnitRegistry,
}

impl<'a> UnitAdaptor<'a> {
    pub fn new(registry: &'a UnitRegistry) -> Self {
        Self { registry }
    }
}

impl Adaptor for UnitAdaptor<'_> {
    fn name(&self) -> &'static str {
        "unit"
    }

    fn convert(&self, data: &DataArray, sink: &Spec) -> Result<DataArray> {
        if data.spec().unit() == sink.unit() {
            return Ok(data.clone());
        }
        let mut values = data.values().to_vec();
        self.registry
            .convert_slice(&mut values, data.spec().unit(), sink.unit())?;
        let spec = data.spec().with_unit(sink.unit());
        DataArray::new(spec, values).map_err(Into::into)
    }
}

/// Reorder array axes to the sink's dimension order.
fn reorder_axes(data: &DataArray, sink: &Spec) -> Result<DataArray> {
    let source = data.spec();
    if source.dims() == sink.dims() {
        return Ok(data.clone());
    }

    // Permutation: output axis -> source axis
    let mut permutation = Vec::with_capacity(sink.dims().len());
    for dim in sink.dims() {
        let axis = source.axis(dim).ok_or_else(|| Error::DimMismatch {
            src: source.name().to_string(),
            sink: sink.name().to_string(),
        })?;
        permutation.push(axis);
    }

    let src_shape = source.shape();
    let out_shape: Vec<usize> = permutation.iter().map(|&a| src_shape[a]).collect();

    // Row-major strides of the source array
    let mut src_strides = vec![1usize; src_shape.len()];
    for axis in (0..src_shape.len().saturating_sub(1)).rev() {
        src_strides[axis] = src_strides[axis + 1] * src_shape[axis + 1];
    }

    let mut out = vec![0.0; data.values().len()];
    let mut index = vec![0usize; out_shape.len()];
    for slot in out.iter_mut() {
        let mut flat = 0;
        for (out_axis, &src_axis) in permutation.iter().enumerate() {
            flat += index[out_axis] * src_strides[src_axis];
        }
        *slot = data.values()[flat];

        // Advance the row-major index
        for axis in (0..out_shape.len()).rev() {
            index[axis] += 1;
            if index[axis] < out_shape[axis] {
                break;
            }
            index[axis] = 0;
        }
    }

    // Rebuild the spec in sink dimension order with the source's coords
    let coords = sink
        .dims()
        .iter()
        .map(|dim| {
            smif_metadata::Coords::new(
                dim.clone(),
                source.coords(dim).expect("checked above").to_vec(),
            )
        })
        .collect();
    let spec = Spec::new(
        source.name(),
        coords,
        source.dtype(),
        source.unit(),
    )?
    .extensive(source.is_extensive());
    DataArray::new(spec, out).map_err(Into::into)
}

/// The fixed conversion pipeline between a source and a sink spec.
pub struct AdaptorPipeline<'a> {
    register: &'a ConvertRegister,
    cache: &'a dyn CoefficientCache,
}

impl AdaptorPipeline<'_> {
    /// Run the pipeline: axis reorder, region, interval, unit.
    ///
    /// The result is checked against the sink spec; any dimension left
    /// unconverted means no adaptor could bridge it.
    pub fn convert(&self, data: &DataArray, sink: &Spec) -> Result<DataArray> {
        let source = data.spec();
        if !source.has_same_dims(sink) {
            return Err(Error::DimMismatch {
                src: source.name().to_string(),
                sink: sink.name().to_string(),
            });
        }
        if source.matches(sink) {
            return IdentityAdaptor.convert(data, sink);
        }

        let mut current = reorder_axes(data, sink)?;
        current = RegionAdaptor::with_cache(&self.register.regions, self.cache)
            .convert(&current, sink)?;
        current = IntervalAdaptor::with_cache(&self.register.intervals, self.cache)
            .convert(&current, sink)?;
        current = UnitAdaptor::new(&self.register.units).convert(&current, sink)?;

        // Anything still mismatched had no registered conversion
        for dim in sink.dims() {
            if current.spec().coords(dim) != sink.coords(dim) {
                return Err(Error::UnknownDimension { dim: dim.clone() });
            }
        }
        DataArray::new(sink.clone(), current.into_parts().1).map_err(Into::into)
    }
}

/// Bundled unit, region and interval registers.
///
/// One register is shared per model run; data handles borrow it to convert
/// dependency data between producer and consumer specs.
#[derive(Debug, Clone, Default)]
pub struct ConvertRegister {
    pub units: UnitRegistry,
    pub regions: RegionRegister,
    pub intervals: IntervalRegister,
}

impl ConvertRegister {
    /// A register with default units and no region/interval sets.
    pub fn with_default_units() -> Self {
        Self {
            units: UnitRegistry::default(),
            regions: RegionRegister::default(),
            intervals: IntervalRegister::default(),
        }
    }

    /// The pipeline over this register without coefficient caching.
    pub fn pipeline(&self) -> AdaptorPipeline<'_> {
        AdaptorPipeline {
            register: self,
            cache: &NoCache,
        }
    }

    /// The pipeline over this register, caching coefficients.
    pub fn pipeline_with_cache<'a>(
        &'a self,
        cache: &'a dyn CoefficientCache,
    ) -> AdaptorPipeline<'a> {
        AdaptorPipeline {
            register: self,
            cache,
        }
    }

    /// Convert a data array to a sink spec through the full pipeline.
    pub fn convert(&self, data: &DataArray, sink: &Spec) -> Result<DataArray> {
        self.pipeline().convert(data, sink)
    }

    /// True if a source spec can be adapted to a sink spec.
    pub fn is_convertible(&self, source: &Spec, sink: &Spec) -> bool {
        if !source.has_same_dims(sink) {
            return false;
        }
        for dim in sink.dims() {
            let source_ids = source.coords(dim).unwrap_or(&[]);
            let sink_ids = sink.coords(dim).unwrap_or(&[]);
            if source_ids == sink_ids {
                continue;
            }
            let regions = self.regions.find_set(source_ids).is_some()
                && self.regions.find_set(sink_ids).is_some();
            let intervals = self.intervals.find_set(source_ids).is_some()
                && self.intervals.find_set(sink_ids).is_some();
            if !regions && !intervals {
                return false;
            }
        }
        source.unit() == sink.unit() || self.units.compatible(source.unit(), sink.unit())
    }
}
