//! Per-metric hysteresis filtering.
//!
//! A [`HysteresisFilter`] remembers the value it last published and only
//! reports a new sample as significant once it has moved further than a fixed
//! offset away from it. Small sensor noise is swallowed, so the radio stays off.

use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum MetricError {
    #[error("hysteresis offset must be finite and non-negative, got {0}")]
    InvalidOffset(f32),
}

/// Debounce filter for a single published metric.
///
/// `min_offset` is fixed at construction. `last_published` only changes
/// through [`HysteresisFilter::commit`], either when a publish is finalized or
/// when the value is rehydrated from durable storage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HysteresisFilter {
    last_published: f32,
    min_offset: f32,
}

impl HysteresisFilter {
    /// Create a filter that has not published anything yet.
    ///
    /// Until the first [`commit`](Self::commit) every finite sample counts as
    /// significant.
    pub fn new(min_offset: f32) -> Result<Self, MetricError> {
        if !min_offset.is_finite() || min_offset < 0.0 {
            return Err(MetricError::InvalidOffset(min_offset));
        }

        Ok(Self {
            last_published: f32::NAN,
            min_offset,
        })
    }

    /// Create a filter rehydrated with a previously published value.
    pub fn with_value(min_offset: f32, last_published: f32) -> Result<Self, MetricError> {
        let mut filter = Self::new(min_offset)?;
        filter.commit(last_published);
        Ok(filter)
    }

    /// Whether `sample` differs from the last published value by strictly
    /// more than the offset. Does not touch the stored value.
    ///
    /// A stored value that is not finite (nothing published yet, or garbage
    /// read from a never-initialized medium) makes every finite sample
    /// significant. A non-finite sample is never significant.
    pub fn evaluate(&self, sample: f32) -> bool {
        if !sample.is_finite() {
            return false;
        }
        if !self.last_published.is_finite() {
            return true;
        }

        libm::fabsf(sample - self.last_published) > self.min_offset
    }

    /// Overwrite the last published value unconditionally.
    pub fn commit(&mut self, value: f32) {
        self.last_published = value;
    }

    pub fn current_value(&self) -> f32 {
        self.last_published
    }

    pub fn min_offset(&self) -> f32 {
        self.min_offset
    }
}
