//! Flat histograms handed to consumers

use std::ops::RangeInclusive;

use crate::error::{Error, Result};

/// Counts over bin edges with Poisson errors.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Histogram {
    /// Bin edges, one more than the number of bins
    pub edges: Vec<f64>,
    /// Counts per bin
    pub counts: Vec<f64>,
    /// `sqrt(count)` per bin
    pub errors: Vec<f64>,
}

impl Histogram {
    /// Build from explicit edges and counts
    #[must_use]
    pub fn new(edges: Vec<f64>, counts: Vec<f64>) -> Self {
        debug_assert_eq!(edges.len(), counts.len() + 1);
        let errors = counts.iter().map(|c| c.sqrt()).collect();
        Self {
            edges,
            counts,
            errors,
        }
    }

    /// Edges at `i * bin_width` for `i` in `0..=counts.len()`
    #[must_use]
    pub fn uniform(counts: Vec<f64>, bin_width: f64) -> Self {
        let edges = (0..=counts.len()).map(|i| i as f64 * bin_width).collect();
        Self::new(edges, counts)
    }

    /// Number of bins
    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Whether there are no bins
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Sum of all counts
    #[must_use]
    pub fn total(&self) -> f64 {
        self.counts.iter().sum()
    }
}

/// Regular binning between `min` and `max` with a fixed width.
#[derive(Debug, Clone, PartialEq)]
pub struct Binning {
    edges: Vec<f64>,
    min: f64,
    width: f64,
}

impl Binning {
    /// Cover `[min, max]` with bins of `width`; at least one bin.
    #[must_use]
    pub fn new(min: f64, max: f64, width: f64) -> Self {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let bins = (((max - min) / width).ceil() as usize).max(1);
        let edges = (0..=bins).map(|i| min + i as f64 * width).collect();
        Self { edges, min, width }
    }

    /// Bin edges
    #[must_use]
    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Number of bins
    #[must_use]
    pub fn bins(&self) -> usize {
        self.edges.len() - 1
    }

    /// Bin index of `value`, clamped into range; `None` below `min`
    #[must_use]
    pub fn index_of(&self, value: f64) -> Option<usize> {
        if value < self.min || value.is_nan() {
            return None;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let index = ((value - self.min) / self.width) as usize;
        Some(index.min(self.bins() - 1))
    }

    /// Histogram a set of values
    pub fn histogram(&self, values: impl IntoIterator<Item = f64>) -> Histogram {
        let mut counts = vec![0.0; self.bins()];
        for value in values {
            if let Some(index) = self.index_of(value) {
                counts[index] += 1.0;
            }
        }
        Histogram::new(self.edges.clone(), counts)
    }
}

/// Inclusive selection of spectra; `None` bounds mean "from the first" or
/// "to the last" available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpectrumRange {
    /// First spectrum to read
    pub first: Option<usize>,
    /// Last spectrum to read
    pub last: Option<usize>,
}

impl SpectrumRange {
    /// Every available spectrum
    pub const ALL: Self = Self {
        first: None,
        last: None,
    };

    /// Select `first..=last`
    #[must_use]
    pub const fn new(first: usize, last: usize) -> Self {
        Self {
            first: Some(first),
            last: Some(last),
        }
    }

    /// Resolve against the spectra a source holds.
    pub fn resolve(&self, available: RangeInclusive<usize>) -> Result<RangeInclusive<usize>> {
        let first = self.first.unwrap_or(*available.start());
        let last = self.last.unwrap_or(*available.end());
        if available.is_empty() {
            return Err(Error::config("no spectra available"));
        }
        if first > last {
            return Err(Error::config(format!(
                "first spectrum {first} is after last spectrum {last}"
            )));
        }
        if !available.contains(&first) || !available.contains(&last) {
            return Err(Error::config(format!(
                "spectra {first}..={last} outside available {}..={}",
                available.start(),
                available.end()
            )));
        }
        Ok(first..=last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_edges() {
        let hist = Histogram::uniform(vec![4.0, 9.0], 0.5);
        assert_eq!(hist.edges, vec![0.0, 0.5, 1.0]);
        assert_eq!(hist.errors, vec![2.0, 3.0]);
        assert!((hist.total() - 13.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_binning_clamps_max() {
        let binning = Binning::new(10.0, 20.0, 5.0);
        assert_eq!(binning.bins(), 2);
        let hist = binning.histogram([10.0, 14.9, 15.0, 20.0, 9.0]);
        assert_eq!(hist.counts, vec![2.0, 2.0]);
    }

    #[test]
    fn test_binning_degenerate_range() {
        let binning = Binning::new(3.0, 3.0, 1.0);
        assert_eq!(binning.bins(), 1);
        assert_eq!(binning.index_of(3.0), Some(0));
    }

    #[test]
    fn test_spectrum_range_resolve() {
        assert_eq!(SpectrumRange::ALL.resolve(1..=8).unwrap(), 1..=8);
        assert_eq!(SpectrumRange::new(2, 3).resolve(0..=3).unwrap(), 2..=3);
        assert!(SpectrumRange::new(3, 2).resolve(0..=8).is_err());
        assert!(SpectrumRange::new(0, 9).resolve(1..=8).is_err());
        #[allow(clippy::reversed_empty_ranges)]
        let empty = 1..=0;
        assert!(SpectrumRange::ALL.resolve(empty).is_err());
    }
}
