//! Histogram reads from a live DAE

use tracing::debug;

use super::client::IdcClient;
use crate::error::{Error, Result};
use crate::formats::{Histogram, SpectrumRange};

/// Run geometry reported by the DAE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DaeDimensions {
    /// Spectra per period, spectrum 0 excluded (`NSP1`)
    pub spectra: usize,
    /// Time channels per spectrum, overflow channel excluded (`NTC1`)
    pub time_channels: usize,
    /// Detectors (`NDET`)
    pub detectors: usize,
    /// Periods (`NPER`)
    pub periods: usize,
}

/// Reads histograms through an open [`IdcClient`].
#[derive(Debug)]
pub struct DaeSession {
    client: IdcClient,
    dims: Option<DaeDimensions>,
    boundaries: Option<Vec<f64>>,
}

fn non_negative(name: &str, value: i32) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| Error::format(format!("DAE reported negative {name}: {value}")))
}

impl DaeSession {
    /// Wrap an open client
    #[must_use]
    pub const fn new(client: IdcClient) -> Self {
        Self {
            client,
            dims: None,
            boundaries: None,
        }
    }

    /// Underlying client
    pub fn client(&mut self) -> &mut IdcClient {
        &mut self.client
    }

    /// Fetch (once) the run geometry
    pub fn dimensions(&mut self) -> Result<DaeDimensions> {
        if let Some(dims) = self.dims {
            return Ok(dims);
        }
        let dims = DaeDimensions {
            spectra: non_negative("NSP1", self.client.get_par_i32("NSP1")?)?,
            time_channels: non_negative("NTC1", self.client.get_par_i32("NTC1")?)?,
            detectors: non_negative("NDET", self.client.get_par_i32("NDET")?)?,
            periods: non_negative("NPER", self.client.get_par_i32("NPER")?)?,
        };
        debug!(?dims, "DAE geometry");
        self.dims = Some(dims);
        Ok(dims)
    }

    /// Fetch (once) the time-channel boundaries, `NTC1 + 1` values in µs
    pub fn time_boundaries(&mut self) -> Result<Vec<f64>> {
        if let Some(boundaries) = &self.boundaries {
            return Ok(boundaries.clone());
        }
        let dims = self.dimensions()?;
        let raw = self.client.get_par_f32s("RTCB1")?;
        if raw.len() < dims.time_channels + 1 {
            return Err(Error::format(format!(
                "RTCB1 holds {} boundaries, expected {}",
                raw.len(),
                dims.time_channels + 1
            )));
        }
        let boundaries: Vec<f64> = raw[..=dims.time_channels]
            .iter()
            .map(|&b| f64::from(b))
            .collect();
        self.boundaries = Some(boundaries.clone());
        Ok(boundaries)
    }

    /// Read the selected spectra of one period (1-based).
    ///
    /// Spectra are numbered from 1; time channel 0 of every spectrum is
    /// the overflow bin and is dropped.
    pub fn read_histograms(&mut self, range: SpectrumRange, period: usize) -> Result<Vec<Histogram>> {
        let dims = self.dimensions()?;
        if period == 0 || period > dims.periods.max(1) {
            return Err(Error::config(format!(
                "period {period} outside 1..={}",
                dims.periods.max(1)
            )));
        }
        let spectra = range.resolve(1..=dims.spectra)?;
        let edges = self.time_boundaries()?;
        let channels = dims.time_channels + 1;

        let first = (period - 1) * (dims.spectra + 1) + spectra.start();
        let count = spectra.end() - spectra.start() + 1;
        let to_wire = |value: usize| {
            i32::try_from(value).map_err(|_| Error::config(format!("{value} exceeds the wire range")))
        };
        let counts = self.client.get_spectrum(to_wire(first)?, to_wire(count)?)?;
        if counts.len() < count * channels {
            return Err(Error::format(format!(
                "GETDAT returned {} values, expected {}",
                counts.len(),
                count * channels
            )));
        }

        Ok(counts
            .chunks_exact(channels)
            .take(count)
            .map(|spectrum| {
                let values = spectrum[1..].iter().map(|&c| f64::from(c)).collect();
                Histogram::new(edges.clone(), values)
            })
            .collect())
    }

    /// Close the connection
    pub fn close(self) -> Result<()> {
        self.client.close()
    }
}
