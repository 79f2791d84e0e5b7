//! Orbital propagation and the ECI -> geodetic -> scene projection.
//!
//! SGP4 comes from the `sgp4` crate and is only reached through the
//! [`PropagationLibrary`] capability, so a context that cannot provide it
//! is detected when the library is loaded rather than halfway through a
//! batch. Scene space has the globe at radius 1.0.

use std::f64::consts::{FRAC_PI_2, PI};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use nalgebra::Vector3;
use sgp4::Constants;
use thiserror::Error;

use crate::time::greenwich_mean_sidereal_time;
use crate::tle::ElementSetEntry;

/// Scene-space radius satellites are drawn at.
pub const SATELLITE_RADIUS: f64 = 1.1;

pub const WGS72_EQUATORIAL_RADIUS_KM: f64 = 6378.135;
pub const WGS72_FLATTENING: f64 = 1.0 / 298.26;
const GEODETIC_ITERATIONS: usize = 20;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PropagationError {
    #[error("element set has no TLE lines")]
    MissingLines,
    #[error("could not parse element set: {0}")]
    Parse(String),
    #[error("propagation failed: {0}")]
    Propagation(String),
    #[error("propagation produced a non-finite position")]
    NonFinite,
    #[error("propagation library unavailable: {0}")]
    LibraryUnavailable(String),
}

/// A parsed element set, ready for repeated propagation.
#[derive(Clone)]
pub struct OrbitRecord {
    pub constants: Constants,
    pub epoch_minutes: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geodetic {
    pub latitude: f64,
    pub longitude: f64,
    pub height_km: f64,
}

pub trait PropagationLibrary {
    fn parse_elements(&self, line1: &str, line2: &str) -> Result<OrbitRecord, PropagationError>;

    /// Inertial (TEME) position in km.
    fn propagate(&self, record: &OrbitRecord, timestamp: DateTime<Utc>) -> Result<Vector3<f64>, PropagationError>;

    fn sidereal_time(&self, timestamp: DateTime<Utc>) -> f64;

    fn eci_to_geodetic(&self, position: &Vector3<f64>, sidereal_time: f64) -> Geodetic;
}

/// Builds a library inside whichever execution context will use it.
pub type LibraryLoader =
    Arc<dyn Fn() -> Result<Box<dyn PropagationLibrary>, PropagationError> + Send + Sync>;

pub fn sgp4_loader() -> LibraryLoader {
    Arc::new(|| Sgp4Library::load().map(|lib| Box::new(lib) as Box<dyn PropagationLibrary>))
}

const SELF_CHECK_LINE1: &str = "1 25544U 98067A   08264.51782528 -.00002182  00000-0 -11606-4 0  2927";
const SELF_CHECK_LINE2: &str = "2 25544  51.6416 247.4627 0006703 130.5360 325.0288 15.72125391563537";

pub struct Sgp4Library;

impl Sgp4Library {
    /// Loads the library and propagates a reference element set at its own
    /// epoch; any failure means the library is unusable in this context.
    pub fn load() -> Result<Self, PropagationError> {
        let lib = Sgp4Library;
        let record = lib
            .parse_elements(SELF_CHECK_LINE1, SELF_CHECK_LINE2)
            .map_err(|e| PropagationError::LibraryUnavailable(e.to_string()))?;
        let epoch = DateTime::<Utc>::from_timestamp_millis((record.epoch_minutes * 60_000.0) as i64)
            .ok_or_else(|| PropagationError::LibraryUnavailable("reference epoch out of range".to_string()))?;
        lib.propagate(&record, epoch)
            .map_err(|e| PropagationError::LibraryUnavailable(e.to_string()))?;
        Ok(lib)
    }
}

impl PropagationLibrary for Sgp4Library {
    fn parse_elements(&self, line1: &str, line2: &str) -> Result<OrbitRecord, PropagationError> {
        let elements = sgp4::Elements::from_tle(None, line1.as_bytes(), line2.as_bytes())
            .map_err(|e| PropagationError::Parse(format!("{:?}", e)))?;
        let constants = Constants::from_elements(&elements)
            .map_err(|e| PropagationError::Parse(format!("{:?}", e)))?;
        let epoch_minutes = elements.datetime.and_utc().timestamp_millis() as f64 / 60_000.0;
        Ok(OrbitRecord { constants, epoch_minutes })
    }

    fn propagate(&self, record: &OrbitRecord, timestamp: DateTime<Utc>) -> Result<Vector3<f64>, PropagationError> {
        let minutes = timestamp.timestamp_millis() as f64 / 60_000.0 - record.epoch_minutes;
        let prediction = record
            .constants
            .propagate(sgp4::MinutesSinceEpoch(minutes))
            .map_err(|e| PropagationError::Propagation(format!("{:?}", e)))?;
        let p = Vector3::new(prediction.position[0], prediction.position[1], prediction.position[2]);
        if p.iter().all(|c| c.is_finite()) {
            Ok(p)
        } else {
            Err(PropagationError::NonFinite)
        }
    }

    fn sidereal_time(&self, timestamp: DateTime<Utc>) -> f64 {
        greenwich_mean_sidereal_time(timestamp)
    }

    fn eci_to_geodetic(&self, position: &Vector3<f64>, sidereal_time: f64) -> Geodetic {
        eci_to_geodetic(position, sidereal_time)
    }
}

/// Iterative geodetic latitude on the WGS72 ellipsoid.
pub fn eci_to_geodetic(position: &Vector3<f64>, sidereal_time: f64) -> Geodetic {
    let a = WGS72_EQUATORIAL_RADIUS_KM;
    let f = WGS72_FLATTENING;
    let e2 = 2.0 * f - f * f;
    let r = (position.x * position.x + position.y * position.y).sqrt();

    let mut longitude = position.y.atan2(position.x) - sidereal_time;
    longitude = (longitude + PI).rem_euclid(2.0 * PI) - PI;

    let mut latitude = position.z.atan2(r);
    let mut c = 1.0;
    for _ in 0..GEODETIC_ITERATIONS {
        let sin_lat = latitude.sin();
        c = 1.0 / (1.0 - e2 * sin_lat * sin_lat).sqrt();
        latitude = (position.z + a * c * e2 * sin_lat).atan2(r);
    }
    let height_km = r / latitude.cos() - a * c;

    Geodetic { latitude, longitude, height_km }
}

/// Spherical placement with the polar angle taken from latitude and the
/// azimuth from longitude + 180°, matching the globe's texture seam.
pub fn geodetic_to_scene(latitude: f64, longitude: f64, radius: f64) -> [f32; 3] {
    let phi = FRAC_PI_2 - latitude;
    let theta = longitude + PI;
    [
        (radius * phi.sin() * theta.sin()) as f32,
        (radius * phi.cos()) as f32,
        (radius * phi.sin() * theta.cos()) as f32,
    ]
}

/// Inverse of [`geodetic_to_scene`]: latitude and longitude in radians.
pub fn scene_to_lat_lon(point: [f32; 3]) -> Option<(f64, f64)> {
    let [x, y, z] = point.map(f64::from);
    let r = (x * x + y * y + z * z).sqrt();
    if r == 0.0 {
        return None;
    }
    Some(((y / r).asin(), (-x).atan2(-z)))
}

pub fn propagate_record(
    lib: &dyn PropagationLibrary,
    record: &OrbitRecord,
    timestamp: DateTime<Utc>,
) -> Result<[f32; 3], PropagationError> {
    let eci = lib.propagate(record, timestamp)?;
    let geo = lib.eci_to_geodetic(&eci, lib.sidereal_time(timestamp));
    Ok(geodetic_to_scene(geo.latitude, geo.longitude, SATELLITE_RADIUS))
}

pub fn propagate_entry(
    lib: &dyn PropagationLibrary,
    entry: &ElementSetEntry,
    timestamp: DateTime<Utc>,
) -> Result<[f32; 3], PropagationError> {
    let (line1, line2) = entry.lines().ok_or(PropagationError::MissingLines)?;
    let record = lib.parse_elements(line1, line2)?;
    propagate_record(lib, &record, timestamp)
}

/// A collection with every element set parsed once up front. Worker and
/// main-thread fallback both go through [`PreparedBatch::compute`], so they
/// produce identical buffers for identical inputs.
pub struct PreparedBatch {
    records: Vec<Option<OrbitRecord>>,
}

pub struct BatchOutput {
    pub buffer: Vec<f32>,
    pub failures: usize,
}

impl PreparedBatch {
    pub fn prepare(lib: &dyn PropagationLibrary, entries: &[ElementSetEntry]) -> Self {
        let records = entries
            .iter()
            .map(|entry| {
                let (line1, line2) = entry.lines()?;
                match lib.parse_elements(line1, line2) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        log::debug!("skipping {}: {}", entry.name, e);
                        None
                    }
                }
            })
            .collect();
        Self { records }
    }

    /// One `3 × len` buffer; entries that fail are left at the origin.
    pub fn compute(&self, lib: &dyn PropagationLibrary, timestamp: DateTime<Utc>) -> BatchOutput {
        let mut buffer = vec![0.0_f32; self.records.len() * 3];
        let mut failures = 0;
        for (slot, record) in buffer.chunks_exact_mut(3).zip(&self.records) {
            match record.as_ref().map(|r| propagate_record(lib, r, timestamp)) {
                Some(Ok(p)) => slot.copy_from_slice(&p),
                _ => failures += 1,
            }
        }
        BatchOutput { buffer, failures }
    }
}
