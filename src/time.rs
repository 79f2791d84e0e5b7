//! Time and sidereal angle calculations.
//!
//! Provides Greenwich Mean Sidereal Time (GMST), used to rotate inertial
//! satellite positions into the Earth-fixed frame the globe is drawn in.

use chrono::{DateTime, Datelike, Utc};

pub const SECONDS_PER_DAY: f64 = 86400.0;
pub const DAYS_PER_JULIAN_CENTURY: f64 = 36525.0;
pub const GMST_BASE_DEG: f64 = 280.46061837;
pub const GMST_ROTATION_PER_DAY: f64 = 360.98564736629;
pub const GMST_CORRECTION: f64 = 0.000387933;
pub const SOLAR_DECLINATION_MAX: f64 = -23.45;
pub const DAYS_PER_YEAR: f64 = 365.0;

/// Unix time of the J2000.0 epoch (2000-01-01T12:00:00Z), in milliseconds.
const J2000_UNIX_MILLIS: i64 = 946_728_000_000;

pub fn days_since_j2000(timestamp: DateTime<Utc>) -> f64 {
    (timestamp.timestamp_millis() - J2000_UNIX_MILLIS) as f64 / (1000.0 * SECONDS_PER_DAY)
}

/// GMST in radians, normalized to `[0, 2π)`.
pub fn greenwich_mean_sidereal_time(timestamp: DateTime<Utc>) -> f64 {
    let days = days_since_j2000(timestamp);
    let centuries = days / DAYS_PER_JULIAN_CENTURY;
    let gmst_degrees = GMST_BASE_DEG
        + GMST_ROTATION_PER_DAY * days
        + GMST_CORRECTION * centuries * centuries
        - centuries * centuries * centuries / 38710000.0;
    gmst_degrees.rem_euclid(360.0).to_radians()
}

pub fn day_of_year(timestamp: DateTime<Utc>) -> f64 {
    timestamp.ordinal() as f64
}
