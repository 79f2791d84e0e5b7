//! Low-precision sun direction for the day/night terminator.

use chrono::{DateTime, Timelike, Utc};
use nalgebra::Vector3;

use crate::propagation::geodetic_to_scene;
use crate::time::{day_of_year, DAYS_PER_YEAR, SOLAR_DECLINATION_MAX};

/// Latitude and longitude (radians) of the point where the sun is overhead.
pub fn subsolar_point(date: DateTime<Utc>) -> (f64, f64) {
    let declination = SOLAR_DECLINATION_MAX * ((360.0 / DAYS_PER_YEAR) * (day_of_year(date) + 10.0)).to_radians().cos();
    let hours = date.hour() as f64 + date.minute() as f64 / 60.0 + date.second() as f64 / 3600.0;
    let longitude = (-15.0 * (hours - 12.0)).to_radians();
    (declination.to_radians(), longitude)
}

/// Unit vector from the globe center toward the sun, in scene space.
pub fn sun_direction(date: DateTime<Utc>) -> Vector3<f64> {
    let (lat, lon) = subsolar_point(date);
    let [x, y, z] = geodetic_to_scene(lat, lon, 1.0);
    Vector3::new(x as f64, y as f64, z as f64).normalize()
}
