// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

/// Mean radius of Earth, in meters.
/// Source: https://en.wikipedia.org/wiki/Earth_radius#Arithmetic_mean_radius
const EARTH_RADIUS: f64 = 6_371_000.0;

/// Mean diameter of Earth, in meters.
const EARTH_DIAMETER: f64 = EARTH_RADIUS + EARTH_RADIUS;

/// Calculates the great-circle distance between two lat-lon positions
/// on Earth using the [haversine formula](https://en.wikipedia.org/wiki/Haversine_formula).
/// Returns the result in meters.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1 = lat1.to_radians();
    let lon1 = lon1.to_radians();
    let lat2 = lat2.to_radians();
    let lon2 = lon2.to_radians();

    let sin_dlat_half = ((lat2 - lat1) * 0.5).sin();
    let sin_dlon_half = ((lon2 - lon1) * 0.5).sin();

    let h = sin_dlat_half * sin_dlat_half + lat1.cos() * lat2.cos() * sin_dlon_half * sin_dlon_half;

    EARTH_DIAMETER * h.sqrt().asin()
}

/// Checks whether a lat-lon pair is a finite position on Earth.
pub fn is_valid_position(lat: f64, lon: f64) -> bool {
    lat.is_finite() && lon.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CENTRUM: (f64, f64) = (52.23024, 21.01062);
    const STADION: (f64, f64) = (52.23852, 21.0446);

    #[test]
    fn one_degree_of_longitude_at_equator() {
        let d = haversine_distance(0.0, 0.0, 0.0, 1.0);
        assert!((d - 111_194.93).abs() < 0.01, "got {}", d);
    }

    #[test]
    fn centrum_stadion() {
        let d = haversine_distance(CENTRUM.0, CENTRUM.1, STADION.0, STADION.1);
        assert!((d - 2_490.0).abs() < 5.0, "got {}", d);
    }

    #[test]
    fn symmetric() {
        let ab = haversine_distance(CENTRUM.0, CENTRUM.1, STADION.0, STADION.1);
        let ba = haversine_distance(STADION.0, STADION.1, CENTRUM.0, CENTRUM.1);
        assert_eq!(ab, ba);
    }

    #[test]
    fn zero_for_identical_points() {
        assert_eq!(haversine_distance(CENTRUM.0, CENTRUM.1, CENTRUM.0, CENTRUM.1), 0.0);
    }

    #[test]
    fn position_validation() {
        assert!(is_valid_position(0.0, 0.0));
        assert!(is_valid_position(-90.0, 180.0));
        assert!(is_valid_position(90.0, -180.0));
        assert!(!is_valid_position(90.1, 0.0));
        assert!(!is_valid_position(0.0, 180.1));
        assert!(!is_valid_position(f64::NAN, 0.0));
        assert!(!is_valid_position(0.0, f64::INFINITY));
    }
}
