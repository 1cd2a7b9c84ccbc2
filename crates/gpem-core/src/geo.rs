use exif::Rational;
use serde::{Deserialize, Serialize};

/// Coordinates below this magnitude are treated as "not set".
pub const GEO_EPSILON: f64 = 0.000001;

/// Largest denominator tried when encoding the altitude.
pub const ALTITUDE_MAX_DENOMINATOR: u32 = 1000;

/// Denominator of the seconds component of a DMS coordinate.
pub const SECONDS_DENOMINATOR: u32 = 10_000;

/// `geoData` block of a Google sidecar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoData {
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default)]
    pub altitude: f64,
}

impl GeoData {
    pub fn new(latitude: f64, longitude: f64, altitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
        }
    }

    /// Google writes all-zero coordinates for assets without a location.
    pub fn is_set(&self) -> bool {
        self.latitude.abs() > GEO_EPSILON
            || self.longitude.abs() > GEO_EPSILON
            || self.altitude.abs() > GEO_EPSILON
    }

    pub fn latitude_ref(&self) -> &'static str {
        if self.latitude >= 0.0 {
            "N"
        } else {
            "S"
        }
    }

    pub fn longitude_ref(&self) -> &'static str {
        if self.longitude >= 0.0 {
            "E"
        } else {
            "W"
        }
    }

    /// EXIF GPSAltitudeRef: 0 above sea level, 1 below.
    pub fn altitude_ref(&self) -> u8 {
        if self.altitude >= 0.0 {
            0
        } else {
            1
        }
    }

    /// ISO 6709 location string as stored in the `location` tag of video containers,
    /// e.g. `+48.13715+11.57500+5.00000/`.
    pub fn iso6709(&self) -> String {
        format!(
            "{:+.5}{:+.5}{:+.5}/",
            self.latitude, self.longitude, self.altitude
        )
    }
}

/// Encode an absolute coordinate in degrees as degrees/minutes/seconds rationals.
pub fn deg_to_dms_rational(degrees: f64) -> [Rational; 3] {
    let degrees = degrees.abs();
    let minutes_f = degrees.fract() * 60.0;
    let seconds_f = minutes_f.fract() * 60.0;

    let mut deg = degrees.trunc() as u32;
    let mut min = minutes_f.trunc() as u32;
    let mut sec = (seconds_f * SECONDS_DENOMINATOR as f64).round() as u32;

    // rounding may carry into the next unit
    if sec >= 60 * SECONDS_DENOMINATOR {
        sec -= 60 * SECONDS_DENOMINATOR;
        min += 1;
    }
    if min >= 60 {
        min -= 60;
        deg += 1;
    }

    [
        Rational { num: deg, denom: 1 },
        Rational { num: min, denom: 1 },
        Rational {
            num: sec,
            denom: SECONDS_DENOMINATOR,
        },
    ]
}

/// Decode degrees/minutes/seconds rationals back into decimal degrees.
pub fn dms_to_deg(dms: &[Rational]) -> Option<f64> {
    match dms {
        [d, m, s] if d.denom != 0 && m.denom != 0 && s.denom != 0 => {
            Some(d.to_f64() + m.to_f64() / 60.0 + s.to_f64() / 3600.0)
        }
        _ => None,
    }
}

/// Best rational approximation of `value` with a denominator up to `max_denominator`.
///
/// Tries every denominator; the smallest one reaching the lowest error wins.
pub fn find_rational(value: f64, max_denominator: u32) -> Rational {
    let mut best = Rational { num: 0, denom: 1 };
    let mut best_error = value.abs();

    for denom in 1..=max_denominator.max(1) {
        let num = (value * denom as f64).round();
        let error = (value - num / denom as f64).abs();
        if error < best_error {
            best = Rational {
                num: num as u32,
                denom,
            };
            best_error = error;
            if error == 0.0 {
                break;
            }
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_data_is_set() {
        assert!(!GeoData::new(0.0, 0.0, 0.0).is_set());
        assert!(!GeoData::new(0.0000001, 0.0, 0.0).is_set());
        assert!(GeoData::new(1.0, 0.0, 0.0).is_set());
        assert!(GeoData::new(0.0, 0.0, -3.0).is_set());
    }

    #[test]
    fn test_find_rational_round_trip() {
        let r = find_rational(48.137154, 1_000_000);
        assert!((r.to_f64() - 48.137154).abs() < 1e-6);

        let r = find_rational(5.0, ALTITUDE_MAX_DENOMINATOR);
        assert_eq!((r.num, r.denom), (5, 1));

        let r = find_rational(0.5, ALTITUDE_MAX_DENOMINATOR);
        assert_eq!((r.num, r.denom), (1, 2));
    }

    #[test]
    fn test_find_rational_zero_bound_is_integer() {
        let r = find_rational(2.4, 0);
        assert_eq!((r.num, r.denom), (2, 1));
    }

    #[test]
    fn test_dms_round_trip() {
        for value in [48.137154, 11.575382, 0.0, 89.999999, 179.5] {
            let dms = deg_to_dms_rational(value);
            let back = dms_to_deg(&dms).unwrap();
            assert!((back - value).abs() < 1e-6, "{value} -> {back}");
        }
    }

    #[test]
    fn test_dms_uses_absolute_value() {
        let dms = deg_to_dms_rational(-33.5);
        assert_eq!(dms[0].num, 33);
        assert_eq!(dms[1].num, 30);
        assert_eq!(dms[2].num, 0);
    }

    #[test]
    fn test_refs() {
        let geo = GeoData::new(10.5, 20.5, 5.0);
        assert_eq!(geo.latitude_ref(), "N");
        assert_eq!(geo.longitude_ref(), "E");
        assert_eq!(geo.altitude_ref(), 0);

        let geo = GeoData::new(-10.5, -20.5, -5.0);
        assert_eq!(geo.latitude_ref(), "S");
        assert_eq!(geo.longitude_ref(), "W");
        assert_eq!(geo.altitude_ref(), 1);
    }

    #[test]
    fn test_iso6709() {
        let geo = GeoData::new(48.137154, 11.575382, 519.0);
        assert_eq!(geo.iso6709(), "+48.13715+11.57538+519.00000/");
    }
}
