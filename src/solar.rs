//! Solar event schedules
//!
//! Computes occurrence times for astronomical events (dawn, sunrise, solar
//! noon, sunset, dusk) at a latitude/longitude using the standard sunrise
//! equation (Almanac for Computers, USNO). Times are UTC; accuracy is within
//! a couple of minutes, which is ample for periodic task scheduling.

use crate::types::{BeatError, Result};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// How many days ahead to search for the next occurrence.
///
/// Covers polar night/day: an event absent today reappears within a year
/// everywhere the event occurs at all.
const MAX_SCAN_DAYS: i64 = 366;

/// Recognized solar events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolarEvent {
    DawnAstronomical,
    DawnNautical,
    DawnCivil,
    Sunrise,
    SolarNoon,
    Sunset,
    DuskCivil,
    DuskNautical,
    DuskAstronomical,
}

impl SolarEvent {
    /// Zenith angle in degrees defining the event.
    fn zenith(self) -> f64 {
        match self {
            SolarEvent::Sunrise | SolarEvent::Sunset => 90.833,
            SolarEvent::DawnCivil | SolarEvent::DuskCivil => 96.0,
            SolarEvent::DawnNautical | SolarEvent::DuskNautical => 102.0,
            SolarEvent::DawnAstronomical | SolarEvent::DuskAstronomical => 108.0,
            SolarEvent::SolarNoon => 90.833,
        }
    }

    /// True for events on the rising side of the day.
    fn is_rising(self) -> bool {
        matches!(
            self,
            SolarEvent::DawnAstronomical
                | SolarEvent::DawnNautical
                | SolarEvent::DawnCivil
                | SolarEvent::Sunrise
        )
    }

    /// The canonical identifier, as stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            SolarEvent::DawnAstronomical => "dawn_astronomical",
            SolarEvent::DawnNautical => "dawn_nautical",
            SolarEvent::DawnCivil => "dawn_civil",
            SolarEvent::Sunrise => "sunrise",
            SolarEvent::SolarNoon => "solar_noon",
            SolarEvent::Sunset => "sunset",
            SolarEvent::DuskCivil => "dusk_civil",
            SolarEvent::DuskNautical => "dusk_nautical",
            SolarEvent::DuskAstronomical => "dusk_astronomical",
        }
    }

    /// Parse a stored identifier.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "dawn_astronomical" => Ok(SolarEvent::DawnAstronomical),
            "dawn_nautical" => Ok(SolarEvent::DawnNautical),
            "dawn_civil" => Ok(SolarEvent::DawnCivil),
            "sunrise" => Ok(SolarEvent::Sunrise),
            "solar_noon" => Ok(SolarEvent::SolarNoon),
            "sunset" => Ok(SolarEvent::Sunset),
            "dusk_civil" => Ok(SolarEvent::DuskCivil),
            "dusk_nautical" => Ok(SolarEvent::DuskNautical),
            "dusk_astronomical" => Ok(SolarEvent::DuskAstronomical),
            other => Err(BeatError::Config(format!(
                "unrecognized solar event '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for SolarEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A solar schedule: fire at every occurrence of `event` at the location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solar {
    pub event: SolarEvent,
    pub latitude: f64,
    pub longitude: f64,
}

impl std::fmt::Display for Solar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lat = if self.latitude >= 0.0 {
            format!("N{}", self.latitude)
        } else {
            format!("S{}", -self.latitude)
        };
        let lon = if self.longitude >= 0.0 {
            format!("E{}", self.longitude)
        } else {
            format!("W{}", -self.longitude)
        };
        write!(f, "{} ({} {})", self.event, lat, lon)
    }
}

impl Solar {
    /// Build a solar schedule, validating the coordinates.
    pub fn new(event: SolarEvent, latitude: f64, longitude: f64) -> Result<Self> {
        let solar = Self {
            event,
            latitude,
            longitude,
        };
        solar.validate()?;
        Ok(solar)
    }

    /// Coordinate range check, also applied to rows loaded from storage.
    pub fn validate(&self) -> Result<()> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(BeatError::Config(format!(
                "latitude {} out of range [-90, 90]",
                self.latitude
            )));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(BeatError::Config(format!(
                "longitude {} out of range [-180, 180]",
                self.longitude
            )));
        }
        Ok(())
    }

    /// The first occurrence of the event strictly after `after` (UTC).
    ///
    /// Scans day-by-day; at polar latitudes an event can be absent for
    /// months, so the scan spans a full year before giving up.
    pub fn next_event_after(&self, after: NaiveDateTime) -> Result<NaiveDateTime> {
        for offset in 0..=MAX_SCAN_DAYS {
            let date = after.date() + Duration::days(offset);
            if let Some(t) = self.event_time_on(date) {
                if t > after {
                    return Ok(t);
                }
            }
        }
        Err(BeatError::Config(format!(
            "solar event {self} does not occur within {MAX_SCAN_DAYS} days"
        )))
    }

    /// UTC occurrence time of the event on the given date, or `None` when
    /// the sun never crosses the event's zenith that day (polar day/night).
    fn event_time_on(&self, date: NaiveDate) -> Option<NaiveDateTime> {
        match self.event {
            SolarEvent::SolarNoon => {
                let rise = event_time(date, true, 90.833, self.latitude, self.longitude);
                let set = event_time(date, false, 90.833, self.latitude, self.longitude);
                match (rise, set) {
                    (Some(r), Some(s)) if s > r => Some(r + (s - r) / 2),
                    // Polar day/night: no horizon crossings, fall back to
                    // longitude-corrected clock noon.
                    _ => {
                        let noon_hours = norm24(12.0 - self.longitude / 15.0);
                        Some(date.and_time(time_from_hours(noon_hours)))
                    }
                }
            }
            event => event_time(
                date,
                event.is_rising(),
                event.zenith(),
                self.latitude,
                self.longitude,
            ),
        }
    }
}

/// Sunrise-equation core: UTC time on `date` at which the sun crosses
/// `zenith` degrees, on the rising or setting side.
fn event_time(
    date: NaiveDate,
    rising: bool,
    zenith: f64,
    latitude: f64,
    longitude: f64,
) -> Option<NaiveDateTime> {
    let n = f64::from(date.ordinal());
    let lng_hour = longitude / 15.0;

    // Approximate event time, in fractional days of the year
    let t = if rising {
        n + (6.0 - lng_hour) / 24.0
    } else {
        n + (18.0 - lng_hour) / 24.0
    };

    // Sun's mean anomaly and true longitude
    let m = 0.9856 * t - 3.289;
    let l = norm360(m + 1.916 * sin_deg(m) + 0.020 * sin_deg(2.0 * m) + 282.634);

    // Right ascension, adjusted into the same quadrant as L, in hours
    let mut ra = norm360(atan_deg(0.91764 * tan_deg(l)));
    let l_quadrant = (l / 90.0).floor() * 90.0;
    let ra_quadrant = (ra / 90.0).floor() * 90.0;
    ra = (ra + l_quadrant - ra_quadrant) / 15.0;

    // Declination
    let sin_dec = 0.39782 * sin_deg(l);
    let cos_dec = cos_deg(asin_deg(sin_dec));

    // Local hour angle; out of [-1, 1] means the sun never reaches the
    // zenith on this date at this latitude
    let cos_h = (cos_deg(zenith) - sin_dec * sin_deg(latitude)) / (cos_dec * cos_deg(latitude));
    if !(-1.0..=1.0).contains(&cos_h) {
        return None;
    }

    let hour_angle = if rising {
        360.0 - acos_deg(cos_h)
    } else {
        acos_deg(cos_h)
    };
    let h = hour_angle / 15.0;

    let local_mean = h + ra - 0.06571 * t - 6.622;
    let ut = norm24(local_mean - lng_hour);

    Some(date.and_time(time_from_hours(ut)))
}

fn time_from_hours(hours: f64) -> NaiveTime {
    let secs = ((hours * 3600.0).round() as u32).min(86_399);
    NaiveTime::from_num_seconds_from_midnight_opt(secs, 0)
        .unwrap_or(NaiveTime::MIN)
}

fn norm360(x: f64) -> f64 {
    x.rem_euclid(360.0)
}

fn norm24(x: f64) -> f64 {
    x.rem_euclid(24.0)
}

fn sin_deg(x: f64) -> f64 {
    x.to_radians().sin()
}

fn cos_deg(x: f64) -> f64 {
    x.to_radians().cos()
}

fn tan_deg(x: f64) -> f64 {
    x.to_radians().tan()
}

fn asin_deg(x: f64) -> f64 {
    x.asin().to_degrees()
}

fn acos_deg(x: f64) -> f64 {
    x.acos().to_degrees()
}

fn atan_deg(x: f64) -> f64 {
    x.atan().to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_equator_sunrise_near_six_utc() {
        let solar = Solar::new(SolarEvent::Sunrise, 0.0, 0.0).unwrap();
        let t = solar.event_time_on(date(2026, 3, 20)).unwrap();
        let minutes = t.time().num_seconds_from_midnight() / 60;
        assert!((5 * 60 + 30..=6 * 60 + 30).contains(&minutes), "sunrise at {t}");
    }

    #[test]
    fn test_equator_sunset_near_eighteen_utc() {
        let solar = Solar::new(SolarEvent::Sunset, 0.0, 0.0).unwrap();
        let t = solar.event_time_on(date(2026, 3, 20)).unwrap();
        let minutes = t.time().num_seconds_from_midnight() / 60;
        assert!((17 * 60 + 30..=18 * 60 + 30).contains(&minutes), "sunset at {t}");
    }

    #[test]
    fn test_solar_noon_near_twelve_at_prime_meridian() {
        let solar = Solar::new(SolarEvent::SolarNoon, 20.0, 0.0).unwrap();
        let t = solar.event_time_on(date(2026, 6, 1)).unwrap();
        let minutes = t.time().num_seconds_from_midnight() / 60;
        assert!((11 * 60 + 30..=12 * 60 + 30).contains(&minutes), "noon at {t}");
    }

    #[test]
    fn test_dawn_precedes_sunrise() {
        let dawn = Solar::new(SolarEvent::DawnCivil, 40.0, -74.0).unwrap();
        let sunrise = Solar::new(SolarEvent::Sunrise, 40.0, -74.0).unwrap();
        let d = date(2026, 4, 10);
        assert!(dawn.event_time_on(d).unwrap() < sunrise.event_time_on(d).unwrap());
    }

    #[test]
    fn test_polar_night_skips_days() {
        // No sunrise at 80°N in midwinter; the next one is months away.
        let solar = Solar::new(SolarEvent::Sunrise, 80.0, 0.0).unwrap();
        let midwinter = date(2026, 12, 21).and_hms_opt(0, 0, 0).unwrap();
        assert!(solar.event_time_on(date(2026, 12, 21)).is_none());
        let next = solar.next_event_after(midwinter).unwrap();
        assert!(next > midwinter + Duration::days(30));
    }

    #[test]
    fn test_next_event_strictly_after() {
        let solar = Solar::new(SolarEvent::Sunset, 35.0, 139.0).unwrap();
        let after = date(2026, 5, 1).and_hms_opt(0, 0, 0).unwrap();
        let first = solar.next_event_after(after).unwrap();
        assert!(first > after);
        let second = solar.next_event_after(first).unwrap();
        assert!(second > first);
        // Consecutive sunsets are roughly a day apart.
        let gap = second - first;
        assert!(gap > Duration::hours(23) && gap < Duration::hours(25), "gap {gap}");
    }

    #[test]
    fn test_invalid_coordinates() {
        assert!(Solar::new(SolarEvent::Sunrise, 91.0, 0.0).is_err());
        assert!(Solar::new(SolarEvent::Sunrise, -91.0, 0.0).is_err());
        assert!(Solar::new(SolarEvent::Sunrise, 0.0, 181.0).is_err());
        assert!(Solar::new(SolarEvent::Sunrise, 0.0, -181.0).is_err());
    }

    #[test]
    fn test_event_identifier_round_trip() {
        for event in [
            SolarEvent::DawnAstronomical,
            SolarEvent::DawnNautical,
            SolarEvent::DawnCivil,
            SolarEvent::Sunrise,
            SolarEvent::SolarNoon,
            SolarEvent::Sunset,
            SolarEvent::DuskCivil,
            SolarEvent::DuskNautical,
            SolarEvent::DuskAstronomical,
        ] {
            assert_eq!(SolarEvent::parse(event.as_str()).unwrap(), event);
        }
        assert!(SolarEvent::parse("high_noon").is_err());
    }

    #[test]
    fn test_display() {
        let solar = Solar::new(SolarEvent::Sunset, -33.86, 151.21).unwrap();
        assert_eq!(solar.to_string(), "sunset (S33.86 E151.21)");
    }
}
