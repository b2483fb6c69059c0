//! Shared field parsing for the CSV extracts.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;

/// Weapon descriptions that denote a gun of any kind. Matched against the
/// lowercased description, anchored at the start.
static FIREARM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:han.+g.+n|.*gun.*|.*rifle.*)").unwrap_or_else(|_| unreachable!())
});

/// Normalised weapon label used for every kind of gun.
pub const FIREARM_LABEL: &str = "firearm";

/// Parses an event timestamp, treating zone-less values as UTC.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` (both with
/// optional fractional seconds), `MM/DD/YYYY HH:MM` and bare dates.
#[must_use]
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%m/%d/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }

    parse_date(s)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Parses a calendar date, ignoring any time component.
#[must_use]
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    let date_part = s.split(['T', ' ']).next().unwrap_or(s);

    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(date_part, "%m/%d/%Y"))
        .ok()
}

/// Lowercases a weapon description and collapses every gun type to
/// [`FIREARM_LABEL`].
#[must_use]
pub fn normalize_weapon(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    if FIREARM.is_match(&lower) {
        FIREARM_LABEL.to_string()
    } else {
        lower
    }
}

/// Trims a text field, mapping blanks to `None`.
#[must_use]
pub fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_timestamp_formats() {
        let expected = "2014-07-19 13:45:00 UTC";
        assert_eq!(parse_timestamp("2014-07-19 13:45:00").unwrap().to_string(), expected);
        assert_eq!(parse_timestamp("2014-07-19T13:45:00.000").unwrap().to_string(), expected);
        assert_eq!(parse_timestamp("2014-07-19T13:45:00Z").unwrap().to_string(), expected);
        assert_eq!(parse_timestamp("07/19/2014 13:45").unwrap().to_string(), expected);
        assert_eq!(
            parse_timestamp("2014-07-19").unwrap().to_string(),
            "2014-07-19 00:00:00 UTC"
        );
    }

    #[test]
    fn rfc3339_offsets_are_normalised() {
        let dt = parse_timestamp("2014-07-19T09:45:00-04:00").unwrap();
        assert_eq!(dt.to_string(), "2014-07-19 13:45:00 UTC");
    }

    #[test]
    fn rejects_garbage_timestamps() {
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn parses_dates_with_time_suffix() {
        let date = NaiveDate::from_ymd_opt(2012, 3, 4).unwrap();
        assert_eq!(parse_date("2012-03-04 00:00:00"), Some(date));
        assert_eq!(parse_date("03/04/2012"), Some(date));
    }

    #[test]
    fn guns_become_firearm() {
        assert_eq!(normalize_weapon("Handgun"), "firearm");
        assert_eq!(normalize_weapon("SHOTGUN"), "firearm");
        assert_eq!(normalize_weapon("Hand Gun "), "firearm");
        assert_eq!(normalize_weapon("Rifle"), "firearm");
        assert_eq!(normalize_weapon("Knife"), "knife");
    }

    #[test]
    fn blanks_are_none() {
        assert_eq!(non_blank(Some("  ".to_string())), None);
        assert_eq!(non_blank(Some(" A ".to_string())), Some("A".to_string()));
    }
}
