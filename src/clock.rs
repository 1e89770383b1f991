//! Parsing of the free-text durations and clock times the dashboard stores.
//!
//! Durations: one or more `<number><unit>` terms (`"45 min"`, `"1.5 hrs"`,
//! `"1 hr 30 min"`, `"90m"`), or a bare integer meaning minutes (`"45"`).
//! The total must be a whole, positive number of minutes no longer than a day.
//!
//! Clock times: `H:MM` in 24-hour form, or with an `am`/`pm` suffix.

use crate::engine::EngineError;
use crate::model::{MINUTES_PER_DAY, Minute};

enum Unit {
    Minutes,
    Hours,
}

fn parse_unit(word: &str) -> Option<Unit> {
    match word {
        "m" | "min" | "mins" | "minute" | "minutes" => Some(Unit::Minutes),
        "h" | "hr" | "hrs" | "hour" | "hours" => Some(Unit::Hours),
        _ => None,
    }
}

pub fn parse_duration(text: &str) -> Result<Minute, EngineError> {
    let invalid = || EngineError::InvalidDuration(text.to_string());
    let lower = text.trim().to_ascii_lowercase();
    if lower.is_empty() {
        return Err(invalid());
    }

    // Bare integer: minutes.
    if lower.chars().all(|c| c.is_ascii_digit()) {
        let minutes: Minute = lower.parse().map_err(|_| invalid())?;
        return check_duration(minutes).ok_or_else(invalid);
    }

    let chars: Vec<char> = lower.chars().collect();
    let mut i = 0;
    let mut total_seconds: f64 = 0.0;
    let mut terms = 0;

    while i < chars.len() {
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        if i >= chars.len() {
            break;
        }

        let num_start = i;
        while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
            i += 1;
        }
        if i == num_start {
            return Err(invalid());
        }
        let number: f64 = chars[num_start..i]
            .iter()
            .collect::<String>()
            .parse()
            .map_err(|_| invalid())?;

        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        let unit_start = i;
        while i < chars.len() && chars[i].is_ascii_alphabetic() {
            i += 1;
        }
        let word: String = chars[unit_start..i].iter().collect();
        let unit = parse_unit(&word).ok_or_else(invalid)?;

        total_seconds += match unit {
            Unit::Minutes => number * 60.0,
            Unit::Hours => number * 3600.0,
        };
        terms += 1;

        // Allow "1 hr, 30 min" / "1 hr and 30 min" separators.
        while i < chars.len() && (chars[i].is_whitespace() || chars[i] == ',') {
            i += 1;
        }
        if chars[i..].starts_with(&['a', 'n', 'd']) {
            i += 3;
        }
    }

    if terms == 0 || !total_seconds.is_finite() {
        return Err(invalid());
    }
    let seconds = total_seconds.round() as i64;
    if seconds % 60 != 0 || (total_seconds - seconds as f64).abs() > 1e-6 {
        return Err(invalid());
    }
    let minutes = Minute::try_from(seconds / 60).map_err(|_| invalid())?;
    check_duration(minutes).ok_or_else(invalid)
}

fn check_duration(minutes: Minute) -> Option<Minute> {
    (minutes > 0 && minutes <= MINUTES_PER_DAY).then_some(minutes)
}

/// Parse a clock time into minutes since midnight.
pub fn parse_clock(text: &str) -> Result<Minute, EngineError> {
    let invalid = || EngineError::InvalidTime(text.to_string());
    let lower = text.trim().to_ascii_lowercase();

    let (body, meridiem) = if let Some(rest) = lower.strip_suffix("am") {
        (rest.trim_end(), Some(false))
    } else if let Some(rest) = lower.strip_suffix("pm") {
        (rest.trim_end(), Some(true))
    } else {
        (lower.as_str(), None)
    };

    let (h, m) = body.split_once(':').ok_or_else(invalid)?;
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
        return Err(invalid());
    }
    let hour: Minute = h.parse().map_err(|_| invalid())?;
    let minute: Minute = m.parse().map_err(|_| invalid())?;
    if !(0..60).contains(&minute) {
        return Err(invalid());
    }

    let hour = match meridiem {
        None if (0..24).contains(&hour) => hour,
        Some(pm) if (1..=12).contains(&hour) => (hour % 12) + if pm { 12 } else { 0 },
        _ => return Err(invalid()),
    };
    Ok(hour * 60 + minute)
}

/// Format minutes since midnight as `HH:MM`.
pub fn format_clock(minute: Minute) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}
