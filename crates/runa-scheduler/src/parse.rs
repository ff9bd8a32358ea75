// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Schedule expression normalisation.
//!
//! Three input forms are accepted and normalised to a 5- or 6-field cron
//! string (6 fields only when second-level precision is required):
//!
//! 1. **Interval**: `30s`, `5m`, `2h` — `N` bounded to 1–59 for seconds
//!    and minutes, 1–23 for hours.
//! 2. **Cron**: 5 or 6 space-separated fields of `[\d*/,-]+`, passed
//!    through verbatim after validation.
//! 3. **Natural language**: a small closed set (`every minute`,
//!    `every N seconds|minutes|hours|days`, `hourly`, `daily`, `weekly`,
//!    `monthly`, `daily at HH[:MM][am|pm]`,
//!    `every weekday at HH[:MM][am|pm]`).
//!
//! Normalisation is total on this grammar and idempotent on cron input.

use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleParseError {
    #[error("invalid schedule expression `{0}`")]
    Invalid(String),
    #[error("interval out of range in `{expr}`: {unit} must be 1-{max}")]
    IntervalRange {
        expr: String,
        unit: &'static str,
        max: u32,
    },
    #[error("invalid time `{0}` (expected HH[:MM] with optional am/pm)")]
    InvalidTime(String),
}

fn interval_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)(s|m|h)$").expect("static regex"))
}

fn cron_field_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\d*/,\-]+$").expect("static regex"))
}

/// Normalise any accepted form to a cron string.
pub fn normalize_expression(expr: &str) -> Result<String, ScheduleParseError> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(ScheduleParseError::Invalid(expr.to_string()));
    }

    if let Some(caps) = interval_re().captures(expr) {
        let n: u32 = caps[1]
            .parse()
            .map_err(|_| ScheduleParseError::Invalid(expr.to_string()))?;
        return match &caps[2] {
            "s" if (1..=59).contains(&n) => Ok(format!("*/{n} * * * * *")),
            "s" => Err(ScheduleParseError::IntervalRange {
                expr: expr.to_string(),
                unit: "seconds",
                max: 59,
            }),
            "m" if (1..=59).contains(&n) => Ok(format!("*/{n} * * * *")),
            "m" => Err(ScheduleParseError::IntervalRange {
                expr: expr.to_string(),
                unit: "minutes",
                max: 59,
            }),
            "h" if (1..=23).contains(&n) => Ok(format!("0 */{n} * * *")),
            "h" => Err(ScheduleParseError::IntervalRange {
                expr: expr.to_string(),
                unit: "hours",
                max: 23,
            }),
            _ => unreachable!("regex admits only s|m|h"),
        };
    }

    let fields: Vec<&str> = expr.split_whitespace().collect();
    if (fields.len() == 5 || fields.len() == 6)
        && fields.iter().all(|f| cron_field_re().is_match(f))
    {
        let normalised = fields.join(" ");
        // Validate against the cron runner so startup fails loudly instead
        // of at first tick.
        to_cron_schedule(&normalised)
            .map_err(|_| ScheduleParseError::Invalid(expr.to_string()))?;
        return Ok(normalised);
    }

    natural_language(expr)
}

/// Translate the closed natural-language set.
fn natural_language(expr: &str) -> Result<String, ScheduleParseError> {
    let lower = expr.to_lowercase();
    let lower = lower.trim();

    match lower {
        "every minute" => return Ok("* * * * *".to_string()),
        "hourly" => return Ok("0 * * * *".to_string()),
        "daily" => return Ok("0 0 * * *".to_string()),
        "weekly" => return Ok("0 0 * * 0".to_string()),
        "monthly" => return Ok("0 0 1 * *".to_string()),
        _ => {}
    }

    static EVERY_N: OnceLock<Regex> = OnceLock::new();
    let every_n = EVERY_N.get_or_init(|| {
        Regex::new(r"^every (\d+) (seconds?|minutes?|hours?|days?)$").expect("static regex")
    });
    if let Some(caps) = every_n.captures(lower) {
        let n: u32 = caps[1]
            .parse()
            .map_err(|_| ScheduleParseError::Invalid(expr.to_string()))?;
        if n == 0 {
            return Err(ScheduleParseError::Invalid(expr.to_string()));
        }
        return Ok(match &caps[2][..3] {
            "sec" => format!("*/{n} * * * * *"),
            "min" => format!("*/{n} * * * *"),
            "hou" => format!("0 */{n} * * *"),
            "day" => format!("0 0 */{n} * *"),
            _ => unreachable!("regex admits only four units"),
        });
    }

    static DAILY_AT: OnceLock<Regex> = OnceLock::new();
    let daily_at = DAILY_AT
        .get_or_init(|| Regex::new(r"^daily at (.+)$").expect("static regex"));
    if let Some(caps) = daily_at.captures(lower) {
        let (hour, minute) = parse_time(&caps[1])?;
        return Ok(format!("{minute} {hour} * * *"));
    }

    static WEEKDAY_AT: OnceLock<Regex> = OnceLock::new();
    let weekday_at = WEEKDAY_AT
        .get_or_init(|| Regex::new(r"^every weekday at (.+)$").expect("static regex"));
    if let Some(caps) = weekday_at.captures(lower) {
        let (hour, minute) = parse_time(&caps[1])?;
        return Ok(format!("{minute} {hour} * * 1-5"));
    }

    Err(ScheduleParseError::Invalid(expr.to_string()))
}

/// `HH`, `HH:MM`, `HHam`, `HH:MMpm`, ... → (hour, minute) in 24h form.
fn parse_time(raw: &str) -> Result<(u32, u32), ScheduleParseError> {
    static TIME: OnceLock<Regex> = OnceLock::new();
    let re = TIME.get_or_init(|| {
        Regex::new(r"^(\d{1,2})(?::(\d{2}))?\s*(am|pm)?$").expect("static regex")
    });
    let caps = re
        .captures(raw.trim())
        .ok_or_else(|| ScheduleParseError::InvalidTime(raw.to_string()))?;
    let mut hour: u32 = caps[1]
        .parse()
        .map_err(|_| ScheduleParseError::InvalidTime(raw.to_string()))?;
    let minute: u32 = caps
        .get(2)
        .map(|m| m.as_str().parse().unwrap_or(0))
        .unwrap_or(0);
    match caps.get(3).map(|m| m.as_str()) {
        Some("pm") if hour < 12 => hour += 12,
        Some("am") if hour == 12 => hour = 0,
        _ => {}
    }
    if hour > 23 || minute > 59 {
        return Err(ScheduleParseError::InvalidTime(raw.to_string()));
    }
    Ok((hour, minute))
}

/// Adapt a normalised 5/6-field expression to the cron runner.
///
/// Two dialect differences are bridged here: the runner wants an explicit
/// seconds field, and it numbers days-of-week 1-7 (Sunday = 1) where
/// standard cron uses 0-6 (Sunday = 0).
pub fn to_cron_schedule(normalised: &str) -> anyhow::Result<cron::Schedule> {
    let mut fields: Vec<String> = normalised
        .split_whitespace()
        .map(str::to_string)
        .collect();
    match fields.len() {
        5 => fields.insert(0, "0".to_string()),
        6 => {}
        n => anyhow::bail!("expected 5 or 6 cron fields, got {n}"),
    }
    let dow = fields.len() - 1;
    fields[dow] = translate_dow(&fields[dow]);
    Ok(cron::Schedule::from_str(&fields.join(" "))?)
}

/// Shift standard-cron day-of-week ordinals (0-6, Sunday = 0, with 7 as a
/// Sunday alias) to the runner's 1-7 (Sunday = 1).  Step values after `/`
/// are counts, not ordinals, and pass through untouched.
fn translate_dow(field: &str) -> String {
    field
        .split(',')
        .map(|part| {
            let (range, step) = match part.split_once('/') {
                Some((r, s)) => (r, Some(s)),
                None => (part, None),
            };
            let shifted = if range == "*" {
                "*".to_string()
            } else {
                range
                    .split('-')
                    .map(|d| match d.parse::<u8>() {
                        Ok(n) => ((n % 7) + 1).to_string(),
                        Err(_) => d.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join("-")
            };
            match step {
                Some(s) => format!("{shifted}/{s}"),
                None => shifted,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Interval form ─────────────────────────────────────────────────────────

    #[test]
    fn interval_seconds() {
        assert_eq!(normalize_expression("30s").unwrap(), "*/30 * * * * *");
    }

    #[test]
    fn interval_minutes() {
        assert_eq!(normalize_expression("5m").unwrap(), "*/5 * * * *");
    }

    #[test]
    fn interval_hours() {
        assert_eq!(normalize_expression("2h").unwrap(), "0 */2 * * *");
    }

    #[test]
    fn interval_out_of_range_is_rejected() {
        assert!(matches!(
            normalize_expression("60s"),
            Err(ScheduleParseError::IntervalRange { max: 59, .. })
        ));
        assert!(matches!(
            normalize_expression("0m"),
            Err(ScheduleParseError::IntervalRange { .. })
        ));
        assert!(matches!(
            normalize_expression("24h"),
            Err(ScheduleParseError::IntervalRange { max: 23, .. })
        ));
    }

    // ── Cron form ─────────────────────────────────────────────────────────────

    #[test]
    fn five_field_cron_passes_through() {
        assert_eq!(normalize_expression("*/5 * * * *").unwrap(), "*/5 * * * *");
    }

    #[test]
    fn six_field_cron_passes_through() {
        assert_eq!(
            normalize_expression("0 30 9 * * 1-5").unwrap(),
            "0 30 9 * * 1-5"
        );
    }

    #[test]
    fn normalisation_is_idempotent_on_cron() {
        let once = normalize_expression("every 5 minutes").unwrap();
        assert_eq!(normalize_expression(&once).unwrap(), once);
    }

    #[test]
    fn cron_with_invalid_field_values_is_rejected() {
        // Right shape, impossible value: minute 99.
        assert!(normalize_expression("99 * * * *").is_err());
    }

    // ── Natural language ──────────────────────────────────────────────────────

    #[test]
    fn every_minute() {
        assert_eq!(normalize_expression("every minute").unwrap(), "* * * * *");
    }

    #[test]
    fn every_n_units() {
        assert_eq!(
            normalize_expression("every 10 seconds").unwrap(),
            "*/10 * * * * *"
        );
        assert_eq!(
            normalize_expression("every 15 minutes").unwrap(),
            "*/15 * * * *"
        );
        assert_eq!(normalize_expression("every 6 hours").unwrap(), "0 */6 * * *");
        assert_eq!(normalize_expression("every 2 days").unwrap(), "0 0 */2 * *");
    }

    #[test]
    fn singular_unit_is_accepted() {
        assert_eq!(normalize_expression("every 1 minute").unwrap(), "*/1 * * * *");
    }

    #[test]
    fn fixed_words() {
        assert_eq!(normalize_expression("hourly").unwrap(), "0 * * * *");
        assert_eq!(normalize_expression("daily").unwrap(), "0 0 * * *");
        assert_eq!(normalize_expression("weekly").unwrap(), "0 0 * * 0");
        assert_eq!(normalize_expression("monthly").unwrap(), "0 0 1 * *");
    }

    #[test]
    fn daily_at_variants() {
        assert_eq!(normalize_expression("daily at 9").unwrap(), "0 9 * * *");
        assert_eq!(normalize_expression("daily at 9:30").unwrap(), "30 9 * * *");
        assert_eq!(normalize_expression("daily at 9:30pm").unwrap(), "30 21 * * *");
        assert_eq!(normalize_expression("daily at 12am").unwrap(), "0 0 * * *");
        assert_eq!(normalize_expression("daily at 12pm").unwrap(), "0 12 * * *");
    }

    #[test]
    fn every_weekday_at() {
        assert_eq!(
            normalize_expression("every weekday at 8:15am").unwrap(),
            "15 8 * * 1-5"
        );
    }

    #[test]
    fn case_is_insensitive() {
        assert_eq!(normalize_expression("Daily At 9AM").unwrap(), "0 9 * * *");
    }

    // ── Rejections ────────────────────────────────────────────────────────────

    #[test]
    fn gibberish_is_rejected() {
        assert!(normalize_expression("whenever you like").is_err());
        assert!(normalize_expression("").is_err());
        assert!(normalize_expression("daily at 25:00").is_err());
    }

    // ── Cron runner adaptation ────────────────────────────────────────────────

    #[test]
    fn dow_ordinals_shift_for_the_runner() {
        assert_eq!(translate_dow("0"), "1"); // Sunday
        assert_eq!(translate_dow("1-5"), "2-6"); // Mon-Fri
        assert_eq!(translate_dow("7"), "1"); // Sunday alias
        assert_eq!(translate_dow("*"), "*");
        assert_eq!(translate_dow("*/2"), "*/2"); // step is a count
        assert_eq!(translate_dow("0,3"), "1,4");
    }


    #[test]
    fn all_normalised_forms_are_accepted_by_the_runner() {
        for expr in [
            "30s", "5m", "2h", "every minute", "every 3 hours", "hourly", "daily",
            "weekly", "monthly", "daily at 9:30pm", "every weekday at 8am",
            "*/5 * * * *", "0 30 9 * * 1-5",
        ] {
            let normalised = normalize_expression(expr).unwrap();
            to_cron_schedule(&normalised)
                .unwrap_or_else(|e| panic!("{expr} → {normalised}: {e}"));
        }
    }
}
