//! Five-field cron expressions (`min hour dom month dow`) and their
//! translation to the seconds-first form the job scheduler parses.

use crate::{BackupError, Result};

const WEEKDAYS: [&str; 8] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

fn invalid(expr: &str, reason: impl std::fmt::Display) -> BackupError {
    BackupError::Configuration(format!("invalid schedule {:?}: {}", expr, reason))
}

/// Split a five-field expression, rejecting anything with the wrong shape.
pub fn parse_fields(expr: &str) -> Result<[&str; 5]> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    let fields: [&str; 5] = fields
        .try_into()
        .map_err(|f: Vec<&str>| invalid(expr, format!("expected 5 fields, found {}", f.len())))?;

    for field in fields {
        let allowed = field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '*' | ',' | '-' | '/'));
        if !allowed {
            return Err(invalid(expr, format!("unexpected character in {:?}", field)));
        }
        if field.split(',').any(str::is_empty) {
            return Err(invalid(expr, format!("empty list item in {:?}", field)));
        }
    }

    Ok(fields)
}

pub fn is_valid(expr: &str) -> bool {
    parse_fields(expr).is_ok()
}

/// `"30 2 * * 1-5"` becomes `"0 30 2 * * Mon-Fri"`: seconds pinned to zero and
/// numeric weekdays (0 and 7 are Sunday) written as names, which both
/// numbering conventions agree on.
pub fn to_job_schedule(expr: &str) -> Result<String> {
    let [minute, hour, dom, month, dow] = parse_fields(expr)?;
    let dow = dow
        .split(',')
        .map(|item| weekday_item(expr, item))
        .collect::<Result<Vec<_>>>()?
        .join(",");
    Ok(format!("0 {} {} {} {} {}", minute, hour, dom, month, dow))
}

fn weekday_item(expr: &str, item: &str) -> Result<String> {
    let (range, step) = match item.split_once('/') {
        Some((range, step)) => (range, Some(step)),
        None => (item, None),
    };

    let named = match range.split_once('-') {
        Some((start, end)) => {
            let start_name = weekday(expr, start)?;
            // A range ending on Sunday-as-7 wraps; split it so it stays ascending.
            if end == "7" && step.is_none() {
                if start == "7" || start == "0" {
                    "Sun-Sat".to_string()
                } else {
                    format!("{}-Sat,Sun", start_name)
                }
            } else if end == "7" {
                // A stepped range through Sunday-as-7 is spelled out day by day.
                return stepped_through_sunday(expr, start, step.unwrap_or("1"));
            } else {
                format!("{}-{}", start_name, weekday(expr, end)?)
            }
        }
        None => weekday(expr, range)?,
    };

    Ok(match step {
        Some(step) => format!("{}/{}", named, step),
        None => named,
    })
}

fn stepped_through_sunday(expr: &str, start: &str, step: &str) -> Result<String> {
    let first = WEEKDAYS
        .iter()
        .position(|day| day.eq_ignore_ascii_case(start))
        .map(Ok)
        .unwrap_or_else(|| start.parse::<usize>().map_err(|_| invalid(expr, "bad weekday")))?;
    let step: usize = step
        .parse()
        .ok()
        .filter(|step| *step > 0)
        .ok_or_else(|| invalid(expr, format!("bad weekday step {:?}", step)))?;
    if first >= WEEKDAYS.len() {
        return Err(invalid(expr, format!("weekday {} out of range 0-7", first)));
    }

    let mut days: Vec<&str> = Vec::new();
    for day in WEEKDAYS[first..].iter().step_by(step) {
        if !days.contains(day) {
            days.push(day);
        }
    }
    Ok(days.join(","))
}

fn weekday(expr: &str, value: &str) -> Result<String> {
    if value == "*" || !value.chars().all(|c| c.is_ascii_digit()) {
        return Ok(value.to_string());
    }
    let n: usize = value.parse().map_err(|_| invalid(expr, "bad weekday"))?;
    WEEKDAYS
        .get(n)
        .map(|s| s.to_string())
        .ok_or_else(|| invalid(expr, format!("weekday {} out of range 0-7", n)))
}
