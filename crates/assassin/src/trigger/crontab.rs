//! Classic 5-field crontab expressions on top of the `cron` crate.
//!
//! The `cron` crate wants a leading seconds field and numbers days of the
//! week 1-7 from Sunday, while crontab numbers them 0-7 with both 0 and 7
//! meaning Sunday. Numeric weekdays are rewritten to names before parsing.

use cron::Schedule;
use std::str::FromStr;

const WEEKDAYS: [&str; 8] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Compile a 5-field crontab expression
pub fn parse(expression: &str) -> Result<Schedule, String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(format!("expected 5 fields, found {}", fields.len()));
    }

    let day_of_week = translate_day_of_week(fields[4])?;
    let full = format!(
        "0 {} {} {} {} {}",
        fields[0], fields[1], fields[2], fields[3], day_of_week
    );

    Schedule::from_str(&full).map_err(|e| e.to_string())
}

fn translate_day_of_week(field: &str) -> Result<String, String> {
    let items = field
        .split(',')
        .map(translate_item)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(items.join(","))
}

fn translate_item(item: &str) -> Result<String, String> {
    let (range, step) = match item.split_once('/') {
        Some((range, step)) => (range, Some(step)),
        None => (item, None),
    };

    let translated = match range.split_once('-') {
        Some((start, end)) => {
            let start_day = weekday_number(start)?;
            let end_day = weekday_number(end)?;
            if let (Some(s), Some(7)) = (start_day, end_day) {
                return expand_through_sunday(s, step);
            }
            format!("{}-{}", weekday_name(start, start_day), weekday_name(end, end_day))
        }
        None => weekday_name(range, weekday_number(range)?),
    };

    Ok(match step {
        Some(step) => format!("{translated}/{step}"),
        None => translated,
    })
}

/// A range ending on 7 reaches Sunday, which starts the week for `cron`, so
/// it cannot stay a range. Spell the days out instead, or `*` when every day
/// is covered.
fn expand_through_sunday(start: usize, step: Option<&str>) -> Result<String, String> {
    let step = match step {
        Some(raw) => raw
            .parse::<usize>()
            .ok()
            .filter(|step| *step > 0)
            .ok_or_else(|| format!("invalid day of week step `{raw}`"))?,
        None => 1,
    };

    let mut days: Vec<usize> = (start..=7).step_by(step).map(|day| day % 7).collect();
    days.sort_unstable();
    days.dedup();

    if days.len() == 7 {
        return Ok("*".to_string());
    }
    Ok(days
        .iter()
        .map(|day| WEEKDAYS[*day])
        .collect::<Vec<_>>()
        .join(","))
}

fn weekday_number(token: &str) -> Result<Option<usize>, String> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(None);
    }
    match token.parse::<usize>() {
        Ok(day) if day < WEEKDAYS.len() => Ok(Some(day)),
        _ => Err(format!("day of week `{token}` out of range 0-7")),
    }
}

fn weekday_name(token: &str, day: Option<usize>) -> String {
    match day {
        Some(day) => WEEKDAYS[day].to_string(),
        None => token.to_string(),
    }
}
