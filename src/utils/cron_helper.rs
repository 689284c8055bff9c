//! Cron utility functions for calculating next scheduled times
//!
//! The `cron` crate wants a leading seconds field. Classic five-field
//! expressions ("0 3 * * *") are accepted by prefixing "0 ".

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

/// Normalise a cron expression to the six/seven field form the `cron` crate parses
pub fn normalize_cron_expression(cron_expression: &str) -> String {
    let trimmed = cron_expression.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    }
}

/// Parse a cron expression, five-field expressions included
pub fn parse_cron_expression(cron_expression: &str) -> Result<Schedule, String> {
    Schedule::from_str(&normalize_cron_expression(cron_expression))
        .map_err(|e| format!("Invalid cron expression '{cron_expression}': {e}"))
}

/// First fire time strictly after `after`
///
/// # Returns
/// * `Ok(Some(DateTime<Utc>))` - The next scheduled time
/// * `Ok(None)` - Valid cron but no future schedules
/// * `Err(String)` - Invalid cron expression with error message
pub fn next_scheduled_time_after(
    cron_expression: &str,
    after: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, String> {
    Ok(parse_cron_expression(cron_expression)?.after(&after).next())
}

/// Calculate the next scheduled time from now, `None` when invalid
pub fn calculate_next_scheduled_time(cron_expression: &str) -> Option<DateTime<Utc>> {
    next_scheduled_time_after(cron_expression, Utc::now())
        .ok()
        .flatten()
}
