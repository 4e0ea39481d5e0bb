//! Cron expression utilities for the process backend's scheduler.
//!
//! Accepts standard 5-field Unix expressions (minute, hour, day-of-month,
//! month, day-of-week) and widens them to the 6-field form the `cron` crate
//! parses, firing at second 0 of each match.

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

fn normalize(cron_expr: &str) -> String {
    let fields: Vec<&str> = cron_expr.split_whitespace().collect();
    if fields.len() == 5 {
        format!("0 {cron_expr}")
    } else {
        cron_expr.to_string()
    }
}

pub fn validate(cron_expr: &str) -> Result<(), String> {
    Schedule::from_str(&normalize(cron_expr))
        .map(|_| ())
        .map_err(|err| format!("invalid cron expression '{cron_expr}': {err}"))
}

/// Next occurrence strictly after now, in UTC.
pub fn next_run(cron_expr: &str) -> Result<DateTime<Utc>, String> {
    let schedule = Schedule::from_str(&normalize(cron_expr))
        .map_err(|err| format!("invalid cron expression '{cron_expr}': {err}"))?;
    schedule
        .upcoming(Utc)
        .next()
        .ok_or_else(|| format!("cron expression '{cron_expr}' has no upcoming run"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_field_expressions_are_widened() {
        assert_eq!(normalize("* * * * *"), "0 * * * * *");
        assert_eq!(normalize("30 4 * * 1"), "0 30 4 * * 1");
        assert_eq!(normalize("0 0 * * * *"), "0 0 * * * *");
    }

    #[test]
    fn standard_expressions_validate() {
        assert!(validate("0 * * * *").is_ok());
        assert!(validate("*/5 * * * *").is_ok());
        assert!(validate("not a cron").is_err());
        assert!(validate("99 * * * *").is_err());
    }

    #[test]
    fn next_run_is_in_the_future() {
        let next = next_run("* * * * *").unwrap();
        assert!(next > Utc::now());
    }
}
