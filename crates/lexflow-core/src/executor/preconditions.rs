//! Per-kind preconditions
//!
//! An action that fails these is skipped rather than attempted.

use crate::despatch::{DIRECTORY_PLACEHOLDERS, MESSAGE_PLACEHOLDERS};
use crate::text::placeholders;
use chrono::NaiveDate;
use lexflow_storage::models::ActionConfig;

/// Date formats accepted for calendar events
const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y", "%d/%m/%Y"];

/// Parse a calendar date in one of the accepted formats
pub fn parse_event_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
}

/// Only names the renderer fills count as unresolved; other braces are text
fn known_placeholder(name: &str) -> bool {
    DIRECTORY_PLACEHOLDERS.contains(&name) || MESSAGE_PLACEHOLDERS.contains(&name)
}

fn required(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{} is empty", field));
    }
    if let Some(name) = placeholders(value).find(|name| known_placeholder(name)) {
        return Err(format!("{} has unresolved placeholder {{{}}}", field, name));
    }
    Ok(())
}

fn address(field: &str, value: &str) -> Result<(), String> {
    required(field, value)?;
    for part in value.split(',').map(str::trim) {
        if !part.contains('@') {
            return Err(format!("{} '{}' is not an email address", field, part));
        }
    }
    Ok(())
}

/// Check whether an action can be attempted at all
pub fn check(config: &ActionConfig) -> Result<(), String> {
    match config {
        ActionConfig::SendEmail(c) => {
            address("recipient", &c.to)?;
            if let Some(cc) = c.cc.as_deref().filter(|cc| !cc.trim().is_empty()) {
                address("cc", cc)?;
            }
            required("subject", &c.subject)
        }
        ActionConfig::CreateTask(c) => required("title", &c.title),
        ActionConfig::Billing(c) => {
            if !c.hours.is_finite() || c.hours <= 0.0 {
                return Err(format!("hours must be positive, got {}", c.hours));
            }
            if c.rate.is_some_and(|r| !r.is_finite() || r < 0.0) {
                return Err("rate must not be negative".to_string());
            }
            required("description", &c.description)
        }
        ActionConfig::CalendarEvent(c) => {
            required("title", &c.title)?;
            required("date", &c.date)?;
            parse_event_date(&c.date)
                .map(|_| ())
                .ok_or_else(|| format!("date '{}' is not a recognised date", c.date))
        }
        ActionConfig::SaveFile(c) => required("folder", &c.folder),
        ActionConfig::CreateAlert(c) => required("message", &c.message),
    }
}
