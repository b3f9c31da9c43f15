use chrono::{NaiveTime, Timelike};

/// Parse a time of day into 24-hour form.
///
/// Accepts flexible formats:
/// - Named times: "morning", "noon", "evening", etc.
/// - 24-hour: "08:00", "8:00", "8:5" (with or without leading zeros)
/// - 12-hour: "8:00 AM", "12:30pm", "11:59 PM"
/// - Hour only: "8", "08" (defaults to :00)
pub fn parse_time(time_str: &str) -> Option<NaiveTime> {
    let lower = time_str.trim().to_lowercase();

    let named_time = match lower.as_str() {
        "morning" | "breakfast" => Some((8, 0)),
        "midmorning" | "mid-morning" => Some((10, 0)),
        "noon" | "midday" | "lunch" => Some((12, 0)),
        "afternoon" => Some((15, 0)),
        "evening" | "dinner" => Some((18, 0)),
        "night" | "bedtime" => Some((21, 0)),
        "midnight" => Some((0, 0)),
        _ => None,
    };

    if let Some((hour, minute)) = named_time {
        return NaiveTime::from_hms_opt(hour, minute, 0);
    }

    let (clock, period) = split_period(&lower);
    let (hour, minute) = parse_clock(clock)?;

    let hour = match period {
        None if hour < 24 => hour,
        Some(Period::Am) if (1..=12).contains(&hour) => hour % 12,
        Some(Period::Pm) if (1..=12).contains(&hour) => hour % 12 + 12,
        _ => return None,
    };

    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Like [`parse_time`], but reports the offending input.
pub fn require_time(time_str: &str) -> crate::error::Result<NaiveTime> {
    parse_time(time_str).ok_or_else(|| crate::error::Error::InvalidTime(time_str.to_string()))
}

/// Render as a 12-hour label, e.g. "08:30 PM".
pub fn format_12h(time: NaiveTime) -> String {
    time.format("%I:%M %p").to_string()
}

/// Render as a 24-hour label, e.g. "20:30".
pub fn format_24h(time: NaiveTime) -> String {
    format!("{:02}:{:02}", time.hour(), time.minute())
}

#[derive(Clone, Copy)]
enum Period {
    Am,
    Pm,
}

fn split_period(input: &str) -> (&str, Option<Period>) {
    if let Some(clock) = input.strip_suffix("am") {
        (clock.trim_end(), Some(Period::Am))
    } else if let Some(clock) = input.strip_suffix("pm") {
        (clock.trim_end(), Some(Period::Pm))
    } else {
        (input, None)
    }
}

fn parse_clock(clock: &str) -> Option<(u32, u32)> {
    if clock.contains(':') {
        let parts: Vec<&str> = clock.split(':').collect();
        if parts.len() != 2 {
            return None;
        }

        let hour = parts[0].trim().parse::<u32>().ok()?;
        let minute = parts[1].trim().parse::<u32>().ok()?;

        if minute >= 60 {
            return None;
        }

        return Some((hour, minute));
    }

    // "8" means "08:00"
    clock.trim().parse::<u32>().ok().map(|hour| (hour, 0))
}
