use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};

use crate::error::DateParseError;

/// Timestamp layouts seen in `pubDate` elements, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateLayout {
    /// `Mon, 02 Jan 2006 15:04:05 MST`
    Rfc1123,
    /// `Mon, 02 Jan 2006 15:04:05 -0700`
    Rfc1123Z,
    /// `2006-01-02T15:04:05Z07:00`
    Rfc3339,
}

pub const LAYOUTS: &[DateLayout] = &[
    DateLayout::Rfc1123,
    DateLayout::Rfc1123Z,
    DateLayout::Rfc3339,
];

const RFC1123_DATE_TIME: &str = "%d %b %Y %H:%M:%S";

impl DateLayout {
    pub fn parse(self, raw: &str) -> Option<DateTime<FixedOffset>> {
        match self {
            DateLayout::Rfc1123 => {
                let (date_time, zone) = strip_weekday(raw)?.rsplit_once(' ')?;
                let offset = named_zone_offset(zone)?;
                let naive = NaiveDateTime::parse_from_str(date_time, RFC1123_DATE_TIME).ok()?;
                offset.from_local_datetime(&naive).single()
            }
            DateLayout::Rfc1123Z => DateTime::parse_from_str(
                strip_weekday(raw)?,
                &format!("{RFC1123_DATE_TIME} %z"),
            )
            .ok(),
            DateLayout::Rfc3339 => DateTime::parse_from_rfc3339(raw).ok(),
        }
    }
}

/// Parses a feed publication date, trying each of [`LAYOUTS`] in turn.
pub fn parse_pub_date(raw: &str) -> Result<DateTime<FixedOffset>, DateParseError> {
    let trimmed = raw.trim();
    LAYOUTS
        .iter()
        .find_map(|layout| layout.parse(trimmed))
        .ok_or_else(|| DateParseError(raw.to_string()))
}

// Publishers get the weekday wrong often enough that it is not checked.
fn strip_weekday(raw: &str) -> Option<&str> {
    let (weekday, rest) = raw.split_once(", ")?;
    if weekday.len() == 3 && weekday.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(rest.trim_start())
    } else {
        None
    }
}

fn named_zone_offset(zone: &str) -> Option<FixedOffset> {
    if zone.is_empty() || !zone.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let hours = match zone {
        "UT" | "UTC" | "GMT" | "Z" => 0,
        "EDT" => -4,
        "EST" | "CDT" => -5,
        "CST" | "MDT" => -6,
        "MST" | "PDT" => -7,
        "PST" => -8,
        // Unknown abbreviations carry no offset information.
        _ => 0,
    };
    FixedOffset::east_opt(hours * 3600)
}
