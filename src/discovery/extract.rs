//! Rule-based event extraction from message text.
//!
//! Finds the first date mention (ISO `2025-10-24`, US `10/24[/2025]`, or a
//! month name like `Oct. 24th`) and an optional time or time range near it.
//! Dates without a year take the message's year, rolling forward when that
//! would put the event well before the message was sent. No time means an
//! all-day event; a start time without an end gets one hour.

use std::sync::OnceLock;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use regex::{Captures, Regex};

use crate::types::EventIntent;

/// Mentions more than this many days before the message date are assumed to
/// mean next year ("Jan 5" in a December email).
const YEAR_ROLLOVER_DAYS: i64 = 60;

/// Timed events with no explicit end.
const DEFAULT_DURATION_MINUTES: i64 = 60;

fn re_iso_date() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").unwrap())
}

fn re_us_date() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{1,2})/(\d{1,2})(?:/(\d{2,4}))?\b").unwrap())
}

fn re_month_date() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\.?\s+(\d{1,2})(?:st|nd|rd|th)?\b(?:,?\s+(\d{4}))?",
        )
        .unwrap()
    })
}

fn re_time_range() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(\d{1,2})(?::(\d{2}))?\s*([ap]\.?m\b\.?)?\s*(?:-|–|to|until)\s*(\d{1,2})(?::(\d{2}))?\s*([ap]\.?m)\b",
        )
        .unwrap()
    })
}

fn re_time() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Meridiem must end a word: "2 amazing" is not a time.
        Regex::new(r"(?i)\b(\d{1,2})(?::(\d{2}))?\s*([ap]\.?m)\b|\b(\d{1,2}):(\d{2})\b").unwrap()
    })
}

fn re_subject_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*((re|fwd?|fw)\s*:\s*)+").unwrap())
}

fn re_location() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?im)^\s*(?:location|where|place)\s*:\s*(.+?)\s*$").unwrap())
}

/// True if the text mentions anything that parses as a date.
pub fn mentions_date(text: &str) -> bool {
    find_date(text, 2025).is_some()
}

/// Subject with reply/forward prefixes removed.
pub fn clean_subject(subject: &str) -> String {
    re_subject_prefix()
        .replace(subject, "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extract a candidate event. Returns `None` if no date is found or the title is empty.
pub fn extract_event(
    subject: &str,
    body: &str,
    message_date: DateTime<Utc>,
    tz: Tz,
) -> Option<EventIntent> {
    let title = clean_subject(subject);
    if title.is_empty() {
        return None;
    }

    let local_sent = message_date.with_timezone(&tz).date_naive();
    let text = format!("{}\n{}", subject, body);

    let (date, year_explicit, date_end) = find_date(&text, local_sent.year())?;
    let date = if year_explicit {
        date
    } else {
        roll_forward(date, local_sent)
    };

    // Prefer times that appear after the date mention.
    let tail = &text[date_end..];
    let times = find_time_range(tail).or_else(|| find_time_range(&text));

    let (start, end, all_day) = match times {
        Some((start_time, end_time)) => {
            let start = localize(tz, date.and_time(start_time))?;
            let end = end_time
                .and_then(|t| localize(tz, date.and_time(t)))
                .filter(|e| *e > start)
                .unwrap_or_else(|| start + Duration::minutes(DEFAULT_DURATION_MINUTES));
            (start, end, false)
        }
        None => {
            let start = localize(tz, date.and_time(NaiveTime::MIN))?;
            let next = date.succ_opt()?;
            let end = localize(tz, next.and_time(NaiveTime::MIN))?;
            (start, end, true)
        }
    };

    let location = re_location()
        .captures(body)
        .map(|c| c[1].to_string())
        .filter(|l| !l.is_empty());

    Some(EventIntent {
        title,
        start: start.fixed_offset(),
        end: end.fixed_offset(),
        all_day,
        timezone: tz.name().to_string(),
        location,
    })
}

/// First date mention: (date, whether the year was written, byte offset past the match).
fn find_date(text: &str, default_year: i32) -> Option<(NaiveDate, bool, usize)> {
    let mut candidates: Vec<(usize, NaiveDate, bool, usize)> = Vec::new();

    if let Some(c) = re_iso_date().captures(text) {
        let m = c.get(0)?;
        if let Some(d) = ymd(num(&c, 1)?, num(&c, 2)?, num(&c, 3)?) {
            candidates.push((m.start(), d, true, m.end()));
        }
    }

    for c in re_us_date().captures_iter(text) {
        let Some(m) = c.get(0) else { continue };
        let (year, explicit) = match c.get(3) {
            Some(y) => {
                let y: i32 = y.as_str().parse().ok()?;
                (if y < 100 { 2000 + y } else { y }, true)
            }
            None => (default_year, false),
        };
        if let Some(d) = ymd(year, num(&c, 1)?, num(&c, 2)?) {
            candidates.push((m.start(), d, explicit, m.end()));
            break;
        }
    }

    for c in re_month_date().captures_iter(text) {
        let Some(m) = c.get(0) else { continue };
        let Some(month) = month_number(&c[1]) else {
            continue;
        };
        let (year, explicit) = match c.get(3) {
            Some(y) => (y.as_str().parse().ok()?, true),
            None => (default_year, false),
        };
        if let Some(d) = ymd(year, month, num(&c, 2)?) {
            candidates.push((m.start(), d, explicit, m.end()));
            break;
        }
    }

    candidates
        .into_iter()
        .min_by_key(|(pos, ..)| *pos)
        .map(|(_, d, explicit, end)| (d, explicit, end))
}

/// Start time and optional end time.
fn find_time_range(text: &str) -> Option<(NaiveTime, Option<NaiveTime>)> {
    if let Some(c) = re_time_range().captures(text) {
        let end_meridiem = c.get(6).map(|m| m.as_str());
        let start_meridiem = c.get(3).map(|m| m.as_str()).or(end_meridiem);
        let start = hm(num(&c, 1)?, opt_num(&c, 2), start_meridiem)?;
        let end = hm(num(&c, 4)?, opt_num(&c, 5), end_meridiem)?;
        return Some((start, Some(end)));
    }

    let c = re_time().captures(text)?;
    if c.get(1).is_some() {
        let start = hm(num(&c, 1)?, opt_num(&c, 2), c.get(3).map(|m| m.as_str()))?;
        Some((start, None))
    } else {
        let start = hm(num(&c, 4)?, Some(num(&c, 5)?), None)?;
        Some((start, None))
    }
}

fn hm(hour: u32, minute: Option<u32>, meridiem: Option<&str>) -> Option<NaiveTime> {
    let minute = minute.unwrap_or(0);
    let hour = match meridiem.map(|m| m.to_ascii_lowercase()) {
        Some(m) if m.starts_with('p') => {
            if hour == 12 {
                12
            } else {
                hour + 12
            }
        }
        Some(_) => {
            if hour == 12 {
                0
            } else {
                hour
            }
        }
        None => hour,
    };
    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn roll_forward(date: NaiveDate, sent: NaiveDate) -> NaiveDate {
    if (sent - date).num_days() > YEAR_ROLLOVER_DAYS {
        date.with_year(date.year() + 1).unwrap_or(date)
    } else {
        date
    }
}

/// Resolve a wall-clock time in `tz`. DST gaps resolve to the earlier offset.
fn localize(tz: Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
}

fn ymd(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
}

fn num<T: std::str::FromStr>(c: &Captures<'_>, idx: usize) -> Option<T> {
    c.get(idx)?.as_str().parse().ok()
}

fn opt_num(c: &Captures<'_>, idx: usize) -> Option<u32> {
    c.get(idx).and_then(|m| m.as_str().parse().ok())
}

fn month_number(name: &str) -> Option<u32> {
    let key: String = name.to_ascii_lowercase().chars().take(3).collect();
    let month = match key.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}
