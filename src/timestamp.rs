use chrono::{Duration, Local, NaiveDate, NaiveDateTime, TimeZone};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

/// EXIF `DateTime`/`DateTimeOriginal`/`DateTimeDigitized` layout.
pub const EXIF_DATETIME_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

// YYYYMMDD + hhmm + optional ss. ASCII digits only.
static TIMESTAMP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]{8})([0-9]{4})([0-9]{2})?").unwrap());

/// Extract the capture timestamp embedded in a filename.
///
/// Only the leftmost `YYYYMMDDhhmm[ss]` digit run is considered. If it does not
/// form a valid calendar date and time, the result is `None`; later runs are
/// not tried. Missing seconds default to `00`.
///
/// ```rust
/// use photo_timestamps::timestamp::extract_timestamp;
///
/// let ts = extract_timestamp("IMG_20230615143022.jpg").unwrap();
/// assert_eq!(ts.to_string(), "2023-06-15 14:30:22");
/// assert!(extract_timestamp("photo_20230615.jpg").is_none());
/// ```
pub fn extract_timestamp(filename: &str) -> Option<NaiveDateTime> {
    let caps = TIMESTAMP_RE.captures(filename)?;

    let date = &caps[1];
    let time = &caps[2];
    let seconds = caps.get(3).map_or("00", |m| m.as_str());

    let year: i32 = date[0..4].parse().ok()?;
    let month: u32 = date[4..6].parse().ok()?;
    let day: u32 = date[6..8].parse().ok()?;
    let hour: u32 = time[0..2].parse().ok()?;
    let minute: u32 = time[2..4].parse().ok()?;
    let second: u32 = seconds.parse().ok()?;

    // Year 0000 is not a usable calendar year for photo dates.
    if year < 1 {
        return None;
    }

    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
}

/// Extract the timestamp from the file-name component of a path.
pub fn timestamp_from_path(path: &Path) -> Option<NaiveDateTime> {
    let name = path.file_name()?.to_string_lossy();
    extract_timestamp(&name)
}

/// Format a timestamp for EXIF date fields (`YYYY:MM:DD HH:MM:SS`).
pub fn format_exif_datetime(ts: &NaiveDateTime) -> String {
    ts.format(EXIF_DATETIME_FORMAT).to_string()
}

/// Convert a naive timestamp to Unix seconds, interpreting it as host local time.
///
/// Ambiguous local times (DST fall-back) resolve to the earlier instant. Local
/// times that do not exist (DST spring-forward gap) are shifted forward one hour.
pub fn local_epoch_seconds(ts: &NaiveDateTime) -> i64 {
    if let Some(dt) = Local.from_local_datetime(ts).earliest() {
        return dt.timestamp();
    }
    let shifted = *ts + Duration::hours(1);
    match Local.from_local_datetime(&shifted).earliest() {
        Some(dt) => dt.timestamp(),
        None => Local.from_utc_datetime(ts).timestamp(),
    }
}
