use anyhow::{Context, Result, anyhow};
use chrono::NaiveDateTime;
use img_parts::png::Png;
use img_parts::{Bytes, ImageEXIF};
use nom_exif::*;
use std::path::Path;

use super::tiff;
use crate::pipeline::ImageKind;
use crate::timestamp::{EXIF_DATETIME_FORMAT, format_exif_datetime};

/// The three EXIF date fields this tool manages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExifDates {
    /// IFD0 `DateTime` (0x0132).
    pub modify_date: Option<NaiveDateTime>,
    /// ExifIFD `DateTimeOriginal` (0x9003).
    pub date_time_original: Option<NaiveDateTime>,
    /// ExifIFD `DateTimeDigitized` (0x9004).
    pub create_date: Option<NaiveDateTime>,
}

impl ExifDates {
    pub fn is_empty(&self) -> bool {
        self.modify_date.is_none() && self.date_time_original.is_none() && self.create_date.is_none()
    }

    /// All three fields carry the same value.
    pub fn all_equal(&self, ts: &NaiveDateTime) -> bool {
        [self.modify_date, self.date_time_original, self.create_date]
            .iter()
            .all(|d| d.as_ref() == Some(ts))
    }

    /// `(label, formatted value)` rows for display.
    pub fn rows(&self) -> [(&'static str, Option<String>); 3] {
        [
            ("DateTime", self.modify_date.as_ref().map(format_exif_datetime)),
            ("DateTimeOriginal", self.date_time_original.as_ref().map(format_exif_datetime)),
            ("DateTimeDigitized", self.create_date.as_ref().map(format_exif_datetime)),
        ]
    }
}

/// Read the EXIF date fields from an image file.
///
/// A file without an EXIF block yields empty [`ExifDates`] rather than an error.
/// PNG `eXIf` chunks and TIFF files are read directly; everything else goes
/// through nom-exif.
pub fn read_exif_dates(path: &Path) -> Result<ExifDates> {
    match ImageKind::from_path(path) {
        Some(ImageKind::Png) => read_png_dates(path),
        Some(ImageKind::Tiff) => {
            let data = std::fs::read(path).context("Failed to open image file")?;
            Ok(from_tiff_dates(tiff::read_dates(&data)?))
        }
        _ => read_with_nom_exif(path),
    }
}

fn read_png_dates(path: &Path) -> Result<ExifDates> {
    let data = std::fs::read(path).context("Failed to open image file")?;
    let png = Png::from_bytes(Bytes::from(data)).map_err(|e| anyhow!("Failed to parse PNG: {e}"))?;

    match png.exif() {
        Some(exif) => Ok(from_tiff_dates(tiff::read_dates(&exif)?)),
        None => {
            log::debug!("No EXIF data found in {}", path.display());
            Ok(ExifDates::default())
        }
    }
}

fn from_tiff_dates(dates: tiff::TiffDates) -> ExifDates {
    let parse = |s: Option<String>| {
        s.and_then(|s| NaiveDateTime::parse_from_str(&s, EXIF_DATETIME_FORMAT).ok())
    };
    ExifDates {
        modify_date: parse(dates.date_time),
        date_time_original: parse(dates.date_time_original),
        create_date: parse(dates.date_time_digitized),
    }
}

fn read_with_nom_exif(path: &Path) -> Result<ExifDates> {
    let mut parser = MediaParser::new();
    let ms = MediaSource::file_path(path).context("Failed to open image file")?;

    let iter: ExifIter = match parser.parse(ms) {
        Ok(iter) => iter,
        Err(_) => {
            log::debug!("No EXIF data found in {}", path.display());
            return Ok(ExifDates::default());
        }
    };
    let exif: Exif = iter.into();

    Ok(ExifDates {
        modify_date: exif.get(ExifTag::ModifyDate).and_then(entry_to_datetime),
        date_time_original: exif.get(ExifTag::DateTimeOriginal).and_then(entry_to_datetime),
        create_date: exif.get(ExifTag::CreateDate).and_then(entry_to_datetime),
    })
}

/// nom-exif decodes date tags itself; plain text is accepted as a fallback.
fn entry_to_datetime(val: &EntryValue) -> Option<NaiveDateTime> {
    match val {
        EntryValue::NaiveDateTime(dt) => Some(*dt),
        EntryValue::Time(dt) => Some(dt.naive_local()),
        EntryValue::Text(s) => {
            NaiveDateTime::parse_from_str(s.trim().trim_end_matches('\0'), EXIF_DATETIME_FORMAT)
                .ok()
        }
        _ => None,
    }
}
