//! EXIF date reading and writing.
//!
//! - [`read_exif_dates`] — read DateTime, DateTimeOriginal and DateTimeDigitized
//! - [`write_exif_dates`] — write all three through an ordered chain of
//!   [`MetadataStrategy`] implementations (in-place first, re-encode as fallback)

mod reader;
mod tiff;
mod writer;

pub use reader::{ExifDates, read_exif_dates};
pub use writer::{
    InPlaceStrategy, MetadataStrategy, ReencodeStrategy, WriteOutcome, default_strategies,
    write_exif_dates,
};
