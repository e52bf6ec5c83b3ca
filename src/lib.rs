//! # photo-timestamps
//!
//! Restore photo dates from filenames. Camera and phone exports often keep the
//! capture time only in the name (`IMG_20230615143022.jpg`) after metadata has
//! been stripped or file times reset by a copy. This crate parses that
//! timestamp and writes it back into:
//!
//! - the EXIF `DateTime`, `DateTimeOriginal` and `DateTimeDigitized` fields, and
//! - the file's modification/access time, plus creation time where the
//!   platform allows it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use photo_timestamps::exif::default_strategies;
//! use photo_timestamps::filetimes::{CreationTimeMechanism, FileTimeSetter};
//! use photo_timestamps::pipeline::{ProcessOptions, Processor, parse_extension_list};
//! use std::path::Path;
//!
//! fn main() -> anyhow::Result<()> {
//!     // Detect the creation-time mechanism once, then pass it down.
//!     let file_times = FileTimeSetter::new(CreationTimeMechanism::detect());
//!     let processor = Processor::new(default_strategies(), file_times, ProcessOptions::default());
//!
//!     let extensions = parse_extension_list(".jpg,.jpeg,.png");
//!     let summary = processor.process_directory(Path::new("./photos"), true, &extensions)?;
//!     println!("{} succeeded, {} failed", summary.succeeded, summary.failed);
//!     Ok(())
//! }
//! ```
//!
//! ## Timestamps
//!
//! The leftmost `YYYYMMDDhhmm[ss]` digit run in the file name is used. Values
//! are naive and interpreted as host local time when converted to file times.
//!
//! ## Modules
//!
//! - [`timestamp`] — filename parsing, EXIF formatting, local epoch conversion
//! - [`exif`] — EXIF date reading and the write-strategy chain
//! - [`filetimes`] — modification and creation time setting
//! - [`pipeline`] — file collection, per-file processing, run summary
//! - [`config`] — configuration file

pub mod config;
pub mod exif;
pub mod filetimes;
pub mod pipeline;
pub mod timestamp;
