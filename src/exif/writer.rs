use anyhow::{Context, Result, anyhow, bail};
use chrono::NaiveDateTime;
use img_parts::jpeg::{Jpeg, JpegSegment};
use img_parts::png::Png;
use img_parts::{Bytes, ImageEXIF};
use little_exif::exif_tag::ExifTag;
use little_exif::filetype::FileExtension;
use little_exif::metadata::Metadata;
use std::io::{Cursor, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use super::tiff;
use crate::pipeline::ImageKind;
use crate::timestamp::format_exif_datetime;

// little_exif as_u8_vec(JPEG) returns: [APP1 marker 2B][length 2B][Exif\0\0 6B][TIFF data]
// img-parts set_exif() expects just the TIFF data (after Exif\0\0)
const JPEG_EXIF_OVERHEAD: usize = 10; // 2 + 2 + 6

/// One way of getting the three date fields into an image file.
///
/// Strategies are tried in order by [`write_exif_dates`]; the first one that
/// returns `Ok` wins. A strategy must either fully update the file or leave it
/// as it was.
pub trait MetadataStrategy {
    /// Short name used in logs and error messages (e.g. `"in-place"`).
    fn name(&self) -> &str;
    /// Write `timestamp` into DateTime, DateTimeOriginal and DateTimeDigitized.
    fn write(&self, path: &Path, timestamp: &NaiveDateTime) -> Result<()>;
}

/// Merge the dates into the file's existing EXIF block and rewrite only that block.
///
/// If the existing block is missing or unreadable, a fresh one is started.
/// JPEG and PNG go through img-parts so every other segment/chunk is kept
/// byte-for-byte, TIFF has its date tags patched in place, and WebP is handed
/// to little_exif's file writer.
pub struct InPlaceStrategy;

/// Decode the image, re-encode it with a fresh EXIF block holding only the
/// dates, and swap it over the original via a temporary sibling file.
pub struct ReencodeStrategy;

/// Which strategy succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    pub strategy: String,
    /// `true` when the primary strategy failed and a later one succeeded.
    pub fallback: bool,
}

/// The default chain: in-place first, re-encode as fallback.
pub fn default_strategies() -> Vec<Box<dyn MetadataStrategy>> {
    vec![Box::new(InPlaceStrategy), Box::new(ReencodeStrategy)]
}

/// Write the EXIF dates using the first strategy that succeeds.
///
/// When every strategy fails the error lists each attempt, and the file is
/// left untouched.
///
/// # Example
///
/// ```rust,no_run
/// use photo_timestamps::exif::{default_strategies, write_exif_dates};
/// use photo_timestamps::timestamp::extract_timestamp;
/// use std::path::Path;
///
/// let path = Path::new("IMG_20230615143022.jpg");
/// let ts = extract_timestamp("IMG_20230615143022.jpg").unwrap();
/// let outcome = write_exif_dates(path, &ts, &default_strategies()).unwrap();
/// println!("written by {}", outcome.strategy);
/// ```
pub fn write_exif_dates(
    path: &Path,
    timestamp: &NaiveDateTime,
    strategies: &[Box<dyn MetadataStrategy>],
) -> Result<WriteOutcome> {
    let mut errors = Vec::new();

    for (i, strategy) in strategies.iter().enumerate() {
        match strategy.write(path, timestamp) {
            Ok(()) => {
                log::debug!("  EXIF written via {}", strategy.name());
                return Ok(WriteOutcome {
                    strategy: strategy.name().to_string(),
                    fallback: i > 0,
                });
            }
            Err(e) => {
                log::debug!("  {} failed: {e:#}", strategy.name());
                errors.push(format!("{}: {e:#}", strategy.name()));
            }
        }
    }

    if errors.is_empty() {
        bail!("No metadata strategies configured");
    }
    bail!("All metadata strategies failed: {}", errors.join("; "))
}

impl MetadataStrategy for InPlaceStrategy {
    fn name(&self) -> &str {
        "in-place"
    }

    fn write(&self, path: &Path, timestamp: &NaiveDateTime) -> Result<()> {
        let kind = ImageKind::from_path(path).context("Unsupported image format")?;
        let value = format_exif_datetime(timestamp);

        match kind {
            ImageKind::Jpeg | ImageKind::Png | ImageKind::Tiff => {
                let file_bytes = std::fs::read(path).context("Failed to read image file")?;
                let metadata = match kind {
                    ImageKind::Tiff => Metadata::new(),
                    _ => load_existing_metadata(path).unwrap_or_else(Metadata::new),
                };
                let bytes = embed_dates(kind, file_bytes, metadata, &value)?;
                replace_file(path, &bytes)
            }
            ImageKind::WebP => {
                let mut metadata = load_existing_metadata(path).unwrap_or_else(Metadata::new);
                set_date_tags(&mut metadata, &value);
                guarded(|| metadata.write_to_file(path))?.context("Failed to write EXIF metadata")
            }
            ImageKind::Heif => bail!("Writing EXIF to HEIC/HEIF is not supported"),
        }
    }
}

impl MetadataStrategy for ReencodeStrategy {
    fn name(&self) -> &str {
        "re-encode"
    }

    fn write(&self, path: &Path, timestamp: &NaiveDateTime) -> Result<()> {
        let kind = ImageKind::from_path(path).context("Unsupported image format")?;
        let format = image::ImageFormat::from_path(path).context("Unsupported image format")?;
        let img = guarded(|| image::open(path))?.context("Failed to open image")?;
        let value = format_exif_datetime(timestamp);

        let mut encoded = Vec::new();
        guarded(|| img.write_to(&mut Cursor::new(&mut encoded), format))?
            .context("Failed to re-encode image")?;

        match kind {
            ImageKind::Jpeg | ImageKind::Png | ImageKind::Tiff => {
                let bytes = embed_dates(kind, encoded, Metadata::new(), &value)?;
                replace_file(path, &bytes)
            }
            _ => {
                let mut metadata = Metadata::new();
                set_date_tags(&mut metadata, &value);

                // little_exif picks the container from the extension, so the
                // temp file keeps it.
                let ext = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.to_lowercase())
                    .unwrap_or_default();
                let mut tmp = tempfile::Builder::new()
                    .prefix(".photo-timestamps-")
                    .suffix(&format!(".{ext}"))
                    .tempfile_in(parent_dir(path))
                    .context("Failed to create temporary file")?;
                tmp.write_all(&encoded).context("Failed to write temporary file")?;
                guarded(|| metadata.write_to_file(tmp.path()))?
                    .context("Failed to write EXIF metadata to re-encoded image")?;

                copy_permissions(path, tmp.path());
                tmp.persist(path)
                    .map_err(|e| e.error)
                    .context("Failed to replace original file")?;
                Ok(())
            }
        }
    }
}

/// Put the dates into an encoded JPEG, PNG or TIFF and return the new bytes.
///
/// `metadata` is the EXIF block to merge into (existing or fresh); TIFF
/// carries its tags in the file structure itself and ignores it.
fn embed_dates(kind: ImageKind, bytes: Vec<u8>, mut metadata: Metadata, value: &str) -> Result<Vec<u8>> {
    match kind {
        ImageKind::Jpeg => {
            set_date_tags(&mut metadata, value);
            embed_jpeg(bytes, &metadata)
        }
        ImageKind::Png => {
            set_date_tags(&mut metadata, value);
            embed_png(bytes, &metadata)
        }
        ImageKind::Tiff => tiff::set_dates(&bytes, value),
        other => bail!("No embedded EXIF path for {other:?}"),
    }
}

/// Set DateTime, DateTimeOriginal and DateTimeDigitized to the same value.
fn set_date_tags(metadata: &mut Metadata, value: &str) {
    metadata.set_tag(ExifTag::ModifyDate(value.to_string()));
    metadata.set_tag(ExifTag::DateTimeOriginal(value.to_string()));
    metadata.set_tag(ExifTag::CreateDate(value.to_string()));
}

/// Load existing EXIF metadata from a file path using little_exif.
/// Returns None if it can't parse, so the caller starts from an empty block.
fn load_existing_metadata(path: &Path) -> Option<Metadata> {
    match guarded(|| Metadata::new_from_path(path)) {
        Ok(Ok(m)) => {
            log::debug!("little_exif loaded {} existing EXIF tags", m.data().len());
            Some(m)
        }
        Ok(Err(e)) => {
            log::debug!("little_exif could not parse EXIF: {e}");
            None
        }
        Err(e) => {
            log::debug!("{e}");
            None
        }
    }
}

/// Run a codec call, turning a panic into an error.
///
/// little_exif and the image decoders can panic on malformed input; the
/// default panic hook is silenced for the duration of the call.
fn guarded<T>(f: impl FnOnce() -> T) -> Result<T> {
    let prev_hook = panic::take_hook();
    panic::set_hook(Box::new(|_| {}));
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    panic::set_hook(prev_hook);

    result.map_err(|payload| {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        anyhow!("codec panicked: {msg}")
    })
}

/// Serialize the metadata and strip the APP1 framing, leaving raw TIFF data.
fn tiff_payload(metadata: &Metadata) -> Result<Bytes> {
    let exif_bytes = guarded(|| metadata.as_u8_vec(FileExtension::JPEG))?;
    if exif_bytes.len() <= JPEG_EXIF_OVERHEAD {
        bail!("little_exif produced an empty EXIF block");
    }
    Ok(Bytes::from(exif_bytes[JPEG_EXIF_OVERHEAD..].to_vec()))
}

/// Replace the EXIF APP1 segment of a JPEG, keeping every other segment.
fn embed_jpeg(file_bytes: Vec<u8>, metadata: &Metadata) -> Result<Vec<u8>> {
    let tiff_data = tiff_payload(metadata)?;

    let mut jpeg = Jpeg::from_bytes(Bytes::from(file_bytes))
        .map_err(|e| anyhow!("Failed to parse JPEG: {e}"))?;

    let orig_exif_pos = find_exif_segment_pos(jpeg.segments());
    jpeg.set_exif(Some(tiff_data));

    // set_exif() inserts at position 3, which may be after XMP APP1.
    // Move the EXIF segment back to its original position so EXIF comes
    // before XMP (required for many EXIF parsers).
    if let Some(new_pos) = find_exif_segment_pos(jpeg.segments()) {
        let target_pos = orig_exif_pos.unwrap_or(1); // default: right after APP0
        if target_pos < new_pos {
            let segments = jpeg.segments_mut();
            let seg = segments.remove(new_pos);
            segments.insert(target_pos, seg);
        }
    }

    Ok(jpeg.encoder().bytes().to_vec())
}

/// Replace the eXIf chunk of a PNG, keeping every other chunk.
fn embed_png(file_bytes: Vec<u8>, metadata: &Metadata) -> Result<Vec<u8>> {
    let tiff_data = tiff_payload(metadata)?;

    let mut png = Png::from_bytes(Bytes::from(file_bytes))
        .map_err(|e| anyhow!("Failed to parse PNG: {e}"))?;
    png.set_exif(Some(tiff_data));

    Ok(png.encoder().bytes().to_vec())
}

/// Find the position of the EXIF APP1 segment in a JPEG.
/// EXIF segments have marker 0xE1 (APP1) and contents starting with "Exif\0\0".
fn find_exif_segment_pos(segments: &[JpegSegment]) -> Option<usize> {
    const EXIF_PREFIX: &[u8] = b"Exif\0\0";
    segments
        .iter()
        .position(|s| s.marker() == 0xE1 && s.contents().starts_with(EXIF_PREFIX))
}

/// Write `bytes` to a temporary sibling, then rename it over `path`.
fn replace_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = tempfile::Builder::new()
        .prefix(".photo-timestamps-")
        .suffix(".tmp")
        .tempfile_in(parent_dir(path))
        .context("Failed to create temporary file")?;
    tmp.write_all(bytes).context("Failed to write temporary file")?;
    tmp.as_file().sync_all().context("Failed to flush temporary file")?;

    copy_permissions(path, tmp.path());
    tmp.persist(path)
        .map_err(|e| e.error)
        .context("Failed to replace original file")?;
    Ok(())
}

/// Temp files are created 0600; give the replacement the original's mode.
fn copy_permissions(from: &Path, to: &Path) {
    if let Ok(meta) = std::fs::metadata(from) {
        if let Err(e) = std::fs::set_permissions(to, meta.permissions()) {
            log::debug!("Could not copy permissions to {}: {e}", to.display());
        }
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}
