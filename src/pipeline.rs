use anyhow::{Context, Result, bail};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::exif::{self, MetadataStrategy, write_exif_dates};
use crate::filetimes::FileTimeSetter;
use crate::timestamp::{format_exif_datetime, timestamp_from_path};

/// Extensions processed when none are configured.
pub const DEFAULT_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".tiff", ".tif", ".heic"];

/// The container format of an image file, used to pick a metadata write path.
///
/// ```rust
/// use photo_timestamps::pipeline::ImageKind;
/// use std::path::Path;
///
/// assert_eq!(ImageKind::from_path(Path::new("photo.JPG")), Some(ImageKind::Jpeg));
/// assert_eq!(ImageKind::from_path(Path::new("photo.heic")), Some(ImageKind::Heif));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImageKind {
    /// JPEG — EXIF APP1 segment rewritten via img-parts
    Jpeg,
    /// PNG — eXIf chunk rewritten via img-parts
    Png,
    /// TIFF — date tags patched directly in IFD0 and the Exif IFD
    Tiff,
    /// WebP — EXIF written by little_exif
    WebP,
    /// HEIC/HEIF — dates readable via nom-exif, writing is not supported
    Heif,
}

impl ImageKind {
    /// Determine the image kind from a file path extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "tif" | "tiff" => Some(Self::Tiff),
            "webp" => Some(Self::WebP),
            "heic" | "heif" => Some(Self::Heif),
            _ => None,
        }
    }
}

/// Normalize extensions to lowercase with a leading dot, dropping blanks.
///
/// ```rust
/// use photo_timestamps::pipeline::normalize_extensions;
///
/// assert_eq!(normalize_extensions(["JPG", ".Png", " "]), vec![".jpg", ".png"]);
/// ```
pub fn normalize_extensions<I, S>(extensions: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for ext in extensions {
        let ext = ext.as_ref().trim().to_lowercase();
        if ext.is_empty() || ext == "." {
            continue;
        }
        let ext = if ext.starts_with('.') { ext } else { format!(".{ext}") };
        if !out.contains(&ext) {
            out.push(ext);
        }
    }
    out
}

/// Split a comma-separated extension list and normalize it.
pub fn parse_extension_list(list: &str) -> Vec<String> {
    normalize_extensions(list.split(','))
}

/// `true` if the file's extension (with leading dot, lowercased) is in `extensions`.
pub fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let dotted = format!(".{}", ext.to_lowercase());
            extensions.contains(&dotted)
        })
        .unwrap_or(false)
}

/// Collect regular files under `root` whose extension is accepted.
///
/// Entries are returned in file-name order within each directory. Any error
/// while enumerating aborts the collection.
pub fn collect_images(root: &Path, recursive: bool, extensions: &[String]) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        bail!("{} is not a valid directory", root.display());
    }

    let mut walker = WalkDir::new(root).min_depth(1).sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut images = Vec::new();
    for entry in walker {
        let entry = entry.with_context(|| format!("Error accessing directory {}", root.display()))?;
        let p = entry.path();
        if p.is_file() && has_extension(p, extensions) {
            images.push(p.to_path_buf());
        }
    }

    Ok(images)
}

/// Per-run switches that affect how each file is handled.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    pub dry_run: bool,
    pub backup_originals: bool,
}

/// The outcome of processing one file.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessResult {
    pub path: PathBuf,
    pub success: bool,
    pub message: String,
}

impl ProcessResult {
    fn ok(path: &Path, message: String) -> Self {
        Self { path: path.to_path_buf(), success: true, message }
    }

    fn failed(path: &Path, message: String) -> Self {
        Self { path: path.to_path_buf(), success: false, message }
    }
}

/// Success and failure counts for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    fn record(&mut self, result: &ProcessResult) {
        if result.success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Everything needed to process files: the metadata strategy chain, the
/// file-time setter and the run options.
pub struct Processor {
    strategies: Vec<Box<dyn MetadataStrategy>>,
    file_times: FileTimeSetter,
    options: ProcessOptions,
}

impl Processor {
    pub fn new(
        strategies: Vec<Box<dyn MetadataStrategy>>,
        file_times: FileTimeSetter,
        options: ProcessOptions,
    ) -> Self {
        Self { strategies, file_times, options }
    }

    pub fn options(&self) -> &ProcessOptions {
        &self.options
    }

    /// Update one file from the timestamp in its name.
    ///
    /// The EXIF write and the file-time update are attempted independently;
    /// the file only counts as a success when both succeed.
    pub fn process_image(&self, path: &Path) -> ProcessResult {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let Some(timestamp) = timestamp_from_path(path) else {
            return ProcessResult::failed(
                path,
                format!("Could not extract timestamp from filename: {filename}"),
            );
        };
        let exif_timestamp = format_exif_datetime(&timestamp);

        if self.options.dry_run {
            if log::log_enabled!(log::Level::Debug) {
                match exif::read_exif_dates(path) {
                    Ok(current) => {
                        for (tag, value) in current.rows() {
                            log::debug!("  {tag}: {}", value.as_deref().unwrap_or("(none)"));
                        }
                    }
                    Err(e) => log::debug!("  Could not read EXIF: {e:#}"),
                }
            }
            return ProcessResult::ok(
                path,
                format!("Would update timestamp for {filename} to {exif_timestamp}"),
            );
        }

        if self.options.backup_originals {
            if let Err(e) = backup_file(path) {
                log::warn!("Failed to backup {}: {e:#}", path.display());
            }
        }

        let exif_result = write_exif_dates(path, &timestamp, &self.strategies);
        // Always try file times, even if the EXIF update failed. Runs second so
        // the rewrite does not clobber the modification time.
        let times_result = self.file_times.apply(path, &timestamp);

        match (exif_result, times_result) {
            (Ok(outcome), Ok(_)) => {
                let via = if outcome.fallback {
                    format!(" (using {} fallback)", outcome.strategy)
                } else {
                    String::new()
                };
                ProcessResult::ok(
                    path,
                    format!("Updated EXIF and file timestamps for {filename} to {exif_timestamp}{via}"),
                )
            }
            (Ok(_), Err(e)) => ProcessResult::failed(
                path,
                format!("Updated EXIF timestamps but failed to set file times for {filename}: {e:#}"),
            ),
            (Err(e), Ok(_)) => ProcessResult::failed(
                path,
                format!("Updated file timestamps but failed to set EXIF data for {filename}: {e:#}"),
            ),
            (Err(exif_err), Err(times_err)) => ProcessResult::failed(
                path,
                format!(
                    "Failed to update both EXIF and file timestamps for {filename}: {exif_err:#}; {times_err:#}"
                ),
            ),
        }
    }

    /// [`Self::process_image`], with any panic converted into a failed result.
    pub fn process_image_guarded(&self, path: &Path) -> ProcessResult {
        match panic::catch_unwind(AssertUnwindSafe(|| self.process_image(path))) {
            Ok(result) => result,
            Err(payload) => {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                ProcessResult::failed(path, format!("Unexpected error processing {name}: {msg}"))
            }
        }
    }

    /// Process every matching file under `root` and return the counts.
    ///
    /// Fails only when the directory itself cannot be read; every per-file
    /// problem is counted and logged, and the walk continues.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use photo_timestamps::exif::default_strategies;
    /// use photo_timestamps::filetimes::{CreationTimeMechanism, FileTimeSetter};
    /// use photo_timestamps::pipeline::{DEFAULT_EXTENSIONS, ProcessOptions, Processor, normalize_extensions};
    /// use std::path::Path;
    ///
    /// let processor = Processor::new(
    ///     default_strategies(),
    ///     FileTimeSetter::new(CreationTimeMechanism::detect()),
    ///     ProcessOptions { dry_run: true, ..Default::default() },
    /// );
    /// let extensions = normalize_extensions(DEFAULT_EXTENSIONS);
    /// let summary = processor.process_directory(Path::new("./photos"), false, &extensions).unwrap();
    /// println!("{} succeeded, {} failed", summary.succeeded, summary.failed);
    /// ```
    pub fn process_directory(
        &self,
        root: &Path,
        recursive: bool,
        extensions: &[String],
    ) -> Result<RunSummary> {
        let images = collect_images(root, recursive, extensions)?;
        let total = images.len();
        log::info!("Found {total} image files to process");

        let mut summary = RunSummary::default();
        for (i, path) in images.iter().enumerate() {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            log::info!("[{}/{}] Processing: {name}", i + 1, total);

            let result = self.process_image_guarded(path);
            if result.success {
                log::info!("  {}", result.message);
            } else {
                log::error!("  {}", result.message);
            }
            summary.record(&result);
        }

        Ok(summary)
    }
}

/// Create a backup of the original file (once; an existing backup is kept).
fn backup_file(path: &Path) -> Result<PathBuf> {
    let backup_path = path.with_extension(format!(
        "{}.bak",
        path.extension().unwrap_or_default().to_string_lossy()
    ));

    if !backup_path.exists() {
        std::fs::copy(path, &backup_path).context("Failed to create backup")?;
        log::debug!("Backup created: {}", backup_path.display());
    }

    Ok(backup_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exif::{InPlaceStrategy, read_exif_dates};
    use crate::filetimes::CreationTimeMechanism;
    use crate::timestamp::{extract_timestamp, local_epoch_seconds};
    use chrono::NaiveDateTime;
    use filetime::FileTime;
    use std::fs;
    use tempfile::TempDir;

    fn defaults() -> Vec<String> {
        normalize_extensions(DEFAULT_EXTENSIONS)
    }

    fn processor(dry_run: bool) -> Processor {
        Processor::new(
            exif::default_strategies(),
            FileTimeSetter::new(CreationTimeMechanism::Disabled),
            ProcessOptions { dry_run, backup_originals: false },
        )
    }

    fn sample_jpeg(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        image::RgbImage::new(8, 8).save(&path).unwrap();
        path
    }

    fn mtime(path: &Path) -> i64 {
        FileTime::from_last_modification_time(&fs::metadata(path).unwrap()).unix_seconds()
    }

    struct Exploding;

    impl MetadataStrategy for Exploding {
        fn name(&self) -> &str {
            "exploding"
        }
        fn write(&self, path: &Path, _timestamp: &NaiveDateTime) -> Result<()> {
            if path.to_string_lossy().contains("boom") {
                panic!("decoder blew up");
            }
            Ok(())
        }
    }

    // ── ImageKind::from_path ──────────────────────────────────────────

    #[test]
    fn image_kind_by_extension() {
        assert_eq!(ImageKind::from_path(Path::new("a.jpg")), Some(ImageKind::Jpeg));
        assert_eq!(ImageKind::from_path(Path::new("a.JPEG")), Some(ImageKind::Jpeg));
        assert_eq!(ImageKind::from_path(Path::new("a.png")), Some(ImageKind::Png));
        assert_eq!(ImageKind::from_path(Path::new("a.tif")), Some(ImageKind::Tiff));
        assert_eq!(ImageKind::from_path(Path::new("a.TIFF")), Some(ImageKind::Tiff));
        assert_eq!(ImageKind::from_path(Path::new("a.webp")), Some(ImageKind::WebP));
        assert_eq!(ImageKind::from_path(Path::new("a.HEIC")), Some(ImageKind::Heif));
        assert_eq!(ImageKind::from_path(Path::new("a.pdf")), None);
        assert_eq!(ImageKind::from_path(Path::new("noext")), None);
    }

    // ── extensions ───────────────────────────────────────────────────

    #[test]
    fn extension_list_normalization() {
        assert_eq!(
            parse_extension_list("jpg, .PNG,,heic,.jpg"),
            vec![".jpg", ".png", ".heic"]
        );
    }

    #[test]
    fn default_extensions_are_normalized() {
        assert_eq!(defaults(), DEFAULT_EXTENSIONS);
    }

    #[test]
    fn extension_matching_ignores_case() {
        let exts = defaults();
        assert!(has_extension(Path::new("IMG.JPG"), &exts));
        assert!(has_extension(Path::new("scan.Tiff"), &exts));
        assert!(!has_extension(Path::new("photo.XYZ"), &exts));
        assert!(!has_extension(Path::new(".jpg"), &exts));
        assert!(!has_extension(Path::new("noext"), &exts));
    }

    // ── collect_images ───────────────────────────────────────────────

    #[test]
    fn collect_non_recursive() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(dir.path().join("b.jpg"), b"x").unwrap();
        fs::write(dir.path().join("a.png"), b"x").unwrap();
        fs::write(dir.path().join("c.txt"), b"x").unwrap();
        fs::write(sub.join("d.jpg"), b"x").unwrap();

        let images = collect_images(dir.path(), false, &defaults()).unwrap();
        let names: Vec<_> = images.iter().map(|p| p.file_name().unwrap().to_owned()).collect();
        assert_eq!(names, ["a.png", "b.jpg"]);
    }

    #[test]
    fn collect_recursive() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(dir.path().join("a.jpg"), b"x").unwrap();
        fs::write(sub.join("b.png"), b"x").unwrap();
        fs::write(sub.join("c.txt"), b"x").unwrap();

        let images = collect_images(dir.path(), true, &defaults()).unwrap();
        assert_eq!(images.len(), 2);
    }

    #[test]
    fn collect_skips_directories_with_image_names() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("album.jpg")).unwrap();

        let images = collect_images(dir.path(), true, &defaults()).unwrap();
        assert!(images.is_empty());
    }

    #[test]
    fn collect_rejects_missing_directory() {
        assert!(collect_images(Path::new("/nonexistent/path"), false, &defaults()).is_err());
    }

    #[test]
    fn collect_rejects_file_root() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.jpg");
        fs::write(&file, b"x").unwrap();
        assert!(collect_images(&file, false, &defaults()).is_err());
    }

    // ── process_image ────────────────────────────────────────────────

    #[test]
    fn parse_miss_is_a_failure() {
        let dir = TempDir::new().unwrap();
        let path = sample_jpeg(dir.path(), "photo_20230615.jpg");

        let result = processor(false).process_image(&path);
        assert!(!result.success);
        assert_eq!(
            result.message,
            "Could not extract timestamp from filename: photo_20230615.jpg"
        );
    }

    #[test]
    fn live_run_updates_exif_and_mtime() {
        let dir = TempDir::new().unwrap();
        let path = sample_jpeg(dir.path(), "IMG_20230615143022.jpg");
        let ts = extract_timestamp("IMG_20230615143022.jpg").unwrap();

        let result = processor(false).process_image(&path);
        assert!(result.success, "{}", result.message);
        assert_eq!(
            result.message,
            "Updated EXIF and file timestamps for IMG_20230615143022.jpg to 2023:06:15 14:30:22"
        );
        assert!(read_exif_dates(&path).unwrap().all_equal(&ts));
        assert_eq!(mtime(&path), local_epoch_seconds(&ts));
    }

    #[test]
    fn live_run_covers_tiff_and_png() {
        let dir = TempDir::new().unwrap();
        let ts = extract_timestamp("IMG_20230615143022.tif").unwrap();
        let tif = dir.path().join("IMG_20230615143022.tif");
        image::RgbImage::new(4, 4).save(&tif).unwrap();
        let png = dir.path().join("IMG_20230615143022.png");
        image::RgbaImage::new(4, 4).save(&png).unwrap();

        for path in [&tif, &png] {
            let result = processor(false).process_image(path);
            assert!(result.success, "{}", result.message);
            assert!(!result.message.contains("fallback"), "{}", result.message);
            assert!(read_exif_dates(path).unwrap().all_equal(&ts));
            assert_eq!(mtime(path), local_epoch_seconds(&ts));
        }
    }

    #[test]
    fn heic_fails_without_touching_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("IMG_20230615143022.heic");
        fs::write(&path, b"heic bytes").unwrap();

        let result = processor(false).process_image(&path);
        assert!(!result.success);
        assert_eq!(fs::read(&path).unwrap(), b"heic bytes");
    }

    #[test]
    fn dry_run_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let path = sample_jpeg(dir.path(), "IMG_20230615143022.jpg");
        let bytes = fs::read(&path).unwrap();
        let before = mtime(&path);

        let result = processor(true).process_image(&path);
        assert!(result.success);
        assert_eq!(
            result.message,
            "Would update timestamp for IMG_20230615143022.jpg to 2023:06:15 14:30:22"
        );
        assert_eq!(fs::read(&path).unwrap(), bytes);
        assert_eq!(mtime(&path), before);
    }

    #[test]
    fn second_run_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let path = sample_jpeg(dir.path(), "IMG_20230615143022.jpg");
        let p = processor(false);

        assert!(p.process_image(&path).success);
        let dates = read_exif_dates(&path).unwrap();
        let time = mtime(&path);

        assert!(p.process_image(&path).success);
        assert_eq!(read_exif_dates(&path).unwrap(), dates);
        assert_eq!(mtime(&path), time);
    }

    #[test]
    fn unreadable_image_still_gets_file_times() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("IMG_20230615143022.jpg");
        fs::write(&path, b"not an image").unwrap();
        let ts = extract_timestamp("IMG_20230615143022.jpg").unwrap();

        let result = processor(false).process_image(&path);
        assert!(!result.success);
        assert!(
            result.message.starts_with("Updated file timestamps but failed to set EXIF data"),
            "{}",
            result.message
        );
        assert_eq!(fs::read(&path).unwrap(), b"not an image");
        assert_eq!(mtime(&path), local_epoch_seconds(&ts));
    }

    #[test]
    fn fallback_is_named_in_message() {
        struct Refuses;
        impl MetadataStrategy for Refuses {
            fn name(&self) -> &str {
                "refuses"
            }
            fn write(&self, _: &Path, _: &NaiveDateTime) -> Result<()> {
                bail!("no")
            }
        }

        let dir = TempDir::new().unwrap();
        let path = sample_jpeg(dir.path(), "IMG_20230615143022.jpg");
        let p = Processor::new(
            vec![Box::new(Refuses), Box::new(InPlaceStrategy)],
            FileTimeSetter::new(CreationTimeMechanism::Disabled),
            ProcessOptions::default(),
        );

        let result = p.process_image(&path);
        assert!(result.success);
        assert!(result.message.ends_with("(using in-place fallback)"), "{}", result.message);
    }

    #[test]
    fn backup_is_created_once() {
        let dir = TempDir::new().unwrap();
        let path = sample_jpeg(dir.path(), "IMG_20230615143022.jpg");
        let original = fs::read(&path).unwrap();
        let p = Processor::new(
            exif::default_strategies(),
            FileTimeSetter::new(CreationTimeMechanism::Disabled),
            ProcessOptions { dry_run: false, backup_originals: true },
        );

        assert!(p.process_image(&path).success);
        assert!(p.process_image(&path).success);

        let backup = dir.path().join("IMG_20230615143022.jpg.bak");
        assert_eq!(fs::read(backup).unwrap(), original);
    }

    // ── process_directory ────────────────────────────────────────────

    #[test]
    fn directory_counts_successes_and_failures() {
        let dir = TempDir::new().unwrap();
        sample_jpeg(dir.path(), "IMG_20230615143022.jpg");
        sample_jpeg(dir.path(), "IMG_202306151430.jpg");
        sample_jpeg(dir.path(), "holiday.jpg");

        let summary = processor(false)
            .process_directory(dir.path(), false, &defaults())
            .unwrap();
        assert_eq!(summary, RunSummary { succeeded: 2, failed: 1 });
        assert!(summary.has_failures());
    }

    #[test]
    fn directory_excludes_unlisted_extensions() {
        let dir = TempDir::new().unwrap();
        let odd = dir.path().join("photo_20230615143022.XYZ");
        fs::write(&odd, b"x").unwrap();
        let before = mtime(&odd);

        let summary = processor(false)
            .process_directory(dir.path(), false, &defaults())
            .unwrap();
        assert_eq!(summary, RunSummary::default());
        assert_eq!(mtime(&odd), before);
    }

    #[test]
    fn panic_in_one_file_does_not_stop_the_batch() {
        let dir = TempDir::new().unwrap();
        for name in ["a_20230615143022.jpg", "boom_20230615143022.jpg", "c_20230615143022.jpg"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        let p = Processor::new(
            vec![Box::new(Exploding)],
            FileTimeSetter::new(CreationTimeMechanism::Disabled),
            ProcessOptions::default(),
        );

        let summary = p.process_directory(dir.path(), false, &defaults()).unwrap();
        assert_eq!(summary, RunSummary { succeeded: 2, failed: 1 });

        let result = p.process_image_guarded(&dir.path().join("boom_20230615143022.jpg"));
        assert!(!result.success);
        assert!(result.message.contains("decoder blew up"), "{}", result.message);
    }

    #[test]
    fn directory_error_aborts_before_processing() {
        let err = processor(false)
            .process_directory(Path::new("/nonexistent/path"), false, &defaults())
            .unwrap_err();
        assert!(err.to_string().contains("not a valid directory"));
    }

    #[test]
    fn dry_run_directory_reports_success() {
        let dir = TempDir::new().unwrap();
        sample_jpeg(dir.path(), "IMG_20230615143022.jpg");

        let summary = processor(true)
            .process_directory(dir.path(), true, &defaults())
            .unwrap();
        assert_eq!(summary, RunSummary { succeeded: 1, failed: 0 });
    }
}
