//! Per-run archive folders: images from each stage plus a CSV and a summary.
//!
//! Layout under the results root:
//!
//! ```text
//! analysis_<timestamp>/
//!     original_image.jpg
//!     no_rebar_detected.jpg   (no rebar)
//!     rebar_detected.jpg      (rebar found)
//!     section_result.jpg      (sections measured)
//!     analysis_data.csv
//!     summary.txt
//! ```

use std::{
    fmt::Write as _,
    fs, io,
    path::{Path, PathBuf},
};

use chrono::NaiveDateTime;
use image::RgbImage;
use rebar_core::{Snapshot, overlay};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

const CSV_HEADER: [&str; 12] = [
    "timestamp",
    "section_id",
    "size_category",
    "diameter_mm",
    "confidence",
    "width_cm",
    "length_cm",
    "height_cm",
    "volume_cc",
    "cement_ratio",
    "sand_ratio",
    "aggregate_ratio",
];

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to write {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Encode(#[from] overlay::OverlayError),
    #[error("failed to render analysis CSV")]
    Csv(#[from] csv::Error),
}

/// Destination for run artefacts. Failures are reported to the caller, which
/// logs them without aborting the run.
pub trait ResultArchive: Send {
    fn save_original(&self, timestamp: &str, frame: &RgbImage) -> Result<(), ArchiveError>;

    fn save_no_detection(&self, timestamp: &str, frame: &RgbImage) -> Result<(), ArchiveError>;

    fn save_primary(&self, timestamp: &str, annotated: &RgbImage) -> Result<(), ArchiveError>;

    /// Result image, CSV rows and human-readable summary.
    fn save_result(&self, snapshot: &Snapshot) -> Result<(), ArchiveError>;
}

/// Archive that drops everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct DiscardArchive;

impl ResultArchive for DiscardArchive {
    fn save_original(&self, _: &str, _: &RgbImage) -> Result<(), ArchiveError> {
        Ok(())
    }

    fn save_no_detection(&self, _: &str, _: &RgbImage) -> Result<(), ArchiveError> {
        Ok(())
    }

    fn save_primary(&self, _: &str, _: &RgbImage) -> Result<(), ArchiveError> {
        Ok(())
    }

    fn save_result(&self, _: &Snapshot) -> Result<(), ArchiveError> {
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct FsArchive {
    root: PathBuf,
    jpeg_quality: u8,
}

impl FsArchive {
    pub fn new(root: impl Into<PathBuf>, jpeg_quality: u8) -> Self {
        Self {
            root: root.into(),
            jpeg_quality,
        }
    }

    pub fn run_dir(&self, timestamp: &str) -> PathBuf {
        self.root.join(format!("analysis_{timestamp}"))
    }

    fn write(&self, timestamp: &str, name: &str, bytes: &[u8]) -> Result<(), ArchiveError> {
        let dir = self.run_dir(timestamp);
        fs::create_dir_all(&dir).map_err(|source| ArchiveError::Io {
            path: dir.clone(),
            source,
        })?;
        let path = dir.join(name);
        fs::write(&path, bytes).map_err(|source| ArchiveError::Io {
            path: path.clone(),
            source,
        })?;
        debug!("archived {}", path.display());
        Ok(())
    }

    fn write_jpeg(&self, timestamp: &str, name: &str, image: &RgbImage) -> Result<(), ArchiveError> {
        let bytes = overlay::encode_jpeg(image, self.jpeg_quality)?;
        self.write(timestamp, name, &bytes)
    }
}

impl ResultArchive for FsArchive {
    fn save_original(&self, timestamp: &str, frame: &RgbImage) -> Result<(), ArchiveError> {
        self.write_jpeg(timestamp, "original_image.jpg", frame)
    }

    fn save_no_detection(&self, timestamp: &str, frame: &RgbImage) -> Result<(), ArchiveError> {
        self.write_jpeg(timestamp, "no_rebar_detected.jpg", frame)
    }

    fn save_primary(&self, timestamp: &str, annotated: &RgbImage) -> Result<(), ArchiveError> {
        self.write_jpeg(timestamp, "rebar_detected.jpg", annotated)
    }

    fn save_result(&self, snapshot: &Snapshot) -> Result<(), ArchiveError> {
        let timestamp = snapshot.timestamp();
        if let Some(image) = snapshot.image() {
            self.write(timestamp, "section_result.jpg", image)?;
        }
        self.write(timestamp, "analysis_data.csv", &render_csv(snapshot)?)?;
        self.write(timestamp, "summary.txt", render_summary(snapshot).as_bytes())
    }
}

/// One `analysis_data.csv` row; field order matches [`CSV_HEADER`].
#[derive(Serialize)]
struct CsvRow<'a> {
    timestamp: &'a str,
    section_id: u32,
    size_category: &'a str,
    diameter_mm: f64,
    confidence: f64,
    width_cm: f64,
    length_cm: f64,
    height_cm: f64,
    volume_cc: f64,
    cement_ratio: u32,
    sand_ratio: u32,
    aggregate_ratio: u32,
}

/// Header first even when there are no rows; fields are quoted as needed.
fn render_csv(snapshot: &Snapshot) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;
    for segment in snapshot.segments() {
        writer.serialize(CsvRow {
            timestamp: snapshot.timestamp(),
            section_id: segment.id,
            size_category: &segment.size_category,
            diameter_mm: segment.diameter_mm,
            confidence: segment.confidence,
            width_cm: segment.width_cm,
            length_cm: segment.length_cm,
            height_cm: segment.height_cm,
            volume_cc: segment.volume_cc,
            cement_ratio: segment.cement_ratio,
            sand_ratio: segment.sand_ratio,
            aggregate_ratio: segment.aggregate_ratio,
        })?;
    }
    writer
        .into_inner()
        .map_err(|err| csv::Error::from(err.into_error()))
}

fn render_summary(snapshot: &Snapshot) -> String {
    let mut out = format!("Analysis: {}\n\n", display_time(snapshot.timestamp()));
    let segments = snapshot.segments();
    if segments.is_empty() {
        out.push_str("No rebar sections detected.\n");
        return out;
    }
    let _ = writeln!(out, "Found {} rebar sections:\n", segments.len());
    for segment in segments {
        let _ = writeln!(out, "Section {} ({}):", segment.id, segment.size_category);
        let _ = writeln!(out, "  Diameter: {:.1}mm", segment.diameter_mm);
        let _ = writeln!(
            out,
            "  Mix: C:{} S:{} A:{}\n",
            segment.cement_ratio, segment.sand_ratio, segment.aggregate_ratio
        );
    }
    let _ = writeln!(out, "Total volume: {:.3} cc", snapshot.total_volume_cc());
    out
}

/// `20240101-120000-123` becomes `2024-01-01 12:00:00`; anything else is kept.
fn display_time(timestamp: &str) -> String {
    let seconds = timestamp.get(..15).unwrap_or(timestamp);
    NaiveDateTime::parse_from_str(seconds, "%Y%m%d-%H%M%S")
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|_| timestamp.to_string())
}

/// Root directory for archives, created on first use.
pub fn ensure_root(root: &Path) -> io::Result<()> {
    fs::create_dir_all(root)
}

#[cfg(test)]
mod tests {
    use std::{env, process};

    use rebar_core::{PixelBox, Segment};

    use super::*;

    fn snapshot() -> Snapshot {
        let segment = Segment {
            id: 1,
            size_category: "medium".into(),
            diameter_mm: 14.5,
            confidence: 0.88,
            width_cm: 1.5,
            length_cm: 3.0,
            height_cm: 1.5,
            volume_cc: 6.75,
            cement_ratio: 1,
            sand_ratio: 2,
            aggregate_ratio: 4,
            bbox: PixelBox::new(0, 0, 15, 30),
        };
        Snapshot::new("20240305-141516-042", vec![segment], Some(vec![0xFF, 0xD8, 0xFF]))
    }

    fn csv_text(snapshot: &Snapshot) -> String {
        String::from_utf8(render_csv(snapshot).unwrap()).unwrap()
    }

    #[test]
    fn csv_has_header_and_one_row_per_segment() {
        let csv = csv_text(&snapshot());
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], CSV_HEADER.join(","));
        assert_eq!(
            lines[1],
            "20240305-141516-042,1,medium,14.5,0.88,1.5,3.0,1.5,6.75,1,2,4"
        );
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn csv_without_segments_keeps_the_header() {
        let empty = Snapshot::new("20240305-141516-042", Vec::new(), None);
        assert_eq!(csv_text(&empty), format!("{}\n", CSV_HEADER.join(",")));
    }

    #[test]
    fn csv_quotes_tier_names_with_commas() {
        let mut segments = snapshot().segments().to_vec();
        segments[0].size_category = "heavy, ribbed".into();
        let snapshot = Snapshot::new("20240305-141516-042", segments, None);

        let csv = csv_text(&snapshot);
        assert!(csv.contains(",\"heavy, ribbed\","));

        let mut reader = csv::Reader::from_reader(csv.as_bytes());
        let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].len(), CSV_HEADER.len());
        assert_eq!(&rows[0][2], "heavy, ribbed");
        assert_eq!(&rows[0][3], "14.5");
    }

    #[test]
    fn summary_lists_sections() {
        let summary = render_summary(&snapshot());
        assert!(summary.starts_with("Analysis: 2024-03-05 14:15:16\n"));
        assert!(summary.contains("Found 1 rebar sections:"));
        assert!(summary.contains("Section 1 (medium):"));
        assert!(summary.contains("  Diameter: 14.5mm\n"));
        assert!(summary.contains("  Mix: C:1 S:2 A:4"));
    }

    #[test]
    fn result_files_land_in_run_folder() {
        let root = env::temp_dir().join(format!("rebar-archive-{}", process::id()));
        let archive = FsArchive::new(&root, 80);
        let snapshot = snapshot();
        archive
            .save_original(snapshot.timestamp(), &RgbImage::new(4, 4))
            .unwrap();
        archive.save_result(&snapshot).unwrap();

        let dir = archive.run_dir(snapshot.timestamp());
        assert!(dir.ends_with("analysis_20240305-141516-042"));
        for name in [
            "original_image.jpg",
            "section_result.jpg",
            "analysis_data.csv",
            "summary.txt",
        ] {
            assert!(dir.join(name).exists(), "{name} missing");
        }
        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn unparseable_timestamp_is_shown_verbatim() {
        assert_eq!(display_time("manual"), "manual");
    }
}
