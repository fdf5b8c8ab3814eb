//! Joins the imagery client's on-disk output into per-frame records.
//!
//! The client writes images and metadata into parallel subtrees keyed by a
//! shared numeric index rather than embedding metadata in the image file, so
//! the projector re-joins them: it derives each image's sequence directory
//! (two levels above the image, over the `keyframes/` subdirectory),
//! enumerates the sidecar JSON files under `metadata/`, and emits one record
//! per sidecar.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One discovered frame, joined from an image and its sidecar metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    /// Path of the keyframe image.
    pub image_path: PathBuf,
    /// Capture instant, passed through from the sidecar.
    pub timestamp: DateTime<Utc>,
    /// Capture session identifier, passed through from the sidecar.
    pub sequence: String,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Deserialize)]
struct FrameSidecar {
    idx: u64,
    #[serde(default)]
    sequence: Option<String>,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    position: SidecarPosition,
}

#[derive(Debug, Default, Deserialize)]
struct SidecarPosition {
    lat: Option<f64>,
    lon: Option<f64>,
}

/// Assemble frame records from the paths one imagery query wrote.
///
/// Records lacking either coordinate are dropped; unreadable sidecars are
/// logged and skipped, never fatal.
pub fn project(paths: &HashSet<PathBuf>) -> Vec<FrameRecord> {
    // Distinct sequence directories, from the grandparent of each image.
    let sequence_dirs: BTreeSet<PathBuf> = paths
        .iter()
        .filter(|p| has_extension(p, "jpg"))
        .filter_map(|p| p.parent().and_then(Path::parent))
        .map(Path::to_path_buf)
        .collect();

    let mut records = Vec::new();
    for sequence_dir in sequence_dirs {
        let metadata_dir = sequence_dir.join("metadata");
        let entries = match fs::read_dir(&metadata_dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(
                    dir = %metadata_dir.display(),
                    error = %err,
                    "Sequence directory has no readable metadata"
                );
                continue;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !has_extension(&path, "json") {
                continue;
            }
            match read_sidecar(&path) {
                Ok(sidecar) => {
                    if let Some(record) = record_from_sidecar(&sequence_dir, sidecar) {
                        records.push(record);
                    } else {
                        debug!(
                            path = %path.display(),
                            "Dropping frame without both coordinates"
                        );
                    }
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Skipping unreadable sidecar");
                }
            }
        }
    }
    records
}

fn read_sidecar(path: &Path) -> anyhow::Result<FrameSidecar> {
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

fn record_from_sidecar(sequence_dir: &Path, sidecar: FrameSidecar) -> Option<FrameRecord> {
    let lat = sidecar.position.lat?;
    let lon = sidecar.position.lon?;
    let sequence = sidecar.sequence.unwrap_or_else(|| {
        sequence_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    });
    Some(FrameRecord {
        image_path: sequence_dir
            .join("keyframes")
            .join(format!("{}.jpg", sidecar.idx)),
        timestamp: sidecar.timestamp,
        sequence,
        lat,
        lon,
    })
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_sidecar(sequence_dir: &Path, idx: u64, body: serde_json::Value) {
        let metadata_dir = sequence_dir.join("metadata");
        fs::create_dir_all(&metadata_dir).unwrap();
        fs::write(
            metadata_dir.join(format!("{idx}.json")),
            body.to_string(),
        )
        .unwrap();
    }

    fn write_keyframe(sequence_dir: &Path, idx: u64) -> PathBuf {
        let keyframes_dir = sequence_dir.join("keyframes");
        fs::create_dir_all(&keyframes_dir).unwrap();
        let path = keyframes_dir.join(format!("{idx}.jpg"));
        fs::write(&path, b"jpeg").unwrap();
        path
    }

    #[test]
    fn test_record_missing_coordinate_is_dropped() {
        let dir = TempDir::new().unwrap();
        let sequence_dir = dir.path().join("seq-1");
        let image = write_keyframe(&sequence_dir, 0);
        write_keyframe(&sequence_dir, 1);
        write_sidecar(
            &sequence_dir,
            0,
            json!({
                "idx": 0,
                "sequence": "seq-1",
                "timestamp": "2024-10-24T12:00:00Z",
                "position": {"lat": 1.0, "lon": 2.0}
            }),
        );
        write_sidecar(
            &sequence_dir,
            1,
            json!({
                "idx": 1,
                "sequence": "seq-1",
                "timestamp": "2024-10-24T12:00:01Z",
                "position": {"lon": 2.0}
            }),
        );

        let paths = HashSet::from([image.clone()]);
        let records = project(&paths);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].image_path, image);
        assert_eq!(records[0].lat, 1.0);
        assert_eq!(records[0].lon, 2.0);
    }

    #[test]
    fn test_sequence_directory_deduplicated_across_images() {
        let dir = TempDir::new().unwrap();
        let sequence_dir = dir.path().join("seq-1");
        let first = write_keyframe(&sequence_dir, 0);
        let second = write_keyframe(&sequence_dir, 1);
        write_sidecar(
            &sequence_dir,
            0,
            json!({
                "idx": 0,
                "timestamp": "2024-10-24T12:00:00Z",
                "position": {"lat": 3.0, "lon": 4.0}
            }),
        );

        // Two images, one sequence directory: the metadata tree is
        // enumerated once.
        let paths = HashSet::from([first, second]);
        let records = project(&paths);

        assert_eq!(records.len(), 1);
        // Sequence falls back to the directory name when the sidecar omits it.
        assert_eq!(records[0].sequence, "seq-1");
    }

    #[test]
    fn test_non_image_paths_are_ignored() {
        let dir = TempDir::new().unwrap();
        let paths = HashSet::from([
            dir.path().join("seq-1/metadata/0.json"),
            dir.path().join("notes.txt"),
        ]);

        assert!(project(&paths).is_empty());
    }

    #[test]
    fn test_unreadable_sidecar_is_skipped() {
        let dir = TempDir::new().unwrap();
        let sequence_dir = dir.path().join("seq-1");
        let image = write_keyframe(&sequence_dir, 0);
        write_sidecar(
            &sequence_dir,
            0,
            json!({
                "idx": 0,
                "timestamp": "2024-10-24T12:00:00Z",
                "position": {"lat": 1.0, "lon": 2.0}
            }),
        );
        fs::write(sequence_dir.join("metadata").join("1.json"), "{broken").unwrap();

        let records = project(&HashSet::from([image]));
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_image_path_derived_from_sidecar_index() {
        let dir = TempDir::new().unwrap();
        let sequence_dir = dir.path().join("seq-1");
        let image = write_keyframe(&sequence_dir, 0);
        // The sidecar index names the image, independent of the sidecar
        // file name.
        let metadata_dir = sequence_dir.join("metadata");
        fs::create_dir_all(&metadata_dir).unwrap();
        fs::write(
            metadata_dir.join("anything.json"),
            json!({
                "idx": 0,
                "timestamp": "2024-10-24T12:00:00Z",
                "position": {"lat": 1.0, "lon": 2.0}
            })
            .to_string(),
        )
        .unwrap();

        let records = project(&HashSet::from([image.clone()]));
        assert_eq!(records[0].image_path, image);
    }
}
