//! Frame Capture
//!
//! Records what an animation actually drew so it can be inspected or rendered
//! offline. Captures are written as JSON Lines: one `{"_meta": {...}}` header
//! followed by one `{frame, line1, line2}` record per frame.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{normalize_line, DisplayDriver};

/// Errors reading or writing capture files
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Filesystem error
    #[error("Capture I/O error at {}: {source}", path.display())]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// A line was not valid JSON
    #[error("Malformed capture record on line {line}: {source}")]
    Json {
        /// 1-based line number
        line: usize,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// The first record was not a `_meta` header
    #[error("Capture file {} has no _meta header", .0.display())]
    MissingHeader(PathBuf),
}

/// One frame record in a capture file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRecord {
    /// 0-based frame index
    pub frame: usize,
    /// Top row
    pub line1: String,
    /// Bottom row
    pub line2: String,
}

/// A capture read back from disk
#[derive(Clone, Debug)]
pub struct LoadedCapture {
    /// Header metadata
    pub meta: serde_json::Map<String, serde_json::Value>,
    /// Frames in order
    pub frames: Vec<(String, String)>,
}

/// Coverage statistics for a capture
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FrameStats {
    /// Frames recorded
    pub total_frames: usize,
    /// Frames with anything on either row
    pub non_empty_frames: usize,
    /// Frames with content on both rows
    pub both_rows_active: usize,
    /// Share of blank frames (1.0 when nothing was recorded)
    pub empty_ratio: f64,
    /// Share of frames using both rows
    pub both_rows_ratio: f64,
    /// Indices of blank frames
    pub empty_frame_indices: Vec<usize>,
    /// Indices of frames using only one row
    pub single_row_indices: Vec<usize>,
}

impl FrameStats {
    /// Compute statistics over a frame sequence
    #[must_use]
    pub fn from_frames(frames: &[(String, String)]) -> Self {
        if frames.is_empty() {
            return Self {
                empty_ratio: 1.0,
                ..Self::default()
            };
        }

        let mut stats = Self {
            total_frames: frames.len(),
            ..Self::default()
        };

        for (i, (line1, line2)) in frames.iter().enumerate() {
            let top = !line1.trim().is_empty();
            let bottom = !line2.trim().is_empty();
            match (top, bottom) {
                (true, true) => {
                    stats.non_empty_frames += 1;
                    stats.both_rows_active += 1;
                }
                (true, false) | (false, true) => {
                    stats.non_empty_frames += 1;
                    stats.single_row_indices.push(i);
                }
                (false, false) => stats.empty_frame_indices.push(i),
            }
        }

        let total = stats.total_frames as f64;
        stats.empty_ratio = 1.0 - stats.non_empty_frames as f64 / total;
        stats.both_rows_ratio = stats.both_rows_active as f64 / total;
        stats
    }
}

/// Recorded frames for one animation run
#[derive(Clone, Debug)]
pub struct FrameCapture {
    animation_id: String,
    started_at: DateTime<Local>,
    started: Instant,
    frames: Vec<(String, String)>,
}

impl FrameCapture {
    /// Start an empty capture
    pub fn new(animation_id: impl Into<String>) -> Self {
        Self {
            animation_id: animation_id.into(),
            started_at: Local::now(),
            started: Instant::now(),
            frames: Vec::new(),
        }
    }

    /// Build a capture from frames recorded elsewhere
    pub fn from_frames(animation_id: impl Into<String>, frames: Vec<(String, String)>) -> Self {
        let mut capture = Self::new(animation_id);
        capture.frames = frames
            .into_iter()
            .map(|(a, b)| (normalize_line(&a), normalize_line(&b)))
            .collect();
        capture
    }

    /// Record one frame, normalized to display width
    pub fn record(&mut self, line1: &str, line2: &str) {
        self.frames
            .push((normalize_line(line1), normalize_line(line2)));
    }

    /// Identifier this capture belongs to
    #[must_use]
    pub fn animation_id(&self) -> &str {
        &self.animation_id
    }

    /// Recorded frames
    #[must_use]
    pub fn frames(&self) -> &[(String, String)] {
        &self.frames
    }

    /// Number of recorded frames
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether nothing was recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Coverage statistics
    #[must_use]
    pub fn stats(&self) -> FrameStats {
        FrameStats::from_frames(&self.frames)
    }

    /// Write the capture as JSON Lines, merging `extra` into the header
    pub fn save_jsonl(
        &self,
        path: &Path,
        extra: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), CaptureError> {
        let io_err = |source| CaptureError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut meta = serde_json::Map::new();
        meta.insert("animation_id".into(), self.animation_id.clone().into());
        meta.insert(
            "timestamp".into(),
            serde_json::json!(self.started_at.timestamp_millis() as f64 / 1000.0),
        );
        meta.insert("created_at".into(), self.started_at.to_rfc3339().into());
        meta.insert("total_frames".into(), self.frames.len().into());
        meta.insert(
            "duration".into(),
            serde_json::json!(self.started.elapsed().as_secs_f64()),
        );
        meta.extend(extra);

        let file = File::create(path).map_err(io_err)?;
        let mut out = BufWriter::new(file);

        let header = serde_json::json!({ "_meta": meta });
        writeln!(out, "{header}").map_err(io_err)?;

        for (frame, (line1, line2)) in self.frames.iter().enumerate() {
            let record = FrameRecord {
                frame,
                line1: line1.clone(),
                line2: line2.clone(),
            };
            let json = serde_json::to_string(&record)
                .map_err(|source| CaptureError::Json { line: frame + 2, source })?;
            writeln!(out, "{json}").map_err(io_err)?;
        }

        out.flush().map_err(io_err)
    }

    /// Read a capture written by [`FrameCapture::save_jsonl`]
    pub fn load_jsonl(path: &Path) -> Result<LoadedCapture, CaptureError> {
        let io_err = |source| CaptureError::Io {
            path: path.to_path_buf(),
            source,
        };
        let reader = BufReader::new(File::open(path).map_err(io_err)?);

        let mut meta = None;
        let mut frames = Vec::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(io_err)?;
            if line.trim().is_empty() {
                continue;
            }

            if meta.is_none() {
                let value: serde_json::Value = serde_json::from_str(&line)
                    .map_err(|source| CaptureError::Json { line: idx + 1, source })?;
                match value.get("_meta").and_then(|m| m.as_object()) {
                    Some(m) => meta = Some(m.clone()),
                    None => return Err(CaptureError::MissingHeader(path.to_path_buf())),
                }
                continue;
            }

            let record: FrameRecord = serde_json::from_str(&line)
                .map_err(|source| CaptureError::Json { line: idx + 1, source })?;
            frames.push((record.line1, record.line2));
        }

        let meta = meta.ok_or_else(|| CaptureError::MissingHeader(path.to_path_buf()))?;
        Ok(LoadedCapture { meta, frames })
    }
}

/// Display wrapper that records frames while forwarding them
pub struct CapturingDisplay {
    inner: Box<dyn DisplayDriver>,
    capture: Option<FrameCapture>,
}

impl CapturingDisplay {
    /// Wrap a driver; nothing is recorded until [`CapturingDisplay::begin`]
    pub fn new(inner: Box<dyn DisplayDriver>) -> Self {
        Self {
            inner,
            capture: None,
        }
    }

    /// Start recording a fresh capture
    pub fn begin(&mut self, animation_id: &str) {
        self.capture = Some(FrameCapture::new(animation_id));
    }

    /// Stop recording and return what was captured
    pub fn finish(&mut self) -> Option<FrameCapture> {
        self.capture.take()
    }

    /// Whether a capture is in progress
    #[must_use]
    pub fn is_capturing(&self) -> bool {
        self.capture.is_some()
    }
}

impl DisplayDriver for CapturingDisplay {
    fn write_frame(&mut self, line1: &str, line2: &str) -> io::Result<()> {
        if let Some(capture) = self.capture.as_mut() {
            capture.record(line1, line2);
        }
        self.inner.write_frame(line1, line2)
    }

    fn frame_sleep(&mut self, seconds: f64) {
        self.inner.frame_sleep(seconds);
    }

    fn clear(&mut self) -> io::Result<()> {
        self.inner.clear()
    }

    fn frame_rate(&self) -> u32 {
        self.inner.frame_rate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::HeadlessDisplay;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_stats_empty_capture() {
        let stats = FrameStats::from_frames(&[]);
        assert_eq!(stats.total_frames, 0);
        assert!((stats.empty_ratio - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_stats_counts_rows() {
        let capture = FrameCapture::from_frames(
            "anim_1_1000",
            vec![
                ("*".into(), "*".into()),
                ("*".into(), "".into()),
                ("".into(), "".into()),
                ("".into(), "#".into()),
            ],
        );
        let stats = capture.stats();
        assert_eq!(stats.total_frames, 4);
        assert_eq!(stats.non_empty_frames, 3);
        assert_eq!(stats.both_rows_active, 1);
        assert_eq!(stats.empty_frame_indices, vec![2]);
        assert_eq!(stats.single_row_indices, vec![1, 3]);
        assert!((stats.both_rows_ratio - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_save_writes_header_then_frames() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("frame_captures").join("anim_1_1000.jsonl");

        let mut capture = FrameCapture::new("anim_1_1000");
        capture.record("hello", "world");
        capture.record("x", "y");

        let mut extra = serde_json::Map::new();
        extra.insert("idea".into(), "rain".into());
        extra.insert("validation".into(), true.into());
        capture.save_jsonl(&path, extra).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);

        let header: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(header["_meta"]["animation_id"], "anim_1_1000");
        assert_eq!(header["_meta"]["total_frames"], 2);
        assert_eq!(header["_meta"]["idea"], "rain");
        assert_eq!(header["_meta"]["validation"], true);

        let loaded = FrameCapture::load_jsonl(&path).unwrap();
        assert_eq!(loaded.frames.len(), 2);
        assert_eq!(loaded.frames[0].0, format!("hello{}", " ".repeat(15)));
        assert_eq!(loaded.meta["idea"], "rain");
    }

    #[test]
    fn test_load_rejects_missing_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.jsonl");
        fs::write(&path, "{\"frame\":0,\"line1\":\"a\",\"line2\":\"b\"}\n").unwrap();

        let err = FrameCapture::load_jsonl(&path).unwrap_err();
        assert!(matches!(err, CaptureError::MissingHeader(_)));
    }

    #[test]
    fn test_capturing_display_forwards_and_records() {
        let mut display = CapturingDisplay::new(Box::new(HeadlessDisplay::new(6)));
        display.write_frame("before", "").unwrap();
        assert!(!display.is_capturing());

        display.begin("anim_2_2000");
        display.write_frame("a", "b").unwrap();
        display.frame_sleep(0.1);
        let capture = display.finish().unwrap();

        assert_eq!(capture.animation_id(), "anim_2_2000");
        assert_eq!(capture.len(), 1);
        assert_eq!(display.frame_rate(), 6);
        assert!(display.finish().is_none());
    }
}
