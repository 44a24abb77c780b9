use crate::core::error::ModelError;
use crate::core::keys::FloatKey;
use crate::core::models::ids::ParticleId;
use crate::core::models::store::ParticleStore;
use serde::Serialize;
use slotmap::Key as _;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TrajectoryError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("CSV writing error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Frame {frame} is out of range (trajectory has {len} frames)")]
    FrameOutOfRange { frame: i64, len: usize },
    #[error("Trajectory contains no frames")]
    Empty,
    #[error("Failed to capture frame: {0}")]
    Capture(#[from] ModelError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParticleRecord {
    pub particle: ParticleId,
    pub name: String,
    /// `(attribute name, value)` pairs in the order the keys were requested.
    pub values: Vec<(String, f64)>,
}

/// The float attribute values of every particle at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSnapshot {
    pub frame: usize,
    pub particles: Vec<ParticleRecord>,
}

impl FrameSnapshot {
    /// Copies the requested float attributes of every particle that has at least one of them.
    pub fn capture(
        frame: usize,
        store: &ParticleStore,
        keys: &[FloatKey],
    ) -> Result<Self, TrajectoryError> {
        let names: Vec<String> = keys
            .iter()
            .map(|key| {
                store
                    .registry()
                    .name_of(key.raw())
                    .ok_or(ModelError::UnknownKey(key.raw()))
            })
            .collect::<Result<_, _>>()?;

        let mut particles = Vec::new();
        for (id, data) in store.particles() {
            let mut values = Vec::new();
            for (key, name) in keys.iter().zip(&names) {
                if store.has_attribute(id, *key) {
                    values.push((name.clone(), store.float(id, *key)?));
                }
            }
            if !values.is_empty() {
                particles.push(ParticleRecord {
                    particle: id,
                    name: data.name.clone(),
                    values,
                });
            }
        }
        Ok(Self { frame, particles })
    }
}

/// A sink for attribute snapshots.
pub trait TrajectoryWriter {
    fn write_frame(&mut self, snapshot: &FrameSnapshot) -> Result<(), TrajectoryError>;
}

/// Keeps every recorded frame in memory.
///
/// Frame selection follows the export convention of trajectory tools:
///
/// * `frame >= 0` selects that single frame,
/// * `frame == -1` selects the latest frame,
/// * `frame < -1` selects every `|frame|`-th frame starting at frame 0, in order.
#[derive(Debug, Clone, Default)]
pub struct TrajectoryRecorder {
    frames: Vec<FrameSnapshot>,
}

impl TrajectoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[FrameSnapshot] {
        &self.frames
    }

    /// Captures the current store state as the next frame.
    pub fn record(&mut self, store: &ParticleStore, keys: &[FloatKey]) -> Result<usize, TrajectoryError> {
        let frame = self.frames.len();
        let snapshot = FrameSnapshot::capture(frame, store, keys)?;
        self.frames.push(snapshot);
        debug!(frame, "Recorded trajectory frame.");
        Ok(frame)
    }

    pub fn select(&self, frame: i64) -> Result<Vec<&FrameSnapshot>, TrajectoryError> {
        if self.frames.is_empty() {
            return Err(TrajectoryError::Empty);
        }
        match frame {
            f if f >= 0 => self
                .frames
                .get(f as usize)
                .map(|snapshot| vec![snapshot])
                .ok_or(TrajectoryError::FrameOutOfRange {
                    frame: f,
                    len: self.frames.len(),
                }),
            -1 => Ok(self.frames.last().into_iter().collect()),
            f => Ok(self
                .frames
                .iter()
                .step_by(f.unsigned_abs() as usize)
                .collect()),
        }
    }

    /// Writes the selected frames to `writer`, returning how many were written.
    pub fn export(
        &self,
        frame: i64,
        writer: &mut dyn TrajectoryWriter,
    ) -> Result<usize, TrajectoryError> {
        let selected = self.select(frame)?;
        for snapshot in &selected {
            writer.write_frame(snapshot)?;
        }
        Ok(selected.len())
    }
}

impl TrajectoryWriter for TrajectoryRecorder {
    fn write_frame(&mut self, snapshot: &FrameSnapshot) -> Result<(), TrajectoryError> {
        self.frames.push(snapshot.clone());
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    frame: usize,
    particle: u64,
    name: &'a str,
    attribute: &'a str,
    value: f64,
}

/// Writes frames as long-format CSV rows: `frame,particle,name,attribute,value`.
pub struct CsvTrajectoryWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> CsvTrajectoryWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(inner),
        }
    }

    pub fn into_inner(self) -> Result<W, TrajectoryError> {
        self.writer
            .into_inner()
            .map_err(|e| TrajectoryError::Csv(csv::Error::from(e.into_error())))
    }
}

impl CsvTrajectoryWriter<File> {
    pub fn create(path: &Path) -> Result<Self, TrajectoryError> {
        let file = File::create(path).map_err(|e| TrajectoryError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        Ok(Self::new(file))
    }
}

impl<W: Write> TrajectoryWriter for CsvTrajectoryWriter<W> {
    fn write_frame(&mut self, snapshot: &FrameSnapshot) -> Result<(), TrajectoryError> {
        for record in &snapshot.particles {
            for (attribute, value) in &record.values {
                self.writer.serialize(CsvRow {
                    frame: snapshot.frame,
                    particle: record.particle.data().as_ffi(),
                    name: &record.name,
                    attribute,
                    value: *value,
                })?;
            }
        }
        self.writer.flush().map_err(csv::Error::from)?;
        Ok(())
    }
}
