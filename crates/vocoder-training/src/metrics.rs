use crate::error::{TrainingError, TrainingResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricValue {
    Scalar { value: f32 },
    Audio { path: Option<PathBuf>, sample_rate: u32, num_samples: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub wall_time: DateTime<Utc>,
    pub step: u64,
    pub tag: String,
    #[serde(flatten)]
    pub value: MetricValue,
}

impl MetricRecord {
    #[must_use]
    pub fn scalar(&self) -> Option<f32> {
        match self.value {
            MetricValue::Scalar { value } => Some(value),
            MetricValue::Audio { .. } => None,
        }
    }
}

/// Append-only destination for scalar and audio records. Never read back by training.
pub trait MetricsSink {
    fn add_scalar(&mut self, tag: &str, value: f32, step: u64) -> TrainingResult<()>;

    fn add_audio(&mut self, tag: &str, samples: &[f32], sample_rate: u32, step: u64) -> TrainingResult<()>;

    fn flush(&mut self) -> TrainingResult<()> {
        Ok(())
    }
}

/// Writes one JSON line per record to `<log_dir>/events.jsonl` and audio
/// clips as float WAV files under `<log_dir>/audio/`.
pub struct EventFileSink {
    log_dir: PathBuf,
    events: BufWriter<File>,
}

impl EventFileSink {
    pub const EVENTS_FILE: &'static str = "events.jsonl";
    pub const AUDIO_DIR: &'static str = "audio";

    pub fn open(log_dir: &Path) -> TrainingResult<Self> {
        std::fs::create_dir_all(log_dir.join(Self::AUDIO_DIR))?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join(Self::EVENTS_FILE))?;
        Ok(Self { log_dir: log_dir.to_path_buf(), events: BufWriter::new(file) })
    }

    fn append(&mut self, record: &MetricRecord) -> TrainingResult<()> {
        serde_json::to_writer(&mut self.events, record)?;
        self.events.write_all(b"\n")?;
        Ok(())
    }

    fn audio_path(&self, tag: &str, step: u64) -> PathBuf {
        let name: String = tag
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.log_dir.join(Self::AUDIO_DIR).join(format!("{step:08}_{name}.wav"))
    }
}

impl MetricsSink for EventFileSink {
    fn add_scalar(&mut self, tag: &str, value: f32, step: u64) -> TrainingResult<()> {
        self.append(&MetricRecord {
            wall_time: Utc::now(),
            step,
            tag: tag.to_string(),
            value: MetricValue::Scalar { value },
        })
    }

    fn add_audio(&mut self, tag: &str, samples: &[f32], sample_rate: u32, step: u64) -> TrainingResult<()> {
        let path = self.audio_path(tag, step);
        write_wav(&path, samples, sample_rate)?;
        self.append(&MetricRecord {
            wall_time: Utc::now(),
            step,
            tag: tag.to_string(),
            value: MetricValue::Audio { path: Some(path), sample_rate, num_samples: samples.len() },
        })
    }

    fn flush(&mut self) -> TrainingResult<()> {
        self.events.flush()?;
        Ok(())
    }
}

impl Drop for EventFileSink {
    fn drop(&mut self) {
        let _ = self.events.flush();
    }
}

fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> TrainingResult<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let wav_err = |e: hound::Error| TrainingError::Other(anyhow::anyhow!("failed to write {}: {e}", path.display()));

    let mut writer = hound::WavWriter::create(path, spec).map_err(wav_err)?;
    for &sample in samples {
        writer.write_sample(sample).map_err(wav_err)?;
    }
    writer.finalize().map_err(wav_err)?;
    Ok(())
}

/// Keeps every record in memory, in emission order.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub records: Vec<MetricRecord>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tags(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.tag.as_str()).collect()
    }

    pub fn scalars(&self, tag: &str) -> Vec<(u64, f32)> {
        self.records
            .iter()
            .filter(|r| r.tag == tag)
            .filter_map(|r| r.scalar().map(|v| (r.step, v)))
            .collect()
    }
}

impl MetricsSink for MemorySink {
    fn add_scalar(&mut self, tag: &str, value: f32, step: u64) -> TrainingResult<()> {
        self.records.push(MetricRecord {
            wall_time: Utc::now(),
            step,
            tag: tag.to_string(),
            value: MetricValue::Scalar { value },
        });
        Ok(())
    }

    fn add_audio(&mut self, tag: &str, samples: &[f32], sample_rate: u32, step: u64) -> TrainingResult<()> {
        self.records.push(MetricRecord {
            wall_time: Utc::now(),
            step,
            tag: tag.to_string(),
            value: MetricValue::Audio { path: None, sample_rate, num_samples: samples.len() },
        });
        Ok(())
    }
}
