//! Estimator output file.
//!
//! Layout: the 8-byte magic `AFQMCEST`, then frames each made of a
//! little-endian `u64` length and a bincode payload. The first frame carries
//! the metadata (configuration echo, record schema, worker count); every later
//! frame is one written block.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use super::EstimatorSchema;
use crate::error::{AfqmcError, Result};

pub const MAGIC: &[u8; 8] = b"AFQMCEST";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputOptions {
    pub basename: String,
    pub extension: String,
    /// Reuse index 0 even if the file exists
    pub overwrite: bool,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self { basename: "estimates".to_string(), extension: "bin".to_string(), overwrite: false }
    }
}

impl OutputOptions {
    /// `<basename>.<index>.<extension>` with the first index not taken yet.
    pub fn resolve_path(&self) -> PathBuf {
        let path_for = |index: usize| PathBuf::from(format!("{}.{}.{}", self.basename, index, self.extension));
        let mut index = 0;
        let mut path = path_for(index);
        while !self.overwrite && path.exists() {
            index += 1;
            path = path_for(index);
        }
        path
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// YAML echo of the run configuration
    pub config: String,
    pub schema: EstimatorSchema,
    pub nworkers: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub block: usize,
    pub values: Vec<Complex64>,
}

#[derive(Debug, Serialize, Deserialize)]
enum Frame {
    Metadata(Metadata),
    Block(BlockRecord),
}

#[derive(Debug)]
pub struct EstimatorWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl EstimatorWriter {
    pub fn create(path: &Path, metadata: Metadata) -> Result<Self> {
        let file = OpenOptions::new().write(true).create(true).truncate(true).open(path)?;
        let mut writer = Self { path: path.to_path_buf(), out: BufWriter::new(file) };
        writer.out.write_all(MAGIC)?;
        writer.write_frame(&Frame::Metadata(metadata))?;
        Ok(writer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, record: BlockRecord) -> Result<()> {
        self.write_frame(&Frame::Block(record))
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let payload = bincode::serialize(frame)?;
        self.out.write_all(&(payload.len() as u64).to_le_bytes())?;
        self.out.write_all(&payload)?;
        self.out.flush()?;
        Ok(())
    }
}

/// Reader for a finished (or still growing) output file.
#[derive(Debug, Clone)]
pub struct EstimatorFile {
    metadata: Metadata,
    blocks: Vec<BlockRecord>,
}

impl EstimatorFile {
    pub fn open(path: &Path) -> Result<Self> {
        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;
        if bytes.len() < MAGIC.len() || &bytes[..MAGIC.len()] != MAGIC {
            return Err(AfqmcError::MalformedOutput(format!("{}: bad magic", path.display())));
        }
        let mut cursor = MAGIC.len();
        let mut frames = Vec::new();
        while cursor < bytes.len() {
            if bytes.len() - cursor < 8 {
                return Err(AfqmcError::MalformedOutput("truncated frame header".to_string()));
            }
            let mut header = [0u8; 8];
            header.copy_from_slice(&bytes[cursor..cursor + 8]);
            let len = u64::from_le_bytes(header) as usize;
            cursor += 8;
            if bytes.len() - cursor < len {
                return Err(AfqmcError::MalformedOutput("truncated frame".to_string()));
            }
            frames.push(bincode::deserialize::<Frame>(&bytes[cursor..cursor + len])?);
            cursor += len;
        }

        let mut frames = frames.into_iter();
        let metadata = match frames.next() {
            Some(Frame::Metadata(m)) => m,
            _ => return Err(AfqmcError::MalformedOutput("first frame is not metadata".to_string())),
        };
        let mut blocks = Vec::new();
        for frame in frames {
            match frame {
                Frame::Block(b) if b.values.len() == metadata.schema.len() => blocks.push(b),
                Frame::Block(b) => {
                    return Err(AfqmcError::MalformedOutput(format!(
                        "block {} has {} values, schema needs {}",
                        b.block,
                        b.values.len(),
                        metadata.schema.len()
                    )))
                }
                Frame::Metadata(_) => return Err(AfqmcError::MalformedOutput("repeated metadata".to_string())),
            }
        }
        Ok(Self { metadata, blocks })
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn schema(&self) -> &EstimatorSchema {
        &self.metadata.schema
    }

    pub fn blocks(&self) -> &[BlockRecord] {
        &self.blocks
    }

    /// Values of field `name` in every block.
    pub fn field(&self, name: &str) -> Result<Vec<&[Complex64]>> {
        let spec = self
            .metadata
            .schema
            .field(name)
            .ok_or_else(|| AfqmcError::MalformedOutput(format!("no field {}", name)))?;
        Ok(self.blocks.iter().map(|b| &b.values[spec.range()]).collect())
    }

    /// First element of field `name` in every block.
    pub fn scalar(&self, name: &str) -> Result<Vec<Complex64>> {
        Ok(self.field(name)?.into_iter().filter_map(|v| v.first().copied()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("afqmc-output-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_blocks_read_back_by_field() {
        let dir = scratch("fields");
        let path = dir.join("estimates.0.bin");
        let schema = EstimatorSchema::new([("energy/ETotal", vec![1]), ("one_rdm/OneRdm", vec![2, 1, 1])]);
        let metadata = Metadata { config: "qmc: {}".to_string(), schema, nworkers: 2 };
        let mut writer = EstimatorWriter::create(&path, metadata.clone()).unwrap();
        for block in 0..3 {
            let x = block as f64;
            let values = vec![Complex64::new(x, 0.0), Complex64::new(x, 1.0), Complex64::new(-x, 0.5)];
            writer.append(BlockRecord { block, values }).unwrap();
        }
        let file = EstimatorFile::open(&path).unwrap();
        assert_eq!(file.metadata(), &metadata);
        assert_eq!(file.blocks().len(), 3);
        let e = file.scalar("energy/ETotal").unwrap();
        assert_eq!(e, vec![Complex64::new(0.0, 0.0), Complex64::new(1.0, 0.0), Complex64::new(2.0, 0.0)]);
        let rdm = file.field("one_rdm/OneRdm").unwrap();
        assert_eq!(rdm[2], &[Complex64::new(2.0, 1.0), Complex64::new(-2.0, 0.5)][..]);
        assert!(file.field("energy/EHybrid").is_err());
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_index_skips_existing_files() {
        let dir = scratch("index");
        let options = OutputOptions {
            basename: dir.join("estimates").to_string_lossy().into_owned(),
            ..OutputOptions::default()
        };
        assert_eq!(options.resolve_path(), dir.join("estimates.0.bin"));
        std::fs::write(dir.join("estimates.0.bin"), b"").unwrap();
        std::fs::write(dir.join("estimates.1.bin"), b"").unwrap();
        assert_eq!(options.resolve_path(), dir.join("estimates.2.bin"));
        let overwrite = OutputOptions { overwrite: true, ..options };
        assert_eq!(overwrite.resolve_path(), dir.join("estimates.0.bin"));
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_rejects_foreign_files() {
        let dir = scratch("magic");
        let path = dir.join("junk.bin");
        std::fs::write(&path, b"NOTMAGIC and more").unwrap();
        assert!(matches!(EstimatorFile::open(&path), Err(AfqmcError::MalformedOutput(_))));
        std::fs::remove_dir_all(dir).unwrap();
    }
}
