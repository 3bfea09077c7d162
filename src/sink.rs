/*!
The columnar record sink behind the analysis transforms.

A [`RecordSchema`] names one group, one dataset and an ordered field list;
it is loaded from a small XML descriptor at start so the field layout can
change without rebuilding. The [`BatchWriter`] buffers feature rows and
flushes them in fixed-size batches, one self-describing columnar file per
batch. The container format of the production archive (HDF5) is not
reproduced here; the writer emits a plain column-major layout that the
downstream converter ingests.
*/

use byteorder::{ByteOrder, LittleEndian};
use log::info;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Magic at the start of every batch file.
pub const BATCH_MAGIC: &[u8; 4] = b"WPC1";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("unreadable schema descriptor: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("bad schema descriptor: {0}")]
    Schema(String),
    #[error("row has {got} values, schema has {expected} fields")]
    Arity { expected: usize, got: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub dtype: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSchema {
    pub group: String,
    pub dataset: String,
    pub fields: Vec<FieldDef>,
}

impl RecordSchema {
    pub fn from_xml_file(path: &Path) -> Result<RecordSchema, SinkError> {
        let text = fs::read_to_string(path)?;
        RecordSchema::from_xml_str(&text)
    }

    /// Parse the descriptor. The expected shape is
    /// `<group name=..><dataset name=..><field name=.. type=../>...`;
    /// anything else in the document is ignored.
    pub fn from_xml_str(text: &str) -> Result<RecordSchema, SinkError> {
        let mut reader = Reader::from_str(text);
        let mut group = None;
        let mut dataset = None;
        let mut fields = Vec::new();
        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(ref e) | Event::Empty(ref e) => match e.name().as_ref() {
                    b"group" => group = attr_value(e, b"name"),
                    b"dataset" => dataset = attr_value(e, b"name"),
                    b"field" => {
                        let name = attr_value(e, b"name")
                            .ok_or_else(|| SinkError::Schema("field without name".into()))?;
                        let dtype = attr_value(e, b"type").unwrap_or_else(|| "float32".into());
                        fields.push(FieldDef { name, dtype });
                    }
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }
        let group = group.ok_or_else(|| SinkError::Schema("missing <group>".into()))?;
        let dataset = dataset.ok_or_else(|| SinkError::Schema("missing <dataset>".into()))?;
        if fields.is_empty() {
            return Err(SinkError::Schema("no <field> entries".into()));
        }
        Ok(RecordSchema {
            group,
            dataset,
            fields,
        })
    }
}

fn attr_value(tag: &BytesStart, key: &[u8]) -> Option<String> {
    tag.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key)
        .and_then(|attr| attr.unescape_value().ok().map(|v| v.into_owned()))
}

/// Buffers rows and writes one columnar file per full batch.
pub struct BatchWriter {
    schema: RecordSchema,
    dir: PathBuf,
    batch_rows: usize,
    rows: Vec<f32>,
    buffered: usize,
    batches_written: u64,
}

impl BatchWriter {
    pub fn new(schema: RecordSchema, dir: &Path, batch_rows: usize) -> Result<BatchWriter, SinkError> {
        fs::create_dir_all(dir)?;
        Ok(BatchWriter {
            schema,
            dir: dir.to_owned(),
            batch_rows: batch_rows.max(1),
            rows: Vec::new(),
            buffered: 0,
            batches_written: 0,
        })
    }

    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    pub fn buffered_rows(&self) -> usize {
        self.buffered
    }

    pub fn batches_written(&self) -> u64 {
        self.batches_written
    }

    /// Queue one row; writes a batch file once `batch_rows` are buffered.
    pub fn push_row(&mut self, row: &[f32]) -> Result<(), SinkError> {
        if row.len() != self.schema.fields.len() {
            return Err(SinkError::Arity {
                expected: self.schema.fields.len(),
                got: row.len(),
            });
        }
        self.rows.extend_from_slice(row);
        self.buffered += 1;
        if self.buffered >= self.batch_rows {
            self.flush()?;
        }
        Ok(())
    }

    /// Write the buffered rows out now, even if the batch is short.
    pub fn flush(&mut self) -> Result<(), SinkError> {
        if self.buffered == 0 {
            return Ok(());
        }
        let path = self.dir.join(format!(
            "{}_{}_{:05}.wpc",
            self.schema.group, self.schema.dataset, self.batches_written
        ));
        let mut file = File::create(&path)?;
        self.write_batch(&mut file)?;
        file.sync_all()?;
        info!(
            "sink: wrote {} rows to {}",
            self.buffered,
            path.display()
        );
        self.rows.clear();
        self.buffered = 0;
        self.batches_written += 1;
        Ok(())
    }

    /// Layout: magic, field count, the field names, the row count, then one
    /// contiguous f32 column per field.
    fn write_batch(&self, out: &mut impl Write) -> Result<(), SinkError> {
        let ncols = self.schema.fields.len();
        out.write_all(BATCH_MAGIC)?;
        out.write_all(&(ncols as u32).to_le_bytes())?;
        for field in &self.schema.fields {
            let name = field.name.as_bytes();
            out.write_all(&(name.len() as u16).to_le_bytes())?;
            out.write_all(name)?;
        }
        out.write_all(&(self.buffered as u64).to_le_bytes())?;
        let mut col = vec![0u8; self.buffered * 4];
        for c in 0..ncols {
            for r in 0..self.buffered {
                LittleEndian::write_f32(&mut col[r * 4..r * 4 + 4], self.rows[r * ncols + c]);
            }
            out.write_all(&col)?;
        }
        Ok(())
    }
}

impl Drop for BatchWriter {
    fn drop(&mut self) {
        // A short final batch still reaches disk on shutdown.
        let _ = self.flush();
    }
}
