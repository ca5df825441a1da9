//! Field encoding.
//!
//! The binary GRIB codec lives outside this crate and plugs in through
//! [`FieldEncoder`]. [`FramedEncoder`] is the built-in encoder: it writes a
//! self-describing frame so a pipeline can run end-to-end without a codec.
//!
//! Frame layout:
//!
//! ```text
//! +-------+---------+---------------+-------------+-------------------+
//! | FFRM  | version | header length | JSON header | f32 LE values ... |
//! | 4 B   | 1 B     | u32 BE        |             |                   |
//! +-------+---------+---------------+-------------+-------------------+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{OutputError, Result};
use crate::field::FieldArray;
use crate::metadata::FieldMetadata;
use crate::plan::EncodeFormat;

const FRAME_MAGIC: &[u8; 4] = b"FFRM";
const FRAME_VERSION: u8 = 1;

/// Parameters of an Encode stage.
#[derive(Debug, Clone, Copy)]
pub struct EncodeSpec<'a> {
    pub template: &'a Path,
    pub format: EncodeFormat,
    pub grid: Option<&'a str>,
}

/// An encoded field ready for sinks.
#[derive(Debug, Clone)]
pub struct EncodedRecord {
    pub metadata: FieldMetadata,
    pub bytes: Bytes,
}

impl EncodedRecord {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Encodes one field with its metadata.
pub trait FieldEncoder: Send + Sync {
    fn encode(
        &self,
        spec: &EncodeSpec<'_>,
        metadata: &FieldMetadata,
        field: &FieldArray,
    ) -> Result<EncodedRecord>;
}

/// Header of a [`FramedEncoder`] frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameHeader {
    pub template: PathBuf,
    pub format: EncodeFormat,
    #[serde(default)]
    pub grid: Option<String>,
    pub shape: Vec<usize>,
    pub metadata: FieldMetadata,
}

/// Built-in framing encoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct FramedEncoder;

impl FramedEncoder {
    /// Read the header of a frame.
    pub fn read_header(frame: &[u8]) -> Result<FrameHeader> {
        let mut buf = frame;
        if buf.remaining() < 9 || &buf[..4] != FRAME_MAGIC {
            return Err(OutputError::encode("not a field frame"));
        }
        buf.advance(4);

        let version = buf.get_u8();
        if version != FRAME_VERSION {
            return Err(OutputError::encode(format!(
                "unsupported frame version {}",
                version
            )));
        }

        let header_len = buf.get_u32() as usize;
        if buf.remaining() < header_len {
            return Err(OutputError::encode("truncated frame header"));
        }

        Ok(serde_json::from_slice(&buf[..header_len])?)
    }
}

impl FieldEncoder for FramedEncoder {
    fn encode(
        &self,
        spec: &EncodeSpec<'_>,
        metadata: &FieldMetadata,
        field: &FieldArray,
    ) -> Result<EncodedRecord> {
        let header = FrameHeader {
            template: spec.template.to_path_buf(),
            format: spec.format,
            grid: spec.grid.map(str::to_string),
            shape: field.shape().to_vec(),
            metadata: metadata.clone(),
        };
        let header = serde_json::to_vec(&header)?;
        let header_len = u32::try_from(header.len())
            .map_err(|_| OutputError::encode("frame header too large"))?;

        let mut buf = BytesMut::with_capacity(9 + header.len() + field.values().len() * 4);
        buf.put_slice(FRAME_MAGIC);
        buf.put_u8(FRAME_VERSION);
        buf.put_u32(header_len);
        buf.put_slice(&header);
        for value in field.values() {
            buf.put_f32_le(*value);
        }

        Ok(EncodedRecord {
            metadata: metadata.clone(),
            bytes: buf.freeze(),
        })
    }
}
