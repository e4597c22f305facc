//! Reader for serialized ONNX `TensorProto` messages, as shipped in model-zoo
//! `test_data_set_*` directories.
//!
//! Only the fields needed to rebuild a dense tensor are decoded; everything
//! else is skipped by wire type.

use anyhow::{Context, Result, bail, ensure};
use candle_core::{Device, Tensor};

const FLOAT: i32 = 1;
const INT64: i32 = 7;
const DOUBLE: i32 = 11;

const FIELD_DIMS: u64 = 1;
const FIELD_DATA_TYPE: u64 = 2;
const FIELD_FLOAT_DATA: u64 = 4;
const FIELD_INT64_DATA: u64 = 7;
const FIELD_RAW_DATA: u64 = 9;
const FIELD_DOUBLE_DATA: u64 = 10;

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LEN: u8 = 2;
const WIRE_FIXED32: u8 = 5;

#[derive(Default)]
struct TensorProto<'a> {
    dims: Vec<i64>,
    data_type: i32,
    float_data: Vec<f32>,
    int64_data: Vec<i64>,
    double_data: Vec<f64>,
    raw_data: &'a [u8],
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn varint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            let Some(&byte) = self.buf.get(self.pos) else {
                bail!("truncated varint");
            };
            self.pos += 1;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        bail!("varint too long")
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.buf.len());
        let Some(end) = end else {
            bail!("field runs past end of message");
        };
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn len_delimited(&mut self) -> Result<&'a [u8]> {
        let len = self.varint()? as usize;
        self.take(len)
    }

    fn fixed32(&mut self) -> Result<[u8; 4]> {
        Ok(self.take(4)?.try_into()?)
    }

    fn fixed64(&mut self) -> Result<[u8; 8]> {
        Ok(self.take(8)?.try_into()?)
    }

    fn skip(&mut self, wire_type: u8) -> Result<()> {
        match wire_type {
            WIRE_VARINT => {
                self.varint()?;
            }
            WIRE_FIXED64 => {
                self.take(8)?;
            }
            WIRE_LEN => {
                self.len_delimited()?;
            }
            WIRE_FIXED32 => {
                self.take(4)?;
            }
            other => bail!("unsupported wire type {other}"),
        }
        Ok(())
    }
}

fn parse(bytes: &[u8]) -> Result<TensorProto<'_>> {
    let mut proto = TensorProto::default();
    let mut reader = Reader::new(bytes);

    while !reader.is_empty() {
        let key = reader.varint()?;
        let (field, wire_type) = (key >> 3, (key & 0x7) as u8);

        match (field, wire_type) {
            (FIELD_DIMS, WIRE_VARINT) => proto.dims.push(reader.varint()? as i64),
            (FIELD_DIMS, WIRE_LEN) => {
                let mut packed = Reader::new(reader.len_delimited()?);
                while !packed.is_empty() {
                    proto.dims.push(packed.varint()? as i64);
                }
            }
            (FIELD_DATA_TYPE, WIRE_VARINT) => proto.data_type = reader.varint()? as i32,
            (FIELD_FLOAT_DATA, WIRE_FIXED32) => {
                proto.float_data.push(f32::from_le_bytes(reader.fixed32()?))
            }
            (FIELD_FLOAT_DATA, WIRE_LEN) => {
                let mut packed = Reader::new(reader.len_delimited()?);
                while !packed.is_empty() {
                    proto.float_data.push(f32::from_le_bytes(packed.fixed32()?));
                }
            }
            (FIELD_INT64_DATA, WIRE_VARINT) => proto.int64_data.push(reader.varint()? as i64),
            (FIELD_INT64_DATA, WIRE_LEN) => {
                let mut packed = Reader::new(reader.len_delimited()?);
                while !packed.is_empty() {
                    proto.int64_data.push(packed.varint()? as i64);
                }
            }
            (FIELD_DOUBLE_DATA, WIRE_FIXED64) => {
                proto.double_data.push(f64::from_le_bytes(reader.fixed64()?))
            }
            (FIELD_DOUBLE_DATA, WIRE_LEN) => {
                let mut packed = Reader::new(reader.len_delimited()?);
                while !packed.is_empty() {
                    proto.double_data.push(f64::from_le_bytes(packed.fixed64()?));
                }
            }
            (FIELD_RAW_DATA, WIRE_LEN) => proto.raw_data = reader.len_delimited()?,
            (_, wire_type) => reader.skip(wire_type)?,
        }
    }

    Ok(proto)
}

/// Decode a serialized `TensorProto` into a CPU tensor.
pub fn decode(bytes: &[u8]) -> Result<Tensor> {
    let proto = parse(bytes)?;

    let shape = proto
        .dims
        .iter()
        .map(|&d| usize::try_from(d))
        .collect::<Result<Vec<usize>, _>>()?;
    let count = shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .context("tensor element count overflows")?;
    let device = &Device::Cpu;

    let tensor = match proto.data_type {
        FLOAT => {
            let data = if proto.raw_data.is_empty() {
                proto.float_data
            } else {
                from_raw(proto.raw_data, f32::from_le_bytes)?
            };
            ensure!(data.len() == count, "expected {count} floats, found {}", data.len());
            Tensor::from_vec(data, shape, device)?
        }
        INT64 => {
            let data = if proto.raw_data.is_empty() {
                proto.int64_data
            } else {
                from_raw(proto.raw_data, i64::from_le_bytes)?
            };
            ensure!(data.len() == count, "expected {count} int64s, found {}", data.len());
            Tensor::from_vec(data, shape, device)?
        }
        DOUBLE => {
            let data = if proto.raw_data.is_empty() {
                proto.double_data
            } else {
                from_raw(proto.raw_data, f64::from_le_bytes)?
            };
            ensure!(data.len() == count, "expected {count} doubles, found {}", data.len());
            Tensor::from_vec(data, shape, device)?
        }
        other => bail!("unsupported tensor data type {other}"),
    };
    Ok(tensor)
}

fn from_raw<T, F, const N: usize>(raw: &[u8], convert: F) -> Result<Vec<T>>
where
    F: Fn([u8; N]) -> T,
{
    ensure!(
        raw.len() % N == 0,
        "raw_data length {} is not a multiple of {N}",
        raw.len()
    );
    Ok(raw
        .chunks_exact(N)
        .map(|chunk| {
            let mut bytes = [0u8; N];
            bytes.copy_from_slice(chunk);
            convert(bytes)
        })
        .collect())
}
