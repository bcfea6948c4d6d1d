//! Minimal `.npy` (format 1.0) encoding
//!
//! Only what the archive needs: little-endian primitive and packed structured
//! dtypes, C order.

use std::io::Write;

use crate::error::{DispatcherError, Result};

const MAGIC: &[u8; 6] = b"\x93NUMPY";
/// Magic + version + header length field
const PREAMBLE_LEN: usize = 10;
const ALIGN: usize = 64;

pub const DESCR_F8: &str = "<f8";
pub const DESCR_F4: &str = "<f4";
pub const DESCR_U1: &str = "|u1";
/// Packed DVS event record, itemsize 13
pub const DESCR_EVENT: &str = "[('x', '<u2'), ('y', '<u2'), ('t', '<i8'), ('pol', '|b1')]";

/// Bytes per element of the dtypes above
pub fn itemsize(descr: &str) -> Option<usize> {
    match descr {
        DESCR_F8 => Some(8),
        DESCR_F4 => Some(4),
        DESCR_U1 => Some(1),
        DESCR_EVENT => Some(13),
        _ => None,
    }
}

fn shape_literal(shape: &[usize]) -> String {
    match shape {
        [n] => format!("({n},)"),
        dims => format!(
            "({})",
            dims.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")
        ),
    }
}

/// Header bytes (preamble + dict + padding) for one array
pub fn header(descr: &str, shape: &[usize]) -> Vec<u8> {
    // structured dtypes are written as a list literal, primitives as a string
    let descr = if descr.starts_with('[') {
        descr.to_string()
    } else {
        format!("'{descr}'")
    };
    let dict = format!(
        "{{'descr': {descr}, 'fortran_order': False, 'shape': {}, }}",
        shape_literal(shape)
    );

    let unpadded = PREAMBLE_LEN + dict.len() + 1;
    let padding = (ALIGN - unpadded % ALIGN) % ALIGN;
    let header_len = dict.len() + padding + 1;

    let mut out = Vec::with_capacity(PREAMBLE_LEN + header_len);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header_len as u16).to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
    out.extend(std::iter::repeat_n(b' ', padding));
    out.push(b'\n');
    out
}

/// Write one array; `data` must hold exactly `product(shape)` elements
pub fn write_array<W: Write>(w: &mut W, descr: &str, shape: &[usize], data: &[u8]) -> Result<()> {
    let itemsize = itemsize(descr)
        .ok_or_else(|| DispatcherError::format(format!("unsupported dtype {descr}")))?;
    let expected = shape.iter().product::<usize>() * itemsize;
    if data.len() != expected {
        return Err(DispatcherError::format(format!(
            "shape {shape:?} of {descr} needs {expected} bytes, got {}",
            data.len()
        )));
    }
    w.write_all(&header(descr, shape))?;
    w.write_all(data)?;
    Ok(())
}

/// A parsed `.npy` member
#[derive(Debug, Clone, PartialEq)]
pub struct NpyArray {
    pub descr: String,
    pub shape: Vec<usize>,
    pub data: Vec<u8>,
}

impl NpyArray {
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Interpret the data as `<f8`
    pub fn to_f64(&self) -> Result<Vec<f64>> {
        if self.descr != DESCR_F8 {
            return Err(DispatcherError::format(format!(
                "expected {DESCR_F8}, found {}",
                self.descr
            )));
        }
        Ok(self
            .data
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect())
    }
}

fn field<'a>(dict: &'a str, key: &str) -> Result<&'a str> {
    let pattern = format!("'{key}': ");
    let start = dict
        .find(&pattern)
        .ok_or_else(|| DispatcherError::format(format!("npy header lacks '{key}'")))?
        + pattern.len();
    Ok(&dict[start..])
}

fn parse_shape(rest: &str) -> Result<Vec<usize>> {
    let close = rest
        .find(')')
        .ok_or_else(|| DispatcherError::format("unterminated shape tuple"))?;
    rest[..close]
        .trim_start_matches('(')
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse()
                .map_err(|_| DispatcherError::format(format!("bad shape dimension '{s}'")))
        })
        .collect()
}

fn parse_descr(rest: &str) -> Result<String> {
    if rest.starts_with('[') {
        let close = rest
            .find(']')
            .ok_or_else(|| DispatcherError::format("unterminated descr list"))?;
        return Ok(rest[..=close].to_string());
    }
    let inner = rest
        .strip_prefix('\'')
        .and_then(|r| r.split('\'').next())
        .ok_or_else(|| DispatcherError::format("bad descr literal"))?;
    Ok(inner.to_string())
}

pub fn parse(bytes: &[u8]) -> Result<NpyArray> {
    if bytes.len() < PREAMBLE_LEN || &bytes[..6] != MAGIC {
        return Err(DispatcherError::format("missing npy magic"));
    }
    if bytes[6] != 1 {
        return Err(DispatcherError::format(format!(
            "unsupported npy version {}.{}",
            bytes[6], bytes[7]
        )));
    }
    let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
    let data_start = PREAMBLE_LEN + header_len;
    let dict = bytes
        .get(PREAMBLE_LEN..data_start)
        .and_then(|h| std::str::from_utf8(h).ok())
        .ok_or_else(|| DispatcherError::format("truncated npy header"))?;

    Ok(NpyArray {
        descr: parse_descr(field(dict, "descr")?)?,
        shape: parse_shape(field(dict, "shape")?)?,
        data: bytes[data_start..].to_vec(),
    })
}
