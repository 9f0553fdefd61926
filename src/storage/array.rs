use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::Rng;
use crate::value::{Value, ValueKind};

/// Physical dtype of a page payload.
///
/// Bool/Int/Float pages hold one fixed-width native array; everything else
/// (strings, dates, nulls, mixtures) is object-encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DType {
    Bool = 1,
    Int = 2,
    Float = 3,
    Object = 4,
}

impl DType {
    /// Manifest type code: 0 for native fixed-width pages, nonzero for
    /// object-encoded ones.
    pub fn manifest_code(&self) -> u8 {
        match self {
            DType::Bool | DType::Int | DType::Float => 0,
            DType::Object => DType::Object as u8,
        }
    }
}

impl TryFrom<u8> for DType {
    type Error = ArrayError;

    fn try_from(tag: u8) -> Result<Self, ArrayError> {
        match tag {
            1 => Ok(DType::Bool),
            2 => Ok(DType::Int),
            3 => Ok(DType::Float),
            4 => Ok(DType::Object),
            other => Err(ArrayError::UnknownDType(other)),
        }
    }
}

#[derive(Error, Debug)]
pub enum ArrayError {
    #[error("not an array file: bad magic")]
    BadMagic,
    #[error("unknown dtype tag {0:#04x}")]
    UnknownDType(u8),
    #[error("array file truncated: expected {expected} bytes of payload, found {found}")]
    Truncated { expected: usize, found: usize },
    #[error("could not encode object page: {0}")]
    Encode(String),
    #[error("could not decode object page: {0}")]
    Decode(String),
}

/// One in-memory page payload: a single array of one dtype.
///
/// Concatenation of arrays with differing dtypes promotes the result to
/// `Object`, which is how mixed-dtype columns come to exist.
#[derive(Debug, Clone, PartialEq)]
pub enum Array {
    Bool(Vec<bool>),
    Int(Vec<i64>),
    Float(Vec<f64>),
    Mixed(Vec<Value>),
}

const MAGIC: [u8; 4] = *b"ARR1";
const HEADER_LEN: usize = MAGIC.len() + 1 + 8;

const BINCODE_CONFIG: bincode::config::Configuration = bincode::config::standard();

impl Array {
    pub fn empty() -> Self {
        Array::Mixed(Vec::new())
    }

    pub fn len(&self) -> usize {
        match self {
            Array::Bool(v) => v.len(),
            Array::Int(v) => v.len(),
            Array::Float(v) => v.len(),
            Array::Mixed(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> DType {
        match self {
            Array::Bool(_) => DType::Bool,
            Array::Int(_) => DType::Int,
            Array::Float(_) => DType::Float,
            Array::Mixed(_) => DType::Object,
        }
    }

    pub fn get(&self, ix: usize) -> Option<Value> {
        match self {
            Array::Bool(v) => v.get(ix).map(|b| Value::Bool(*b)),
            Array::Int(v) => v.get(ix).map(|i| Value::Int(*i)),
            Array::Float(v) => v.get(ix).map(|f| Value::Float(*f)),
            Array::Mixed(v) => v.get(ix).cloned(),
        }
    }

    /// Build an array from values, downcasting to a native dtype when every
    /// value shares one.
    pub fn from_values(values: Vec<Value>) -> Self {
        let mut kind: Option<ValueKind> = None;
        for v in &values {
            match (kind, v.kind()) {
                (None, k) => kind = Some(k),
                (Some(a), k) if a == k => {}
                _ => return Array::Mixed(values),
            }
        }
        match kind {
            Some(ValueKind::Bool) => Array::Bool(
                values
                    .into_iter()
                    .map(|v| match v {
                        Value::Bool(b) => b,
                        _ => unreachable!(),
                    })
                    .collect(),
            ),
            Some(ValueKind::Int) => Array::Int(
                values
                    .into_iter()
                    .map(|v| match v {
                        Value::Int(i) => i,
                        _ => unreachable!(),
                    })
                    .collect(),
            ),
            Some(ValueKind::Float) => Array::Float(
                values
                    .into_iter()
                    .map(|v| match v {
                        Value::Float(f) => f,
                        _ => unreachable!(),
                    })
                    .collect(),
            ),
            _ => Array::Mixed(values),
        }
    }

    pub fn into_values(self) -> Vec<Value> {
        match self {
            Array::Bool(v) => v.into_iter().map(Value::Bool).collect(),
            Array::Int(v) => v.into_iter().map(Value::Int).collect(),
            Array::Float(v) => v.into_iter().map(Value::Float).collect(),
            Array::Mixed(v) => v,
        }
    }

    pub fn values(&self) -> Vec<Value> {
        self.clone().into_values()
    }

    /// Contiguous sub-array `[a, b)`.
    pub fn take_range(&self, a: usize, b: usize) -> Array {
        match self {
            Array::Bool(v) => Array::Bool(v[a..b].to_vec()),
            Array::Int(v) => Array::Int(v[a..b].to_vec()),
            Array::Float(v) => Array::Float(v[a..b].to_vec()),
            Array::Mixed(v) => Array::Mixed(v[a..b].to_vec()),
        }
    }

    /// Gather the local indices of an ascending progression.
    pub fn take_progression(&self, rng: &Rng) -> Array {
        match self {
            Array::Bool(v) => Array::Bool(rng.iter().map(|i| v[i as usize]).collect()),
            Array::Int(v) => Array::Int(rng.iter().map(|i| v[i as usize]).collect()),
            Array::Float(v) => Array::Float(rng.iter().map(|i| v[i as usize]).collect()),
            Array::Mixed(v) => Array::Mixed(rng.iter().map(|i| v[i as usize].clone()).collect()),
        }
    }

    pub fn reverse(&mut self) {
        match self {
            Array::Bool(v) => v.reverse(),
            Array::Int(v) => v.reverse(),
            Array::Float(v) => v.reverse(),
            Array::Mixed(v) => v.reverse(),
        }
    }

    /// Concatenate segments in order; mismatched dtypes promote the result
    /// to the object dtype.
    pub fn concat(parts: Vec<Array>) -> Array {
        let mut parts: Vec<Array> = parts.into_iter().filter(|p| !p.is_empty()).collect();
        if parts.is_empty() {
            return Array::empty();
        }
        if parts.len() == 1 {
            return parts.remove(0);
        }
        let dtype = parts[0].dtype();
        if parts.iter().all(|p| p.dtype() == dtype) {
            match dtype {
                DType::Bool => Array::Bool(
                    parts
                        .into_iter()
                        .flat_map(|p| match p {
                            Array::Bool(v) => v,
                            _ => unreachable!(),
                        })
                        .collect(),
                ),
                DType::Int => Array::Int(
                    parts
                        .into_iter()
                        .flat_map(|p| match p {
                            Array::Int(v) => v,
                            _ => unreachable!(),
                        })
                        .collect(),
                ),
                DType::Float => Array::Float(
                    parts
                        .into_iter()
                        .flat_map(|p| match p {
                            Array::Float(v) => v,
                            _ => unreachable!(),
                        })
                        .collect(),
                ),
                DType::Object => Array::Mixed(
                    parts
                        .into_iter()
                        .flat_map(|p| match p {
                            Array::Mixed(v) => v,
                            _ => unreachable!(),
                        })
                        .collect(),
                ),
            }
        } else {
            Array::Mixed(parts.into_iter().flat_map(Array::into_values).collect())
        }
    }

    /// Occurrence count per value kind; the join type check runs on this.
    pub fn kind_counts(&self) -> Vec<(ValueKind, usize)> {
        match self {
            Array::Bool(v) => vec![(ValueKind::Bool, v.len())],
            Array::Int(v) => vec![(ValueKind::Int, v.len())],
            Array::Float(v) => vec![(ValueKind::Float, v.len())],
            Array::Mixed(v) => {
                let mut counts: Vec<(ValueKind, usize)> = Vec::new();
                for value in v {
                    let kind = value.kind();
                    match counts.iter_mut().find(|(k, _)| *k == kind) {
                        Some((_, n)) => *n += 1,
                        None => counts.push((kind, 1)),
                    }
                }
                counts
            }
        }
    }

    /// Elementwise value equality; `Int` and `Float` arrays cross-compare
    /// numerically like individual values do.
    pub fn values_eq(&self, other: &Array) -> bool {
        if self.len() != other.len() {
            return false;
        }
        match (self, other) {
            (Array::Bool(a), Array::Bool(b)) => a == b,
            (Array::Int(a), Array::Int(b)) => a == b,
            (a, b) => (0..a.len()).all(|i| a.get(i) == b.get(i)),
        }
    }

    /// Serialize to the self-describing page file format: magic, dtype tag,
    /// element count, little-endian elements. Object pages carry a bincode
    /// payload instead of raw elements.
    pub fn encode(&self) -> Result<Vec<u8>, ArrayError> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.len() * 8);
        buf.extend_from_slice(&MAGIC);
        buf.push(self.dtype() as u8);
        buf.extend_from_slice(&(self.len() as u64).to_le_bytes());
        match self {
            Array::Bool(v) => buf.extend(v.iter().map(|b| *b as u8)),
            Array::Int(v) => {
                for i in v {
                    buf.extend_from_slice(&i.to_le_bytes());
                }
            }
            Array::Float(v) => {
                for f in v {
                    buf.extend_from_slice(&f.to_le_bytes());
                }
            }
            Array::Mixed(v) => {
                let payload = bincode::serde::encode_to_vec(v, BINCODE_CONFIG)
                    .map_err(|err| ArrayError::Encode(err.to_string()))?;
                buf.extend_from_slice(&payload);
            }
        }
        Ok(buf)
    }

    /// Header-only peek: dtype and element count, without decoding the
    /// payload. Archive loading validates manifests with this.
    pub fn decode_header(bytes: &[u8]) -> Result<(DType, usize), ArrayError> {
        if bytes.len() < HEADER_LEN {
            return Err(ArrayError::Truncated { expected: HEADER_LEN, found: bytes.len() });
        }
        if bytes[..MAGIC.len()] != MAGIC {
            return Err(ArrayError::BadMagic);
        }
        let dtype = DType::try_from(bytes[MAGIC.len()])?;
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&bytes[MAGIC.len() + 1..HEADER_LEN]);
        Ok((dtype, u64::from_le_bytes(len_bytes) as usize))
    }

    pub fn decode(bytes: &[u8]) -> Result<Array, ArrayError> {
        let (dtype, len) = Self::decode_header(bytes)?;
        let payload = &bytes[HEADER_LEN..];
        let need = |width: usize| -> Result<(), ArrayError> {
            if payload.len() < len * width {
                Err(ArrayError::Truncated { expected: len * width, found: payload.len() })
            } else {
                Ok(())
            }
        };
        match dtype {
            DType::Bool => {
                need(1)?;
                Ok(Array::Bool(payload[..len].iter().map(|b| *b != 0).collect()))
            }
            DType::Int => {
                need(8)?;
                Ok(Array::Int(
                    payload[..len * 8]
                        .chunks_exact(8)
                        .map(|c| {
                            let mut b = [0u8; 8];
                            b.copy_from_slice(c);
                            i64::from_le_bytes(b)
                        })
                        .collect(),
                ))
            }
            DType::Float => {
                need(8)?;
                Ok(Array::Float(
                    payload[..len * 8]
                        .chunks_exact(8)
                        .map(|c| {
                            let mut b = [0u8; 8];
                            b.copy_from_slice(c);
                            f64::from_le_bytes(b)
                        })
                        .collect(),
                ))
            }
            DType::Object => {
                let (values, _): (Vec<Value>, usize) =
                    bincode::serde::decode_from_slice(payload, BINCODE_CONFIG)
                        .map_err(|err| ArrayError::Decode(err.to_string()))?;
                if values.len() != len {
                    return Err(ArrayError::Decode(format!(
                        "object page header says {} values, payload has {}",
                        len,
                        values.len()
                    )));
                }
                Ok(Array::Mixed(values))
            }
        }
    }
}

impl From<Vec<bool>> for Array {
    fn from(v: Vec<bool>) -> Self {
        Array::Bool(v)
    }
}

impl From<Vec<i64>> for Array {
    fn from(v: Vec<i64>) -> Self {
        Array::Int(v)
    }
}

impl From<Vec<f64>> for Array {
    fn from(v: Vec<f64>) -> Self {
        Array::Float(v)
    }
}

impl From<Vec<Value>> for Array {
    fn from(v: Vec<Value>) -> Self {
        Array::from_values(v)
    }
}

impl From<Vec<&str>> for Array {
    fn from(v: Vec<&str>) -> Self {
        Array::Mixed(v.into_iter().map(Value::from).collect())
    }
}

impl From<Vec<String>> for Array {
    fn from(v: Vec<String>) -> Self {
        Array::Mixed(v.into_iter().map(Value::from).collect())
    }
}
