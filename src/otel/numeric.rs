//! Lenient numeric decoding
//!
//! OTLP/JSON carries 64-bit integers as decimal strings, and records written
//! by older producers may hold either form. Every numeric field of the wire
//! and storage models goes through these helpers so that a malformed number
//! degrades to zero instead of failing the whole document.

use serde::{Deserialize, Deserializer, Serialize};

/// A number that may have been encoded as a string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Numeric {
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
}

impl Numeric {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Numeric::Int(i) => Some(*i as f64),
            Numeric::UInt(u) => Some(*u as f64),
            Numeric::Float(f) => Some(*f),
            Numeric::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Numeric::Int(i) => u64::try_from(*i).ok(),
            Numeric::UInt(u) => Some(*u),
            Numeric::Float(f) if f.is_finite() && *f >= 0.0 => Some(*f as u64),
            Numeric::Float(_) => None,
            Numeric::Text(s) => {
                let s = s.trim();
                s.parse().ok().or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite() && *f >= 0.0)
                        .map(|f| f as u64)
                })
            }
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Numeric::Int(i) => Some(*i),
            Numeric::UInt(u) => i64::try_from(*u).ok(),
            Numeric::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(*f as i64),
            Numeric::Float(_) => None,
            Numeric::Text(s) => s.trim().parse().ok(),
        }
    }

    /// The enum-name form, when the producer sent a name instead of an ordinal
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Numeric::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

pub fn de_u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    Ok(Option::<Numeric>::deserialize(d)?
        .and_then(|n| n.as_u64())
        .unwrap_or(0))
}

pub fn de_f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    Ok(Option::<Numeric>::deserialize(d)?
        .and_then(|n| n.as_f64())
        .unwrap_or(0.0))
}

pub fn de_opt_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(Option::<Numeric>::deserialize(d)?.and_then(|n| n.as_f64()))
}

pub fn de_vec_u64<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u64>, D::Error> {
    Ok(Option::<Vec<Numeric>>::deserialize(d)?
        .unwrap_or_default()
        .iter()
        .map(|n| n.as_u64().unwrap_or(0))
        .collect())
}

pub fn de_vec_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<f64>, D::Error> {
    Ok(Option::<Vec<Numeric>>::deserialize(d)?
        .unwrap_or_default()
        .iter()
        .map(|n| n.as_f64().unwrap_or(0.0))
        .collect())
}
