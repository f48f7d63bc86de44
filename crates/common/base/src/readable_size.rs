// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Human readable byte sizes for configuration files.
//!
//! Units are binary: `KB`/`KiB` both mean 1024 bytes. Fractional values are
//! accepted (`4.5GiB`) and truncated to whole bytes.

use std::{fmt, str::FromStr};

use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{self, Visitor},
};
use snafu::{OptionExt, Snafu, ensure};

const UNIT: u64 = 1024;

pub const B: u64 = 1;
pub const KIB: u64 = UNIT * B;
pub const MIB: u64 = UNIT * KIB;
pub const GIB: u64 = UNIT * MIB;
pub const TIB: u64 = UNIT * GIB;

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum ParseSizeError {
    #[snafu(display("empty size string"))]
    Empty,

    #[snafu(display("invalid size number in {input:?}"))]
    InvalidNumber { input: String },

    #[snafu(display("unknown size unit {unit:?}"))]
    UnknownUnit { unit: String },

    #[snafu(display("size {input:?} overflows u64"))]
    Overflow { input: String },
}

/// A byte count that (de)serializes as `"512MiB"` style strings.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    derive_more::From,
    derive_more::Into,
)]
pub struct ReadableSize(pub u64);

impl ReadableSize {
    #[must_use]
    pub const fn b(count: u64) -> Self { Self(count) }

    #[must_use]
    pub const fn kb(count: u64) -> Self { Self(count * KIB) }

    #[must_use]
    pub const fn mb(count: u64) -> Self { Self(count * MIB) }

    #[must_use]
    pub const fn gb(count: u64) -> Self { Self(count * GIB) }

    #[must_use]
    pub const fn as_bytes(self) -> u64 { self.0 }
}

impl fmt::Display for ReadableSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let size = self.0;
        if size == 0 {
            write!(f, "0B")
        } else if size % TIB == 0 {
            write!(f, "{}TiB", size / TIB)
        } else if size % GIB == 0 {
            write!(f, "{}GiB", size / GIB)
        } else if size % MIB == 0 {
            write!(f, "{}MiB", size / MIB)
        } else if size % KIB == 0 {
            write!(f, "{}KiB", size / KIB)
        } else {
            write!(f, "{size}B")
        }
    }
}

impl FromStr for ReadableSize {
    type Err = ParseSizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        ensure!(!trimmed.is_empty(), EmptySnafu);

        let split = trimmed
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(trimmed.len());
        let (number, unit) = trimmed.split_at(split);

        let unit_bytes = match unit.trim().to_ascii_uppercase().as_str() {
            "" | "B" => B,
            "K" | "KB" | "KIB" => KIB,
            "M" | "MB" | "MIB" => MIB,
            "G" | "GB" | "GIB" => GIB,
            "T" | "TB" | "TIB" => TIB,
            other => {
                return UnknownUnitSnafu {
                    unit: other.to_string(),
                }
                .fail();
            }
        };

        if let Ok(whole) = number.parse::<u64>() {
            let bytes = whole.checked_mul(unit_bytes).context(OverflowSnafu {
                input: trimmed.to_string(),
            })?;
            return Ok(Self(bytes));
        }

        let value: f64 = number.parse().map_err(|_| ParseSizeError::InvalidNumber {
            input: trimmed.to_string(),
        })?;
        #[allow(clippy::cast_precision_loss)]
        let bytes = value * unit_bytes as f64;
        ensure!(
            bytes.is_finite() && bytes >= 0.0 && bytes < u64::MAX as f64,
            OverflowSnafu {
                input: trimmed.to_string(),
            }
        );
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Ok(Self(bytes as u64))
    }
}

impl Serialize for ReadableSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ReadableSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SizeVisitor;

        impl Visitor<'_> for SizeVisitor {
            type Value = ReadableSize;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a byte count or a size string such as \"512MiB\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(ReadableSize(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                u64::try_from(v)
                    .map(ReadableSize)
                    .map_err(|_| E::custom("size must not be negative"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(SizeVisitor)
    }
}
