//! # Runtime Value Representation
//!
//! `TypedValue` couples a [`DataType`] tag with the value's raw bytes in
//! storage encoding (little-endian integers/floats, zero-padded character
//! arrays). Registers, literals, cursor keys and result rows all carry
//! this representation, so a value read from a page can flow to the result
//! sink without re-encoding.
//!
//! ## Comparison Semantics
//!
//! - Integer vs integer: both widen to `i128` (covers the full `u64` and
//!   `i64` ranges) and compare.
//! - Anything vs float: both compare as `f64`; NaN sorts last.
//! - Character vs character: lexicographic over the NUL-trimmed contents.
//! - `Pair` vs `Pair`: componentwise, first component dominating.
//!
//! Comparing a character value against a numeric one is a type error the
//! semantic pass is expected to prevent; at runtime it reports corruption.

use eyre::{bail, ensure, Result};
use smallvec::SmallVec;
use std::cmp::Ordering;

use super::DataType;

/// A typed scalar: type tag plus raw bytes whose length equals the type's
/// fixed size (except `Pair`, which is self-describing).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedValue {
    ty: DataType,
    bytes: SmallVec<[u8; 16]>,
}

impl TypedValue {
    /// The zero value of `ty`: numeric 0, or an empty (all-NUL) string.
    pub fn zero(ty: DataType) -> TypedValue {
        let size = ty.size().unwrap_or(0);
        TypedValue {
            ty,
            bytes: SmallVec::from_elem(0, size),
        }
    }

    pub fn from_u32(v: u32) -> TypedValue {
        TypedValue {
            ty: DataType::U32,
            bytes: SmallVec::from_slice(&v.to_le_bytes()),
        }
    }

    pub fn from_u64(v: u64) -> TypedValue {
        TypedValue {
            ty: DataType::U64,
            bytes: SmallVec::from_slice(&v.to_le_bytes()),
        }
    }

    pub fn from_i64(v: i64) -> TypedValue {
        TypedValue {
            ty: DataType::I64,
            bytes: SmallVec::from_slice(&v.to_le_bytes()),
        }
    }

    pub fn from_f64(v: f64) -> TypedValue {
        TypedValue {
            ty: DataType::F64,
            bytes: SmallVec::from_slice(&v.to_le_bytes()),
        }
    }

    /// Encodes `v` into an integer or float type, truncating to the
    /// type's width the way a store through that type would.
    pub fn from_int(ty: DataType, v: i128) -> Result<TypedValue> {
        ensure!(ty.is_numeric(), "cannot encode integer as {}", ty.name());
        let mut out = TypedValue::zero(ty);
        match ty {
            DataType::F32 => out.bytes.copy_from_slice(&(v as f32).to_le_bytes()),
            DataType::F64 => out.bytes.copy_from_slice(&(v as f64).to_le_bytes()),
            _ => {
                let le = v.to_le_bytes();
                let w = ty.fixed_size();
                out.bytes.copy_from_slice(&le[..w]);
            }
        }
        Ok(out)
    }

    /// Encodes a string into a fixed-width character type. The content
    /// must leave room for the terminating NUL within the declared width.
    pub fn from_str(ty: DataType, s: &str) -> Result<TypedValue> {
        ensure!(ty.is_char(), "cannot encode string as {}", ty.name());
        let width = ty.fixed_size();
        ensure!(
            s.len() < width,
            "string of {} bytes does not fit {} (needs a NUL)",
            s.len(),
            ty.name()
        );
        let mut out = TypedValue::zero(ty);
        out.bytes[..s.len()].copy_from_slice(s.as_bytes());
        Ok(out)
    }

    /// Wraps raw storage bytes read from a page. `bytes` must be exactly
    /// the type's fixed size.
    pub fn from_bytes(ty: DataType, bytes: &[u8]) -> Result<TypedValue> {
        let size = ty
            .size()
            .ok_or_else(|| eyre::eyre!("{} has no storage form", ty.name()))?;
        ensure!(
            bytes.len() == size,
            "{} value must be {} bytes, got {}",
            ty.name(),
            size,
            bytes.len()
        );
        Ok(TypedValue {
            ty,
            bytes: SmallVec::from_slice(bytes),
        })
    }

    /// Composes two values into a composite `Pair` key, ordered first by
    /// `a` then by `b`. Pairs of pairs are not supported.
    pub fn pair(a: &TypedValue, b: &TypedValue) -> Result<TypedValue> {
        ensure!(
            a.ty != DataType::Pair && b.ty != DataType::Pair,
            "cannot nest composite keys"
        );
        let mut bytes = SmallVec::with_capacity(2 + a.bytes.len() + b.bytes.len());
        bytes.push(a.ty as u8);
        bytes.push(b.ty as u8);
        bytes.extend_from_slice(&a.bytes);
        bytes.extend_from_slice(&b.bytes);
        Ok(TypedValue {
            ty: DataType::Pair,
            bytes,
        })
    }

    /// Splits a `Pair` back into its components.
    pub fn unpair(&self) -> Result<(TypedValue, TypedValue)> {
        ensure!(self.ty == DataType::Pair, "unpack of non-composite value");
        ensure!(self.bytes.len() >= 2, "truncated composite value");
        let ta = DataType::from_byte(self.bytes[0])
            .ok_or_else(|| eyre::eyre!("bad composite component tag {}", self.bytes[0]))?;
        let tb = DataType::from_byte(self.bytes[1])
            .ok_or_else(|| eyre::eyre!("bad composite component tag {}", self.bytes[1]))?;
        let na = ta.fixed_size();
        let nb = tb.fixed_size();
        ensure!(
            self.bytes.len() == 2 + na + nb,
            "composite value length mismatch"
        );
        let a = TypedValue::from_bytes(ta, &self.bytes[2..2 + na])?;
        let b = TypedValue::from_bytes(tb, &self.bytes[2 + na..])?;
        Ok((a, b))
    }

    pub fn ty(&self) -> DataType {
        self.ty
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Integer reading of a numeric value, sign-extended through `i128`.
    pub fn as_int(&self) -> Result<i128> {
        ensure!(self.ty.is_integer(), "{} is not an integer", self.ty.name());
        let mut buf = [0u8; 16];
        let w = self.bytes.len();
        buf[..w].copy_from_slice(&self.bytes);
        let raw = i128::from_le_bytes(buf);
        let shift = 128 - (w as u32) * 8;
        let v = if self.ty.is_signed() {
            raw << shift >> shift
        } else {
            // mask off garbage above the value's width
            raw & ((1i128 << (w * 8)) - 1)
        };
        Ok(v)
    }

    pub fn as_u32(&self) -> Result<u32> {
        Ok(self.as_int()? as u32)
    }

    pub fn as_u64(&self) -> Result<u64> {
        Ok(self.as_int()? as u64)
    }

    pub fn as_i64(&self) -> Result<i64> {
        Ok(self.as_int()? as i64)
    }

    pub fn as_f64(&self) -> Result<f64> {
        match self.ty {
            DataType::F32 => {
                let mut b = [0u8; 4];
                b.copy_from_slice(&self.bytes);
                Ok(f32::from_le_bytes(b) as f64)
            }
            DataType::F64 => {
                let mut b = [0u8; 8];
                b.copy_from_slice(&self.bytes);
                Ok(f64::from_le_bytes(b))
            }
            _ => Ok(self.as_int()? as f64),
        }
    }

    /// The NUL-trimmed contents of a character value.
    pub fn as_str(&self) -> Result<&str> {
        ensure!(self.ty.is_char(), "{} is not a string", self.ty.name());
        let end = self
            .bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.bytes.len());
        std::str::from_utf8(&self.bytes[..end]).map_err(Into::into)
    }

    /// Truthiness for `JumpIf` and the logic instructions: numeric values
    /// are true iff non-zero, character values iff non-empty.
    pub fn truthy(&self) -> bool {
        self.bytes.iter().any(|&b| b != 0)
    }

    /// Total order used by the B+tree comparator, the ephemeral map and
    /// the `Test` instruction.
    pub fn compare(&self, other: &TypedValue) -> Result<Ordering> {
        if self.ty == DataType::Pair || other.ty == DataType::Pair {
            let (a1, a2) = self.unpair()?;
            let (b1, b2) = other.unpair()?;
            let first = a1.compare(&b1)?;
            return if first == Ordering::Equal {
                a2.compare(&b2)
            } else {
                Ok(first)
            };
        }
        if self.ty.is_char() != other.ty.is_char() {
            bail!(
                "cannot compare {} with {}",
                self.ty.name(),
                other.ty.name()
            );
        }
        if self.ty.is_char() {
            return Ok(self.trimmed().cmp(other.trimmed()));
        }
        if self.ty.is_float() || other.ty.is_float() {
            let a = self.as_f64()?;
            let b = other.as_f64()?;
            return Ok(a.partial_cmp(&b).unwrap_or(Ordering::Greater));
        }
        Ok(self.as_int()?.cmp(&other.as_int()?))
    }

    fn trimmed(&self) -> &[u8] {
        let end = self
            .bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.bytes.len());
        &self.bytes[..end]
    }
}

impl std::fmt::Display for TypedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.ty.is_char() {
            write!(f, "{}", self.as_str().unwrap_or("<bad utf8>"))
        } else if self.ty.is_float() {
            write!(f, "{}", self.as_f64().map_err(|_| std::fmt::Error)?)
        } else if self.ty == DataType::Pair {
            match self.unpair() {
                Ok((a, b)) => write!(f, "({a}, {b})"),
                Err(_) => write!(f, "<bad pair>"),
            }
        } else {
            write!(f, "{}", self.as_int().map_err(|_| std::fmt::Error)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_round_trip_and_width() {
        let v = TypedValue::from_u32(1234);
        assert_eq!(v.ty(), DataType::U32);
        assert_eq!(v.bytes().len(), 4);
        assert_eq!(v.as_u32().unwrap(), 1234);

        let w = TypedValue::from_int(DataType::I16, -7).unwrap();
        assert_eq!(w.as_int().unwrap(), -7);
    }

    #[test]
    fn unsigned_values_do_not_sign_extend() {
        let v = TypedValue::from_int(DataType::U8, 0xFF).unwrap();
        assert_eq!(v.as_int().unwrap(), 255);
    }

    #[test]
    fn string_encoding_is_zero_padded() {
        let v = TypedValue::from_str(DataType::Char8, "abc").unwrap();
        assert_eq!(v.bytes().len(), 8);
        assert_eq!(v.as_str().unwrap(), "abc");
        assert_eq!(&v.bytes()[3..], &[0, 0, 0, 0, 0]);
    }

    #[test]
    fn string_must_leave_room_for_nul() {
        assert!(TypedValue::from_str(DataType::Char8, "12345678").is_err());
        assert!(TypedValue::from_str(DataType::Char8, "1234567").is_ok());
    }

    #[test]
    fn mixed_numeric_comparison_promotes() {
        let a = TypedValue::from_int(DataType::U8, 200).unwrap();
        let b = TypedValue::from_i64(1000);
        assert_eq!(a.compare(&b).unwrap(), Ordering::Less);

        let c = TypedValue::from_f64(2.5);
        let d = TypedValue::from_u32(2);
        assert_eq!(c.compare(&d).unwrap(), Ordering::Greater);
    }

    #[test]
    fn char_comparison_is_lexicographic_and_ignores_padding() {
        let a = TypedValue::from_str(DataType::Char32, "apple").unwrap();
        let b = TypedValue::from_str(DataType::Char32, "banana").unwrap();
        assert_eq!(a.compare(&b).unwrap(), Ordering::Less);

        let c = TypedValue::from_str(DataType::Char8, "same").unwrap();
        let d = TypedValue::from_str(DataType::Char64, "same").unwrap();
        assert_eq!(c.compare(&d).unwrap(), Ordering::Equal);
    }

    #[test]
    fn char_vs_numeric_is_an_error() {
        let a = TypedValue::from_str(DataType::Char8, "x").unwrap();
        let b = TypedValue::from_u32(1);
        assert!(a.compare(&b).is_err());
    }

    #[test]
    fn pair_orders_by_first_then_second() {
        let k1 = TypedValue::pair(
            &TypedValue::from_u32(1),
            &TypedValue::from_u32(9),
        )
        .unwrap();
        let k2 = TypedValue::pair(
            &TypedValue::from_u32(2),
            &TypedValue::from_u32(0),
        )
        .unwrap();
        let k3 = TypedValue::pair(
            &TypedValue::from_u32(1),
            &TypedValue::from_u32(10),
        )
        .unwrap();
        assert_eq!(k1.compare(&k2).unwrap(), Ordering::Less);
        assert_eq!(k1.compare(&k3).unwrap(), Ordering::Less);

        let (a, b) = k1.unpair().unwrap();
        assert_eq!(a.as_u32().unwrap(), 1);
        assert_eq!(b.as_u32().unwrap(), 9);
    }

    #[test]
    fn truthiness() {
        assert!(!TypedValue::zero(DataType::U32).truthy());
        assert!(TypedValue::from_u32(1).truthy());
        assert!(!TypedValue::zero(DataType::Char8).truthy());
        assert!(TypedValue::from_str(DataType::Char8, "x").unwrap().truthy());
    }
}
