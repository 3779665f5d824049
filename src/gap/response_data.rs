//! Implementation of length-type-value response data format used in the
//! Advertising Data (AD) and Scan Response Data (SRD) blocks:
//!
//! * [Vol 3] Part C, Section 11
//! * [Core Specification Supplement] Part A, Section 1
//! * [Assigned Numbers] Section 2.3

use smallvec::SmallVec;
use structbuf::{Pack, Packer, StructBuf, Unpack};
use tracing::trace;

use crate::gap::{AdvFlag, ResponseDataType, Uuid};

/// Decoded response data. Each AD type maps to the value of its last
/// occurrence in the payload. Values are borrowed from the payload and are
/// never copied.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ResponseData<'a>(SmallVec<[(u8, &'a [u8]); 8]>);

impl<'a> ResponseData<'a> {
    /// Decodes length-type-value structures from `buf`. Decoding stops at the
    /// first zero-length (terminator) or truncated structure, keeping all
    /// structures before it. This never fails.
    #[must_use]
    pub fn decode(buf: &'a [u8]) -> Self {
        let mut fields: SmallVec<[(u8, &[u8]); 8]> = SmallVec::new();
        let mut i = 0;
        while let Some(&n) = buf.get(i) {
            let n = usize::from(n);
            if n == 0 || i + n >= buf.len() {
                if n != 0 {
                    trace!("Truncated AD structure at offset {i} (len={n})");
                }
                break;
            }
            let (typ, val) = (buf[i + 1], &buf[i + 2..i + 1 + n]);
            match fields.iter_mut().find(|f| f.0 == typ) {
                Some(f) => f.1 = val,
                None => fields.push((typ, val)),
            }
            i += 1 + n;
        }
        Self(fields)
    }

    /// Returns the value of the specified AD type or [`None`] if the type is
    /// absent.
    #[inline]
    #[must_use]
    pub fn get(&self, typ: impl Into<u8>) -> Option<&'a [u8]> {
        let typ = typ.into();
        self.0.iter().find_map(|&(t, v)| (t == typ).then_some(v))
    }

    /// Returns an iterator over `(type, value)` pairs in the order in which
    /// each type first appeared.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (u8, &'a [u8])> + '_ {
        self.0.iter().copied()
    }

    /// Returns the number of distinct AD types.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether no structures were decoded.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the complete local name or an empty string if the name is
    /// absent. Invalid UTF-8 sequences are replaced with `U+FFFD`.
    #[must_use]
    pub fn name(&self) -> String {
        self.get(ResponseDataType::CompleteLocalName)
            .map_or_else(String::new, |v| String::from_utf8_lossy(v).into_owned())
    }

    /// Returns advertising flags or empty flags if they are absent.
    #[must_use]
    pub fn flags(&self) -> AdvFlag {
        (self.get(ResponseDataType::Flags).and_then(<[u8]>::first))
            .map_or_else(AdvFlag::empty, |&v| AdvFlag::from_bits_retain(v))
    }

    /// Returns all advertised service class UUIDs. 16-bit lists come first,
    /// followed by 32-bit and 128-bit lists. The order and any duplicates
    /// within each list are preserved. Trailing bytes that do not form a
    /// complete UUID are ignored.
    #[must_use]
    pub fn service_uuids(&self) -> Vec<Uuid> {
        let mut v = Vec::new();
        for (typ, n) in ResponseDataType::SERVICE_CLASS {
            let Some(f) = self.get(typ) else { continue };
            v.extend(f.chunks_exact(n).filter_map(|c| Uuid::try_from(c).ok()));
        }
        v
    }

    /// Returns device appearance ([CSS] Part A, Section 1.12).
    #[must_use]
    pub fn appearance(&self) -> Option<u16> {
        let v = self.get(ResponseDataType::Appearance)?;
        (v.len() >= 2).then(|| v.unpack().u16())
    }

    /// Returns the company identifier and manufacturer-specific data
    /// ([CSS] Part A, Section 1.4).
    #[must_use]
    pub fn manufacturer_data(&self) -> Option<(u16, &'a [u8])> {
        let v = self.get(ResponseDataType::ManufacturerData)?;
        (v.len() >= 2).then(|| (v.unpack().u16(), &v[2..]))
    }
}

/// Decodes the complete local name from a raw payload.
#[inline]
#[must_use]
pub fn decode_name(payload: &[u8]) -> String {
    ResponseData::decode(payload).name()
}

/// Decodes advertising flags from a raw payload.
#[inline]
#[must_use]
pub fn decode_flags(payload: &[u8]) -> AdvFlag {
    ResponseData::decode(payload).flags()
}

/// Decodes all service class UUIDs from a raw payload.
#[inline]
#[must_use]
pub fn decode_service_uuids(payload: &[u8]) -> Vec<Uuid> {
    ResponseData::decode(payload).service_uuids()
}

/// Response data builder.
#[derive(Clone, Debug)]
pub struct ResponseDataMut(StructBuf);

impl ResponseDataMut {
    /// Creates a new response data buffer.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self(StructBuf::new(254)) // [Vol 6] Part B, Section 2.3.4
    }

    /// Returns the final response data buffer.
    #[allow(clippy::missing_const_for_fn)]
    #[inline]
    pub fn get(self) -> StructBuf {
        self.0
    }

    /// Appends service class UUIDs (\[CSS\] Part A, Section 1.1). Each UUID is
    /// encoded in the optimal format.
    pub fn service_class<T: Copy + Into<Uuid>>(
        &mut self,
        complete: bool,
        uuids: &[T],
    ) -> &mut Self {
        let typ = u8::from(ResponseDataType::IncompleteServiceClass16) + u8::from(complete);
        self.maybe_put(complete, typ, |b| {
            (uuids.iter().filter_map(|&u| u.into().as_u16())).for_each(|v| {
                b.u16(v);
            });
        });
        self.maybe_put(complete, typ + 2, |b| {
            (uuids.iter().filter_map(|&u| u.into().as_u32())).for_each(|v| {
                b.u32(v);
            });
        });
        self.maybe_put(complete, typ + 4, |b| {
            (uuids.iter().filter_map(|&u| u.into().as_u128())).for_each(|v| {
                b.u128(v);
            });
        })
    }

    /// Appends either shortened or complete local device name
    /// (\[CSS\] Part A, Section 1.2).
    pub fn local_name<T: AsRef<str>>(&mut self, complete: bool, v: T) -> &mut Self {
        let typ = u8::from(ResponseDataType::ShortLocalName) + u8::from(complete);
        self.put(typ, |b| {
            b.put(v.as_ref().as_bytes());
        })
    }

    /// Appends advertising flags (\[CSS\] Part A, Section 1.3).
    pub fn flags(&mut self, v: AdvFlag) -> &mut Self {
        self.put(ResponseDataType::Flags, |b| {
            b.u8(v.bits());
        })
    }

    /// Appends manufacturer-specific data (\[CSS\] Part A, Section 1.4).
    pub fn manufacturer_data(&mut self, company_id: u16, v: &[u8]) -> &mut Self {
        self.put(ResponseDataType::ManufacturerData, |b| {
            b.u16(company_id).put(v);
        })
    }

    /// Appends device appearance (\[CSS\] Part A, Section 1.12).
    pub fn appearance(&mut self, v: u16) -> &mut Self {
        self.put(ResponseDataType::Appearance, |b| {
            b.u16(v);
        })
    }

    /// Appends a length-type-data field to the buffer, calling `f` to provide
    /// the data.
    #[inline]
    fn put<T: Into<u8>>(&mut self, typ: T, f: impl Fn(&mut Packer)) -> &mut Self {
        self.maybe_put(true, typ, f)
    }

    /// Append a length-type-data field to the buffer, calling `f` to provide
    /// the data. If the data is empty and `keep_empty` is `false`, then nothing
    /// gets appended.
    fn maybe_put<T: Into<u8>>(
        &mut self,
        keep_empty: bool,
        typ: T,
        f: impl Fn(&mut Packer),
    ) -> &mut Self {
        let i = self.0.len();
        f(self.0.append().put([0, typ.into()]));
        let n = u8::try_from(self.0.len().wrapping_sub(i + 1)).expect("response data overflow");
        self.0[i] = n;
        if !keep_empty && n < 2 {
            self.0.truncate(i);
        }
        self
    }
}

impl Default for ResponseDataMut {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}
