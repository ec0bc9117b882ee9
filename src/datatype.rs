//! Wire encoding for values exchanged in collectives.
//!
//! Every participant of an all-gather contributes one fixed-size record. The
//! [`Wire`] trait fixes that size and the byte layout so that processes on
//! machines with different native byte orders decode identical values.
//!
//! # Layout
//!
//! | Rust Type  | Size | Encoding              |
//! |------------|------|-----------------------|
//! | `i32`      | 4    | big-endian            |
//! | `i64`      | 8    | big-endian            |
//! | `u128`     | 16   | big-endian            |
//!
//! Composite records (the pid/rank record, network identifiers) implement
//! the trait by concatenating their fields in declaration order with no
//! padding.

/// Internal module to seal the trait — prevents external implementations.
pub(crate) mod sealed {
    pub trait Sealed {}
}

/// Types that can be carried by an all-gather.
///
/// This is a **sealed trait** — it cannot be implemented outside this crate.
pub trait Wire: sealed::Sealed + Copy + Sized + 'static {
    /// Encoded size in bytes. Every value of the type encodes to exactly this many bytes.
    const SIZE: usize;

    /// Append the encoded value to `out`.
    fn encode(&self, out: &mut Vec<u8>);

    /// Decode a value from exactly [`Self::SIZE`] bytes.
    fn decode(bytes: &[u8]) -> Self;
}

macro_rules! impl_wire_int {
    ($ty:ty) => {
        impl sealed::Sealed for $ty {}
        impl Wire for $ty {
            const SIZE: usize = std::mem::size_of::<$ty>();

            fn encode(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_be_bytes());
            }

            fn decode(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(&bytes[..Self::SIZE]);
                <$ty>::from_be_bytes(raw)
            }
        }
    };
}

impl_wire_int!(i32);
impl_wire_int!(i64);
impl_wire_int!(u128);

/// Encode a single value into a freshly allocated buffer.
pub(crate) fn encode_one<T: Wire>(value: &T) -> Vec<u8> {
    let mut out = Vec::with_capacity(T::SIZE);
    value.encode(&mut out);
    out
}

/// Decode a buffer of back-to-back records.
///
/// Returns `None` when the buffer length is not a multiple of the record size.
pub(crate) fn decode_all<T: Wire>(bytes: &[u8]) -> Option<Vec<T>> {
    if T::SIZE == 0 || bytes.len() % T::SIZE != 0 {
        return None;
    }
    Some(bytes.chunks_exact(T::SIZE).map(T::decode).collect())
}
