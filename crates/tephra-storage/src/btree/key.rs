//! Fixed-width key encoding for B+Tree pages.

/// A fixed-width index key.
///
/// Keys are compared through their `Ord` impl and stored on pages in a
/// fixed number of bytes. The byte encoding never participates in
/// comparisons, so it only needs to round-trip.
pub trait IndexKey: Copy + Ord + Default + std::fmt::Debug + Send + Sync + 'static {
    /// Number of bytes this key occupies on a page.
    const ENCODED_LEN: usize;

    /// Writes the key into the buffer (exactly ENCODED_LEN bytes).
    fn encode_into(&self, buf: &mut [u8]);

    /// Reads a key back from the buffer.
    fn decode_from(buf: &[u8]) -> Self;
}

macro_rules! impl_index_key_for_int {
    ($($t:ty),*) => {
        $(
            impl IndexKey for $t {
                const ENCODED_LEN: usize = std::mem::size_of::<$t>();

                #[inline]
                fn encode_into(&self, buf: &mut [u8]) {
                    buf[..Self::ENCODED_LEN].copy_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn decode_from(buf: &[u8]) -> Self {
                    let mut bytes = [0u8; Self::ENCODED_LEN];
                    bytes.copy_from_slice(&buf[..Self::ENCODED_LEN]);
                    <$t>::from_le_bytes(bytes)
                }
            }
        )*
    };
}

impl_index_key_for_int!(i32, i64, u32, u64);
