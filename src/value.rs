use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::cmp::Reverse;
use std::sync::Arc;

/// User defined key
pub type UserKey = Arc<[u8]>;

/// User defined data (blob of bytes)
pub type UserValue = Arc<[u8]>;

/// Sequence number, a monotonically increasing counter.
///
/// Advanced by one per applied write. A value with a higher sequence
/// number shadows an item with the same key and lower sequence number.
/// Only the low 56 bits are usable; 0 is reserved for "never written".
pub type SeqNo = u64;

/// Highest representable sequence number (56 bits)
pub const MAX_SEQNO: SeqNo = (1 << 56) - 1;

/// Value type (regular value or tombstone).
///
/// The discriminants are the on-disk op type byte.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ValueType {
    /// Deleted value
    Tombstone = 0,

    /// Existing value
    Value = 1,
}

impl From<ValueType> for u8 {
    fn from(value: ValueType) -> Self {
        match value {
            ValueType::Tombstone => 0,
            ValueType::Value => 1,
        }
    }
}

impl TryFrom<u8> for ValueType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Tombstone),
            1 => Ok(Self::Value),
            other => Err(other),
        }
    }
}

/// A user key bound to a sequence number and op type.
///
/// # On-disk encoding
///
/// \[user key; N bytes] \[trailer = (seqno << 8) | type; 8 bytes, little-endian]
///
/// # Ordering
///
/// User key ascending (bytewise), then trailer **descending**, so the
/// newest version of a user key sorts first.
#[derive(Clone, Eq, PartialEq)]
pub struct InternalKey {
    /// User key portion
    pub user_key: UserKey,

    /// Sequence number of the write
    pub seqno: SeqNo,

    /// Op type of the write
    pub value_type: ValueType,
}

impl std::fmt::Debug for InternalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}:{}:{}",
            self.user_key,
            self.seqno,
            u8::from(self.value_type)
        )
    }
}

impl InternalKey {
    /// Creates an internal key
    pub fn new<K: Into<UserKey>>(user_key: K, seqno: SeqNo, value_type: ValueType) -> Self {
        debug_assert!(seqno <= MAX_SEQNO);

        Self {
            user_key: user_key.into(),
            seqno,
            value_type,
        }
    }

    /// The packed sequence + type trailer
    #[must_use]
    pub fn trailer(&self) -> u64 {
        (self.seqno << 8) | u64::from(u8::from(self.value_type))
    }

    /// Whether this key marks a deletion
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.value_type == ValueType::Tombstone
    }

    /// Length of the encoded form
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.user_key.len() + std::mem::size_of::<u64>()
    }

    /// Encodes into `user_key || trailer`
    pub fn encode_into<W: std::io::Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&self.user_key)?;
        writer.write_u64::<LittleEndian>(self.trailer())
    }

    /// Encodes into a fresh buffer
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());

        // NOTE: Writing into a Vec cannot fail
        #[allow(clippy::expect_used)]
        self.encode_into(&mut buf).expect("vec write should succeed");

        buf
    }

    /// Decodes an encoded internal key.
    ///
    /// Returns `None` for keys that are too short or carry an unknown op
    /// type; the caller decides whether that is corruption.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < std::mem::size_of::<u64>() {
            return None;
        }

        let (user_key, mut trailer_bytes) = bytes.split_at(bytes.len() - 8);
        let trailer = trailer_bytes
            .read_u64::<LittleEndian>()
            .unwrap_or_default();

        let value_type = ValueType::try_from((trailer & 0xff) as u8).ok()?;
        let seqno = trailer >> 8;

        Some(Self {
            user_key: user_key.into(),
            seqno,
            value_type,
        })
    }
}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

// Order by user key, THEN by trailer in reverse.
// This is load-bearing for every lookup: the newest version of a
// user key must sort first.
impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.user_key, Reverse(self.trailer())).cmp(&(&other.user_key, Reverse(other.trailer())))
    }
}
