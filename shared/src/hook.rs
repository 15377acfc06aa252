//! Hook records
//! ============
//! `HookParam` travels inside NEW_HOOK commands, `HookEntry` is one slot of
//! the hook table the target publishes in its shared section:
//
//!   ┌──── HookEntry (64 bytes) ───────────────────────────────────────┐
//!   │ HookParam (36) │ name_address u64 │ name_length u32 │ 16 spare  │
//!   └─────────────────────────────────────────────────────────────────┘
//
//! Every field is little-endian and unaligned. Records are always decoded
//! from bytes copied out of the section, never read in place.

use crate::constants::HOOK_ENTRY_SIZE;
use crate::protocol::ProtocolError;

/// Text is a pointer to a string rather than a character in a register.
pub const USING_STRING: u32 = 0x1;
/// Text is UTF-16LE; otherwise it is in the target's ANSI code page.
pub const USING_UNICODE: u32 = 0x2;
/// A split value is read from the stack to tell streams apart.
pub const USING_SPLIT: u32 = 0x10;
/// `address` is relative to the module named by `module`.
pub const MODULE_OFFSET: u32 = 0x40;
/// `address` is relative to the export named by `function`.
pub const FUNCTION_OFFSET: u32 = 0x80;

/// Parameters describing one hook.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct HookParam {
    pub address:       u32,
    pub offset:        i32,
    pub index:         i32,
    pub split:         i32,
    pub split_index:   i32,
    pub module:        u32,
    pub function:      u32,
    pub hook_type:     u32,
    pub length_offset: u16,
    pub hook_len:      u8,
    pub recover_len:   u8,
}

impl HookParam {
    /// Encoded size in bytes.
    pub const SIZE: usize = 36;

    pub fn is_unicode(&self) -> bool {
        self.hook_type & USING_UNICODE != 0
    }

    /// Write the record into the first `SIZE` bytes of `out`.
    pub fn encode_into(&self, out: &mut [u8]) -> Result<(), ProtocolError> {
        check_len(out.len(), Self::SIZE)?;
        out[0..4].copy_from_slice(&self.address.to_le_bytes());
        out[4..8].copy_from_slice(&self.offset.to_le_bytes());
        out[8..12].copy_from_slice(&self.index.to_le_bytes());
        out[12..16].copy_from_slice(&self.split.to_le_bytes());
        out[16..20].copy_from_slice(&self.split_index.to_le_bytes());
        out[20..24].copy_from_slice(&self.module.to_le_bytes());
        out[24..28].copy_from_slice(&self.function.to_le_bytes());
        out[28..32].copy_from_slice(&self.hook_type.to_le_bytes());
        out[32..34].copy_from_slice(&self.length_offset.to_le_bytes());
        out[34] = self.hook_len;
        out[35] = self.recover_len;
        Ok(())
    }

    /// Read a record from the first `SIZE` bytes of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        check_len(buf.len(), Self::SIZE)?;
        Ok(Self {
            address:       read_u32(buf, 0),
            offset:        read_u32(buf, 4) as i32,
            index:         read_u32(buf, 8) as i32,
            split:         read_u32(buf, 12) as i32,
            split_index:   read_u32(buf, 16) as i32,
            module:        read_u32(buf, 20),
            function:      read_u32(buf, 24),
            hook_type:     read_u32(buf, 28),
            length_offset: u16::from_le_bytes([buf[32], buf[33]]),
            hook_len:      buf[34],
            recover_len:   buf[35],
        })
    }
}

/// One slot of the shared hook table. The name lives in the target's
/// address space and has to be fetched with a cross-process read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HookEntry {
    pub param:        HookParam,
    pub name_address: u64,
    pub name_length:  u32,
}

impl HookEntry {
    pub const SIZE: usize = HOOK_ENTRY_SIZE;

    const NAME_ADDRESS_AT: usize = HookParam::SIZE;
    const NAME_LENGTH_AT:  usize = HookParam::SIZE + 8;

    pub fn address(&self) -> u32 {
        self.param.address
    }

    /// Unused slots carry address 0.
    pub fn is_vacant(&self) -> bool {
        self.param.address == 0
    }

    /// Hook address of a raw slot without decoding the rest of it.
    pub fn peek_address(record: &[u8]) -> Result<u32, ProtocolError> {
        check_len(record.len(), 4)?;
        Ok(read_u32(record, 0))
    }

    pub fn decode(record: &[u8]) -> Result<Self, ProtocolError> {
        check_len(record.len(), Self::SIZE)?;
        let mut address = [0u8; 8];
        address.copy_from_slice(&record[Self::NAME_ADDRESS_AT..Self::NAME_ADDRESS_AT + 8]);
        Ok(Self {
            param:        HookParam::decode(record)?,
            name_address: u64::from_le_bytes(address),
            name_length:  read_u32(record, Self::NAME_LENGTH_AT),
        })
    }

    /// Write a full slot. The spare tail is zeroed.
    pub fn encode_into(&self, out: &mut [u8]) -> Result<(), ProtocolError> {
        check_len(out.len(), Self::SIZE)?;
        self.param.encode_into(out)?;
        out[Self::NAME_ADDRESS_AT..Self::NAME_ADDRESS_AT + 8]
            .copy_from_slice(&self.name_address.to_le_bytes());
        out[Self::NAME_LENGTH_AT..Self::NAME_LENGTH_AT + 4]
            .copy_from_slice(&self.name_length.to_le_bytes());
        out[Self::NAME_LENGTH_AT + 4..Self::SIZE].fill(0);
        Ok(())
    }
}

pub(crate) fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

pub(crate) fn check_len(actual: usize, expected: usize) -> Result<(), ProtocolError> {
    if actual < expected {
        return Err(ProtocolError::Truncated { expected, actual });
    }
    Ok(())
}
