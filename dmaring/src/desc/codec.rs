//! Control word encoding.

use super::DescFields;
use crate::traits::TxStatus;

/// Translates between [`DescFields`] and a device's control word.
///
/// The engine never looks at raw control bits; everything goes through the
/// codec so the same ring logic drives devices with different layouts.
pub trait DescriptorCodec: Send + Sync {
    /// Pack the fields into a control word.
    fn encode(&self, fields: &DescFields) -> u32;

    /// Unpack a control word.
    fn decode(&self, ctrl: u32) -> DescFields;

    /// Largest length a single segment field can hold.
    fn max_segment_len(&self) -> usize;

    /// Completion status of a finished TX descriptor.
    ///
    /// The default reports every completed descriptor as successful.
    fn tx_status(&self, fields: &DescFields, info: u32) -> TxStatus {
        let _ = (fields, info);
        TxStatus::Ok
    }
}

/// Two 14-bit length fields packed into one control word.
///
/// ```text
///  31       30      29..16     15      14      13..0
/// ┌──────┬────────┬─────────┬───────┬────────┬─────────┐
/// │ DONE │ LAST0  │  LEN0   │ BURST │ LAST1  │  LEN1   │
/// └──────┴────────┴─────────┴───────┴────────┴─────────┘
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SplitLenCodec;

impl SplitLenCodec {
    pub const LEN1_MASK: u32 = 0x3FFF;
    pub const LAST1: u32 = 1 << 14;
    pub const BURST: u32 = 1 << 15;
    pub const LEN0_SHIFT: u32 = 16;
    pub const LEN0_MASK: u32 = 0x3FFF << Self::LEN0_SHIFT;
    pub const LAST0: u32 = 1 << 30;
    pub const DMA_DONE: u32 = 1 << 31;

    /// Largest value of either length field.
    pub const MAX_LEN: usize = 0x3FFF;
}

impl DescriptorCodec for SplitLenCodec {
    fn encode(&self, f: &DescFields) -> u32 {
        let mut ctrl = (f.len1 as u32) & Self::LEN1_MASK;
        ctrl |= ((f.len0 as u32) << Self::LEN0_SHIFT) & Self::LEN0_MASK;
        if f.last1 {
            ctrl |= Self::LAST1;
        }
        if f.last0 {
            ctrl |= Self::LAST0;
        }
        if f.done {
            ctrl |= Self::DMA_DONE;
        }
        ctrl
    }

    fn decode(&self, ctrl: u32) -> DescFields {
        DescFields {
            len0: ((ctrl & Self::LEN0_MASK) >> Self::LEN0_SHIFT) as u16,
            len1: (ctrl & Self::LEN1_MASK) as u16,
            last0: ctrl & Self::LAST0 != 0,
            last1: ctrl & Self::LAST1 != 0,
            done: ctrl & Self::DMA_DONE != 0,
        }
    }

    fn max_segment_len(&self) -> usize {
        Self::MAX_LEN
    }
}
