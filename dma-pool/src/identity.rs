//! Identity mapper (bus address == CPU address).
//!
//! For identity-mapped bare metal without an IOMMU. The only thing that can
//! go wrong is memory living above what the device can address.

use core::ptr::NonNull;

use crate::{DmaDirection, DmaError, DmaMapper, Result};

/// Mapper for identity-mapped memory, bounded by a device addressing mask.
#[derive(Debug, Clone, Copy)]
pub struct IdentityMapper {
    mask: u64,
}

impl IdentityMapper {
    /// Create a mapper for a device that can address `[0, mask]`.
    pub const fn new(mask: u64) -> Self {
        Self { mask }
    }

    /// Device addressing mask.
    pub const fn mask(&self) -> u64 {
        self.mask
    }
}

impl Default for IdentityMapper {
    fn default() -> Self {
        Self::new(u64::MAX)
    }
}

impl DmaMapper for IdentityMapper {
    fn map(&self, cpu: NonNull<u8>, len: usize, _dir: DmaDirection) -> Result<u64> {
        if len == 0 {
            return Err(DmaError::ZeroSize);
        }
        let addr = cpu.as_ptr() as u64;
        let last = addr
            .checked_add(len as u64 - 1)
            .ok_or(DmaError::InvalidRegion)?;
        if last > self.mask {
            return Err(DmaError::AddressLimit {
                addr: last,
                mask: self.mask,
            });
        }
        Ok(addr)
    }

    fn unmap(&self, _bus: u64, _len: usize, _dir: DmaDirection) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_within_mask() {
        let m = IdentityMapper::new(0xFFFF);
        let cpu = NonNull::new(0x1000 as *mut u8).unwrap();
        assert_eq!(m.map(cpu, 0x100, DmaDirection::ToDevice), Ok(0x1000));
        assert!(m.unmap(0x1000, 0x100, DmaDirection::ToDevice).is_ok());
    }

    #[test]
    fn test_identity_beyond_mask() {
        let m = IdentityMapper::new(0xFFFF);
        let cpu = NonNull::new(0xFF80 as *mut u8).unwrap();
        assert_eq!(
            m.map(cpu, 0x100, DmaDirection::ToDevice),
            Err(DmaError::AddressLimit { addr: 0x1007F, mask: 0xFFFF })
        );
    }

    #[test]
    fn test_identity_zero_len() {
        let m = IdentityMapper::default();
        let cpu = NonNull::new(0x1000 as *mut u8).unwrap();
        assert_eq!(m.map(cpu, 0, DmaDirection::ToDevice), Err(DmaError::ZeroSize));
    }
}
