//! CPU architectural state: the integer register file.

/// Fixed-size indexed register store.
///
/// - register count comes from the ISA's ABI name table
/// - values are truncated to `width` bits on write
/// - an optional hard-wired zero register reads as zero and ignores writes
#[derive(Debug, Clone)]
pub struct RegFile {
    regs: Vec<u64>,
    width_mask: u64,
    zero: Option<usize>,
}

impl RegFile {
    pub fn new(count: usize, width: u32, zero: Option<usize>) -> Self {
        let width_mask = if width >= 64 { u64::MAX } else { (1u64 << width) - 1 };
        Self {
            regs: vec![0; count],
            width_mask,
            zero,
        }
    }

    /// Out-of-range indices read as zero.
    #[inline]
    pub fn read(&self, reg: usize) -> u64 {
        if self.zero == Some(reg) {
            return 0;
        }
        self.regs.get(reg).copied().unwrap_or(0)
    }

    /// Writes to the zero register or past the end are dropped.
    #[inline]
    pub fn write(&mut self, reg: usize, value: u64) {
        if self.zero == Some(reg) {
            return;
        }
        if let Some(slot) = self.regs.get_mut(reg) {
            *slot = value & self.width_mask;
        }
    }

    pub fn clear(&mut self) {
        self.regs.fill(0);
    }

    pub fn len(&self) -> usize {
        self.regs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regs.is_empty()
    }

    pub fn snapshot(&self) -> &[u64] {
        &self.regs
    }
}
