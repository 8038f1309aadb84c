//! Flash array model

/// A flash region that only programs 1 -> 0 and erases to 0xFF
#[derive(Debug, Clone)]
pub struct FlashArray {
    base: u32,
    data: Vec<u8>,
}

impl FlashArray {
    /// Erased region of `size` bytes at `base`
    pub fn new(base: u32, size: usize) -> Self {
        Self {
            base,
            data: vec![0xFF; size],
        }
    }

    /// Region pre-filled with `contents` (rest erased)
    pub fn with_contents(base: u32, size: usize, contents: &[u8]) -> Self {
        let mut array = Self::new(base, size);
        let len = contents.len().min(size);
        array.data[..len].copy_from_slice(&contents[..len]);
        array
    }

    /// Start address
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True for a zero-sized region
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Raw contents
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Whether `addr` falls inside the region
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.base && ((addr - self.base) as usize) < self.data.len()
    }

    fn offset(&self, addr: u32) -> usize {
        (addr - self.base) as usize
    }

    /// Little-endian word at `addr`
    pub fn read_word(&self, addr: u32) -> u32 {
        let i = self.offset(addr & !3);
        u32::from_le_bytes([
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ])
    }

    /// Program a word; bits can only be cleared
    pub fn program_word(&mut self, addr: u32, value: u32) {
        let i = self.offset(addr & !3);
        for (dst, src) in self.data[i..i + 4].iter_mut().zip(value.to_le_bytes()) {
            *dst &= src;
        }
    }

    /// Erase `len` bytes starting at `addr`, clipped to the region
    pub fn erase(&mut self, addr: u32, len: usize) {
        let start = self.offset(addr);
        let end = (start + len).min(self.data.len());
        self.data[start..end].fill(0xFF);
    }

    /// Erase everything
    pub fn erase_all(&mut self) {
        self.data.fill(0xFF);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_only_clears_bits() {
        let mut flash = FlashArray::new(0x1000, 16);
        flash.program_word(0x1004, 0x1234_5678);
        assert_eq!(flash.read_word(0x1004), 0x1234_5678);
        flash.program_word(0x1004, 0xFFFF_0000);
        assert_eq!(flash.read_word(0x1004), 0x1234_0000);
        flash.erase(0x1000, 8);
        assert_eq!(flash.read_word(0x1004), 0xFFFF_FFFF);
        assert!(flash.contains(0x100C));
        assert!(!flash.contains(0x1010));
    }
}
