/// Unread low-order bits of the last byte consumed by a bit read.
///
/// The high `pending` bits of `byte`'s unread part are consumed first
/// (MSB-first). When `pending == 0`, `byte` carries nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct BitCursor {
    byte: u8,
    pending: u32,
}

impl BitCursor {
    pub fn pending(&self) -> u32 {
        self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending == 0
    }

    pub fn load(&mut self, byte: u8) {
        self.byte = byte;
        self.pending = 8;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Takes up to `n` bits from the pending byte, returning `(value, taken)`.
    pub fn take(&mut self, n: u32) -> (u32, u32) {
        let taken = n.min(self.pending);
        if taken == 0 {
            return (0, 0);
        }
        self.pending -= taken;
        let value = (u32::from(self.byte) >> self.pending) & ((1u32 << taken) - 1);
        (value, taken)
    }
}
