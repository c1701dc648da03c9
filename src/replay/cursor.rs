//! Replay cursor: position within the dataset.

/// 0-based index into a dataset of fixed length. Only moves forward during
/// a run; `len` is the exhausted position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayCursor {
    index: usize,
    len: usize,
}

impl ReplayCursor {
    pub fn new(len: usize) -> Self {
        Self { index: 0, len }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_exhausted(&self) -> bool {
        self.index >= self.len
    }

    /// Step past the current row. Returns false when that was the last row;
    /// the cursor then rests at `len`.
    pub fn advance(&mut self) -> bool {
        if self.index + 1 < self.len {
            self.index += 1;
            true
        } else {
            self.index = self.len;
            false
        }
    }

    pub fn reset(&mut self) {
        self.index = 0;
    }

    /// 1-based row for display, clamped to `len`.
    pub fn position(&self) -> usize {
        (self.index + 1).min(self.len)
    }
}
