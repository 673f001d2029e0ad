/// Fixed-size ring of per-frame values
///
/// The slot at the head is the one written during the current frame. Reads of
/// past frames never return the head, so a frame only ever observes what was
/// written before it.
#[derive(Debug)]
pub struct HistoryRing<T> {
    slots: Vec<T>,
    head: usize,
    recorded: usize,
}

impl<T> HistoryRing<T> {
    /// Builds a ring of `len` slots (at least one) from a fallible constructor
    pub fn try_from_fn<E>(len: usize, mut create: impl FnMut(usize) -> Result<T, E>) -> Result<Self, E> {
        let slots = (0..len.max(1)).map(&mut create).collect::<Result<Vec<_>, E>>()?;
        Ok(Self { slots, head: 0, recorded: 0 })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Number of completed frames whose values are still retained
    pub fn recorded(&self) -> usize {
        self.recorded
    }

    /// The slot written during the current frame
    pub fn current(&self) -> &T {
        &self.slots[self.head]
    }

    /// The value written `frames + 1` frames ago
    ///
    /// Clamps to the oldest retained frame when fewer have been recorded. Before
    /// the first frame is recorded this is a slot that has never been written.
    pub fn previous(&self, frames: u32) -> &T {
        let len = self.slots.len();
        let back = (frames as usize + 1).min(self.recorded.max(1)) % len;
        &self.slots[(self.head + len - back) % len]
    }

    /// Finishes the current frame and moves the head to the next slot
    pub fn advance(&mut self) {
        self.head = (self.head + 1) % self.slots.len();
        self.recorded = (self.recorded + 1).min(self.slots.len() - 1);
    }
}
