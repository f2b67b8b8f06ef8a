/// Tuning knobs of a [`CbTree`](crate::CbTree).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeConfig {
    /// Reuse a node on the search path when only one of its child pointers
    /// changes and no rotation is needed, instead of copying it.
    pub in_place: bool,
}

impl TreeConfig {
    /// Every mutation copies the whole search path.
    pub fn copy_on_write() -> Self {
        Self { in_place: false }
    }

    pub fn in_place(mut self, in_place: bool) -> Self {
        self.in_place = in_place;
        self
    }
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self { in_place: true }
    }
}
