/// Position and pause state of the autoplaying news carousel.
///
/// Every operation takes the current item count so the index can never point
/// past the window; with zero items the index stays 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Carousel {
    index: usize,
    paused: bool,
}

impl Carousel {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Autoplay step. Returns `true` if the index moved.
    pub fn tick(&mut self, count: usize) -> bool {
        if self.paused || count == 0 {
            return false;
        }
        let next = (self.index + 1) % count;
        let moved = next != self.index;
        self.index = next;
        moved
    }

    /// Jump to `index`. Out-of-range targets are ignored.
    pub fn goto(&mut self, index: usize, count: usize) -> bool {
        if index >= count {
            return false;
        }
        self.index = index;
        true
    }

    pub fn next(&mut self, count: usize) {
        if count > 0 {
            self.index = (self.index + 1) % count;
        }
    }

    pub fn prev(&mut self, count: usize) {
        if count > 0 {
            self.index = (self.index + count - 1) % count;
        }
    }

    /// Pointer/focus entered (`true`) or left (`false`) the carousel.
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Show the newest item.
    pub fn surface_newest(&mut self) {
        self.index = 0;
    }

    /// Re-validate after the window was replaced.
    pub fn clamp(&mut self, count: usize) {
        if self.index >= count {
            self.index = 0;
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Tick,
        Goto(usize),
        Next,
        Prev,
        Pause(bool),
        Newest,
        // The window was replaced with `n` items.
        Resize(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Tick),
            (0usize..16).prop_map(Op::Goto),
            Just(Op::Next),
            Just(Op::Prev),
            any::<bool>().prop_map(Op::Pause),
            Just(Op::Newest),
            (0usize..12).prop_map(Op::Resize),
        ]
    }

    proptest! {
        /// Property: the index always points into the window, or is 0 when empty
        #[test]
        fn index_stays_in_range(
            initial in 0usize..12,
            ops in prop::collection::vec(op_strategy(), 0..100),
        ) {
            let mut carousel = Carousel::default();
            let mut count = initial;
            for op in ops {
                match op {
                    Op::Tick => {
                        carousel.tick(count);
                    }
                    Op::Goto(i) => {
                        carousel.goto(i, count);
                    }
                    Op::Next => carousel.next(count),
                    Op::Prev => carousel.prev(count),
                    Op::Pause(paused) => carousel.set_paused(paused),
                    Op::Newest => carousel.surface_newest(),
                    Op::Resize(n) => {
                        count = n;
                        carousel.clamp(count);
                    }
                }
                let index = carousel.index();
                prop_assert!(index < count || (count == 0 && index == 0));
            }
        }
    }
}
