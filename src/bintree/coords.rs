//! Local/absolute coordinate mapping for the bin tree.
//!
//! Every bin owns a local frame `[0, size)` placed at an offset inside its
//! parent, possibly mirrored. All conversions between a bin's local frame
//! and contig-absolute coordinates go through [`Mapper`], composed
//! frame-by-frame while descending from the root — there is exactly one
//! place in the crate that knows the transform.

/// Placement of a child frame inside its parent's local frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Offset of the child's span within the parent's local frame
    pub offset: i64,
    /// Size of the child's span
    pub size: i64,
    /// Whether the child's frame is mirrored relative to the parent
    pub complemented: bool,
}

/// Absolute frame of one bin: where its local `[0, size)` lands on the
/// contig axis and whether the axis runs backwards.
///
/// The flipped flag is the XOR of every complement flag on the
/// root-to-bin path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapper {
    /// Smallest absolute coordinate covered by the frame
    pub abs_start: i64,
    /// Span size
    pub size: i64,
    /// Whether local coordinates run against the absolute axis
    pub flipped: bool,
}

impl Mapper {
    /// Frame of a root bin. Absolute coordinates are root-frame
    /// coordinates, so the root starts at zero.
    #[must_use]
    pub fn root(size: i64, complemented: bool) -> Self {
        Self {
            abs_start: 0,
            size,
            flipped: complemented,
        }
    }

    /// Absolute coordinate of a local position.
    #[must_use]
    pub fn abs(&self, local: i64) -> i64 {
        if self.flipped {
            self.abs_start + self.size - 1 - local
        } else {
            self.abs_start + local
        }
    }

    /// Local position of an absolute coordinate (inverse of [`Self::abs`]).
    #[must_use]
    pub fn local(&self, abs: i64) -> i64 {
        if self.flipped {
            self.abs_start + self.size - 1 - abs
        } else {
            abs - self.abs_start
        }
    }

    /// Absolute interval of a local inclusive interval, endpoints sorted.
    #[must_use]
    pub fn abs_interval(&self, start: i64, end: i64) -> (i64, i64) {
        let (a, b) = (self.abs(start), self.abs(end));
        (a.min(b), a.max(b))
    }

    /// Local interval of an absolute inclusive interval, endpoints sorted.
    #[must_use]
    pub fn local_interval(&self, start: i64, end: i64) -> (i64, i64) {
        let (a, b) = (self.local(start), self.local(end));
        (a.min(b), a.max(b))
    }

    /// Inclusive absolute span of the whole frame.
    #[must_use]
    pub fn span(&self) -> (i64, i64) {
        (self.abs_start, self.abs_start + self.size - 1)
    }

    /// Frame of a child placed at `frame` inside this frame.
    #[must_use]
    pub fn child(&self, frame: Frame) -> Self {
        let (a, b) = self.abs_interval(frame.offset, frame.offset + frame.size - 1);
        debug_assert!(b - a + 1 == frame.size);
        Self {
            abs_start: a,
            size: frame.size,
            flipped: self.flipped ^ frame.complemented,
        }
    }

    /// Same placement with a different span size, used while a bin is
    /// being grown or shrunk by a base edit.
    #[must_use]
    pub fn with_size(&self, size: i64) -> Self {
        Self { size, ..*self }
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn unflipped_root_is_identity() {
        let m = Mapper::root(100, false);
        assert_eq!(m.abs(0), 0);
        assert_eq!(m.abs(99), 99);
        assert_eq!(m.local(42), 42);
    }

    #[test]
    fn flipped_root_mirrors() {
        // Scenario D: local [0, 9] in a complemented root of size 100
        // reads back as absolute [90, 99].
        let m = Mapper::root(100, true);
        assert_eq!(m.abs_interval(0, 9), (90, 99));
        assert_eq!(m.local(m.abs(7)), 7);
    }

    #[test]
    fn child_composition() {
        let root = Mapper::root(4096, false);
        let child = root.child(Frame {
            offset: 1024,
            size: 512,
            complemented: false,
        });
        assert_eq!(child.abs(0), 1024);
        assert_eq!(child.abs(511), 1535);
        assert!(!child.flipped);
    }

    #[test]
    fn complement_flag_xors_along_the_path() {
        let root = Mapper::root(4096, true);
        let child = root.child(Frame {
            offset: 0,
            size: 1024,
            complemented: true,
        });
        // Two flips cancel: child local 0 sits at the high end of the
        // child's span but reads forward.
        assert!(!child.flipped);
        assert_eq!(child.span(), (3072, 4095));
        assert_eq!(child.abs(0), 3072);

        let grandchild = child.child(Frame {
            offset: 512,
            size: 256,
            complemented: true,
        });
        assert!(grandchild.flipped);
        assert_eq!(grandchild.span(), (3584, 3839));
        assert_eq!(grandchild.abs(0), 3839);
        assert_eq!(grandchild.local(3839), 0);
    }

    #[test]
    fn interval_round_trip_under_flip() {
        let m = Mapper {
            abs_start: 1000,
            size: 100,
            flipped: true,
        };
        let (a, b) = m.abs_interval(10, 19);
        assert_eq!((a, b), (1080, 1089));
        assert_eq!(m.local_interval(a, b), (10, 19));
    }
}
