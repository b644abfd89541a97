use std::fmt;

/// An instant on the monotonic microsecond clock.
///
/// The underlying counter wraps around every 2³² microseconds (about 71
/// minutes), which makes raw ordering of two instants meaningless once the
/// boundary is in play. `Ticks` therefore does not implement `Ord`; the only
/// way to compare two instants is [`Ticks::diff`], which interprets the
/// distance between them as a signed 32-bit value. Two instants can be
/// meaningfully compared as long as they are less than ~35 minutes apart,
/// which is far beyond any deadline the firmware schedules.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Ticks(u32);

impl Ticks {
    /// An instant from a raw microsecond counter value.
    pub const fn from_micros(us: u32) -> Self {
        Ticks(us)
    }

    /// The raw counter value.
    pub const fn as_micros(self) -> u32 {
        self.0
    }

    /// The instant `delay_us` microseconds after `self`, wrapping through the
    /// counter boundary if needed.
    pub const fn add_micros(self, delay_us: u32) -> Self {
        Ticks(self.0.wrapping_add(delay_us))
    }

    /// Signed distance from `other` to `self`, in microseconds.
    ///
    /// Negative when `self` comes before `other`. This is the wrap-aware
    /// comparison the whole scheduler is built on.
    pub const fn diff(self, other: Ticks) -> i32 {
        self.0.wrapping_sub(other.0) as i32
    }

    /// Whether `self` comes before `other`, wrap-aware.
    pub const fn is_before(self, other: Ticks) -> bool {
        self.diff(other) < 0
    }
}

impl fmt::Debug for Ticks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::Ticks;

    #[test]
    fn add_wraps_through_boundary() {
        let near_wrap = Ticks::from_micros(u32::MAX - 99);
        assert_eq!(near_wrap.add_micros(100).as_micros(), 0);
        assert_eq!(near_wrap.add_micros(600).as_micros(), 500);
    }

    #[rstest]
    #[case(0, 1000, -1000)]
    #[case(1000, 0, 1000)]
    #[case(500, 500, 0)]
    // `a` sits just before the wrap, `b` just after it: `a` is still earlier.
    #[case(4_294_967_000, 500, -796)]
    #[case(500, 4_294_967_000, 796)]
    fn diff_is_wrap_aware(#[case] a: u32, #[case] b: u32, #[case] expected: i32) {
        assert_eq!(Ticks::from_micros(a).diff(Ticks::from_micros(b)), expected);
    }

    #[test]
    fn ordering_across_the_boundary() {
        let before = Ticks::from_micros(4_294_967_000);
        let after = Ticks::from_micros(500);
        assert!(before.is_before(after));
        assert!(!after.is_before(before));
    }
}
