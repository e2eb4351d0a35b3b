use std::{
    fmt::{Debug, Display},
    marker::PhantomData,
    ops::{BitAnd, BitOr, Shl, Shr},
};

pub trait UInt:
    Sized
    + Copy
    + Ord
    + Eq
    + Shl<usize, Output = Self>
    + Shr<usize, Output = Self>
    + BitAnd<Output = Self>
    + BitOr<Output = Self>
    + Display
    + Debug
{
    const MAX: Self;
    const BITS: usize;
    fn into_usize(self) -> usize;
    fn from_usize(value: usize) -> Self;
}

macro_rules! impl_int {
    ($($name:ident),+) => {
        $(
            impl UInt for $name {
                const MAX: Self = $name::MAX;
                const BITS: usize = $name::BITS as usize;
                #[inline(always)]
                fn into_usize(self) -> usize {
                    self as usize
                }
                #[inline(always)]
                fn from_usize(value: usize) -> Self {
                    assert!(value <= $name::MAX as usize, "{value} does not fit into {}", stringify!($name));
                    value as $name
                }
            }
        )+
    }
}

impl_int!(u8, u16, u32, u64);

/// An integer where the maximum value stands for `None`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Optional<T: UInt>(T);

impl<T: UInt> Optional<T> {
    pub const NONE: Self = Self(T::MAX);

    #[inline]
    pub fn new(value: Option<T>) -> Optional<T> {
        assert!(value != Some(T::MAX));
        Self(value.unwrap_or(T::MAX))
    }
    #[inline]
    pub fn get(&self) -> Option<T> {
        if self.0 == T::MAX {
            None
        } else {
            Some(self.0)
        }
    }
    #[inline]
    pub fn is_some(&self) -> bool {
        self.0 != T::MAX
    }
    #[inline]
    pub fn is_none(&self) -> bool {
        self.0 == T::MAX
    }
    #[inline]
    pub fn set(&mut self, value: Option<T>) {
        *self = Self::new(value);
    }
}

impl<T: UInt> Default for Optional<T> {
    fn default() -> Self {
        Self::NONE
    }
}

pub type OptionalU32 = Optional<u32>;

pub trait Config: Copy {
    const FIRST_BITS: usize;
    const SECOND_BITS: usize;

    const MAX_FIRST: usize = (1usize << Self::FIRST_BITS) - 1;
    const MAX_SECOND: usize = (1usize << Self::SECOND_BITS) - 1;
}

/// Two integers sharing the bits of one, `first` lives in the high bits.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackedUint<C: Config, I: UInt>(I, PhantomData<C>);

impl<C: Config, I: UInt> PackedUint<C, I> {
    #[rustfmt::skip]
    pub(crate) fn new(first: I, second: I) -> Self {
        debug_assert!(C::FIRST_BITS + C::SECOND_BITS <= I::BITS);
        debug_assert!(first.into_usize() <= C::MAX_FIRST, "First is too large {} > {}", first, C::MAX_FIRST);
        debug_assert!(second.into_usize() <= C::MAX_SECOND, "Second is too large {} > {}", second, C::MAX_SECOND);

        let value = (first << C::SECOND_BITS) | (second & Self::second_mask());
        PackedUint(value, PhantomData)
    }

    #[inline]
    fn second_mask() -> I {
        I::MAX >> (I::BITS - C::SECOND_BITS)
    }

    pub(crate) fn first(&self) -> I {
        (self.0 >> C::SECOND_BITS) & (I::MAX >> (I::BITS - C::FIRST_BITS))
    }

    pub(crate) fn second(&self) -> I {
        self.0 & Self::second_mask()
    }
}

impl<C: Config, I: UInt> Debug for PackedUint<C, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackedUint")
            .field("first", &self.first())
            .field("second", &self.second())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, PartialEq, Eq)]
    struct Split;
    impl Config for Split {
        const FIRST_BITS: usize = 31;
        const SECOND_BITS: usize = 1;
    }

    #[test]
    fn packed_halves_do_not_bleed() {
        let packed = PackedUint::<Split, u32>::new(Split::MAX_FIRST as u32, 0);
        assert_eq!(packed.first(), Split::MAX_FIRST as u32);
        assert_eq!(packed.second(), 0);

        let packed = PackedUint::<Split, u32>::new(7, 1);
        assert_eq!(packed.first(), 7);
        assert_eq!(packed.second(), 1);
    }

    #[test]
    fn optional_sentinel() {
        let mut opt = OptionalU32::NONE;
        assert!(opt.is_none());
        opt.set(Some(3));
        assert_eq!(opt.get(), Some(3));
        assert_eq!(OptionalU32::default(), OptionalU32::NONE);
    }
}
