//! Big-endian integers, as they appear on the wire.

macro_rules! be_int {
    ($name:ident, $native:ty) => {
        #[derive(Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
        #[repr(transparent)]
        pub(crate) struct $name($native);

        impl $name {
            pub(crate) fn get(self) -> $native {
                <$native>::from_be(self.0)
            }
        }

        impl From<$native> for $name {
            fn from(value: $native) -> Self {
                Self(value.to_be())
            }
        }
    };
}

be_int!(U16, u16);
be_int!(U32, u32);
