// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A small macro to declare usage-flag sets without pulling in a dependency.

/// Declares a `Copy` flag set backed by an unsigned integer.
///
/// The generated type supports `|`, `&`, `|=`, containment queries and a
/// `Debug` impl that lists the named flags that are set.
#[macro_export]
#[doc(hidden)]
macro_rules! pastiche_bitflags {
    (
        $(#[$attr:meta])*
        $vis:vis struct $name:ident: $ty:ty {
            $(
                $(#[$flag_attr:meta])*
                const $flag_name:ident = $flag_value:expr;
            )*
        }
    ) => {
        $(#[$attr])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
        $vis struct $name {
            bits: $ty,
        }

        impl $name {
            /// An empty set of flags.
            pub const EMPTY: Self = Self { bits: 0 };

            $(
                $(#[$flag_attr])*
                pub const $flag_name: Self = Self { bits: $flag_value };
            )*

            /// Builds a set from raw bits, keeping unknown bits.
            pub const fn from_bits_retain(bits: $ty) -> Self {
                Self { bits }
            }

            /// Returns the raw value of the set.
            pub const fn bits(&self) -> $ty {
                self.bits
            }

            /// Returns `true` if every flag in `other` is set in `self`.
            pub const fn contains(&self, other: Self) -> bool {
                (self.bits & other.bits) == other.bits
            }

            /// Returns `true` if any flag in `other` is set in `self`.
            pub const fn intersects(&self, other: Self) -> bool {
                (self.bits & other.bits) != 0
            }

            /// Returns `true` if no flag is set.
            pub const fn is_empty(&self) -> bool {
                self.bits == 0
            }

            /// Sets the flags in `other`.
            pub fn insert(&mut self, other: Self) {
                self.bits |= other.bits;
            }

            /// Clears the flags in `other`.
            pub fn remove(&mut self, other: Self) {
                self.bits &= !other.bits;
            }
        }

        impl core::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, other: Self) -> Self {
                Self { bits: self.bits | other.bits }
            }
        }

        impl core::ops::BitAnd for $name {
            type Output = Self;
            fn bitand(self, other: Self) -> Self {
                Self { bits: self.bits & other.bits }
            }
        }

        impl core::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, other: Self) {
                self.bits |= other.bits;
            }
        }

        impl core::fmt::Debug for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                let mut remaining = self.bits;
                let mut names = f.debug_set();
                $(
                    if $flag_value != 0 && (remaining & $flag_value) == $flag_value {
                        names.entry(&format_args!("{}", stringify!($flag_name)));
                        remaining &= !$flag_value;
                    }
                )*
                if remaining != 0 {
                    names.entry(&format_args!("{:#x}", remaining));
                }
                names.finish()
            }
        }
    };
}

#[cfg(test)]
mod tests {
    crate::pastiche_bitflags! {
        /// Flags used only by these tests.
        pub struct Probe: u32 {
            const READ = 1 << 0;
            const WRITE = 1 << 1;
            const MAP = 1 << 4;
        }
    }

    #[test]
    fn test_combination_and_containment() {
        let flags = Probe::READ | Probe::WRITE;
        assert!(flags.contains(Probe::READ));
        assert!(flags.contains(Probe::READ | Probe::WRITE));
        assert!(!flags.contains(Probe::MAP));
        assert!(flags.intersects(Probe::WRITE | Probe::MAP));
        assert!(Probe::default().is_empty());
    }

    #[test]
    fn test_insert_and_remove() {
        let mut flags = Probe::EMPTY;
        flags.insert(Probe::MAP);
        flags |= Probe::READ;
        assert_eq!(flags.bits(), 0b1_0001);
        flags.remove(Probe::MAP);
        assert_eq!(flags, Probe::READ);
    }

    #[test]
    fn test_debug_lists_named_and_unknown_bits() {
        assert_eq!(format!("{:?}", Probe::READ | Probe::MAP), "{READ, MAP}");
        assert_eq!(format!("{:?}", Probe::from_bits_retain(1 << 8)), "{0x100}");
        assert_eq!(format!("{:?}", Probe::EMPTY), "{}");
    }
}
