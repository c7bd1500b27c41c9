/// Declares a closed set of AMI names together with its parse error.
///
/// Used for header names and for the derived event kinds. Asterisk releases disagree on
/// header casing (`ActionID` / `ActionId`, `Uniqueid` / `UniqueID`), so lookups ignore
/// ASCII case while [`as_str`] always yields the spelling written to the wire.
///
/// ```ignore
/// define_wire_enum! {
///     /// Doc comment for the enum.
///     pub enum Foo: ParseFooError("foo") {
///         Bar => "Bar",
///         BazQux => "baz-qux",
///     }
/// }
/// ```
///
/// Generates the error struct (displayed as `unknown foo: <input>`), the enum, `ALL`,
/// `as_str`, `lookup`, `Display`, `AsRef<str>` and `FromStr`.
macro_rules! define_wire_enum {
    (
        $(#[$enum_meta:meta])*
        $vis:vis enum $Name:ident : $Err:ident($label:literal) {
            $(
                $(#[$var_meta:meta])*
                $variant:ident => $wire:literal
            ),+ $(,)?
        }
    ) => {
        #[doc = concat!("Error returned for a string that is not a known ", $label, ".")]
        #[derive(Debug, Clone, PartialEq, Eq)]
        $vis struct $Err(pub String);

        impl std::fmt::Display for $Err {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!("unknown ", $label, ": {}"), self.0)
            }
        }

        impl std::error::Error for $Err {}

        $(#[$enum_meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[non_exhaustive]
        #[allow(missing_docs)]
        $vis enum $Name {
            $(
                $(#[$var_meta])*
                $variant,
            )+
        }

        impl $Name {
            /// Every name, in declaration order
            pub const ALL: &'static [$Name] = &[ $( $Name::$variant, )+ ];

            /// Spelling used on the wire
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $( $Name::$variant => $wire, )+
                }
            }

            /// Case-insensitive lookup
            pub fn lookup(name: &str) -> Option<Self> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|known| {
                        known
                            .as_str()
                            .eq_ignore_ascii_case(name)
                    })
            }
        }

        impl std::fmt::Display for $Name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl AsRef<str> for $Name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl std::str::FromStr for $Name {
            type Err = $Err;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::lookup(s).ok_or_else(|| $Err(s.to_string()))
            }
        }
    };
}
