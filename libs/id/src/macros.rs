//! Macros for defining typed UUID identifiers.

/// Macro to define a typed identifier wrapping a UUID.
///
/// This generates a newtype with:
/// - A `KIND` constant used in error messages
/// - `from_uuid()` which rejects the nil UUID
/// - `parse()` which also rejects empty and nil input
/// - `Display`, `FromStr`, `Serialize` and `Deserialize`
/// - `Ord` and `Hash` so the type can key maps and sets
///
/// # Example
///
/// ```ignore
/// define_uuid!(NodeUuid, "node");
///
/// let node: NodeUuid = "0e2b1f0c-6a6e-4b8e-9d5b-55c2c7f2e1a4".parse()?;
/// ```
#[macro_export]
macro_rules! define_uuid {
    ($name:ident, $kind:literal) => {
        /// A typed UUID identifier.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name($crate::Uuid);

        impl $name {
            /// Human readable name of what this identifies.
            pub const KIND: &'static str = $kind;

            /// Wraps a raw UUID. Returns `None` for the nil UUID.
            #[must_use]
            pub fn from_uuid(uuid: $crate::Uuid) -> Option<Self> {
                if uuid.is_nil() {
                    None
                } else {
                    Some(Self(uuid))
                }
            }

            /// Returns the underlying UUID.
            #[must_use]
            pub const fn uuid(&self) -> $crate::Uuid {
                self.0
            }

            /// Parses an identifier from a UUID string.
            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                let s = s.trim();
                if s.is_empty() {
                    return Err($crate::IdError::Empty);
                }

                let uuid = $crate::Uuid::try_parse(s).map_err(|e| $crate::IdError::InvalidUuid {
                    input: s.to_string(),
                    message: e.to_string(),
                })?;

                Self::from_uuid(uuid).ok_or($crate::IdError::Nil { kind: Self::KIND })
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0.hyphenated())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.collect_str(self)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }

        impl AsRef<$crate::Uuid> for $name {
            fn as_ref(&self) -> &$crate::Uuid {
                &self.0
            }
        }
    };
}
