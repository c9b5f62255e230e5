// ── Identity types ──
//
// Device ids are the hardware UUID; service ids are `{device}:{n}` or the
// bare device id for single-service hardware. Kept as distinct newtypes so
// a service id is never passed where a device id is expected.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Hardware device identifier.
    DeviceId
);

string_id!(
    /// Identifier of one service (valve, mower, sensor...) on a device.
    ServiceId
);

string_id!(
    /// Garden / site identifier.
    LocationId
);

impl ServiceId {
    /// The owning device: the part before the first `:`.
    pub fn device_id(&self) -> DeviceId {
        DeviceId::from(self.0.split(':').next().unwrap_or(&self.0))
    }
}
