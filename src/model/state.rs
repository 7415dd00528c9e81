use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CatalogError;

macro_rules! lifecycle_states {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::ALL[0]
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = CatalogError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(CatalogError::validation(format!(
                        "'{}' is not a valid {} state",
                        other, $kind
                    ))),
                }
            }
        }
    };
}

lifecycle_states!(
    InstanceState, "Instance" {
        Requested => "requested",
        Deploying => "deploying",
        Failure => "failure",
        Stopped => "stopped",
        StartRequested => "start-requested",
        Starting => "starting",
        Running => "running",
        Reconfiguring => "reconfiguring",
        StopRequested => "stop-requested",
        Stopping => "stopping",
        DestroyRequested => "destroy-requested",
        Destroying => "destroying",
        Unavailable => "unavailable",
    }
);

lifecycle_states!(
    ServiceState, "Service" {
        Deploying => "deploying",
        Ready => "ready",
        Offline => "offline",
    }
);

lifecycle_states!(
    ImageState, "Image" {
        Requested => "requested",
        Pending => "pending",
        Building => "building",
        Error => "error",
        Ready => "ready",
        Removing => "removing",
    }
);

lifecycle_states!(
    TemplateState, "Template" {
        InProgress => "in-progress",
        Ready => "ready",
        Unavailable => "unavailable",
    }
);
