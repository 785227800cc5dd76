//! Provider-side abstractions installed into the dispatcher.

use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Interface version advertised by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    pub major_version: i32,
    pub minor_version: i32,
}

impl Version {
    pub fn new(major_version: i32, minor_version: i32) -> Self {
        Self {
            major_version,
            minor_version,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major_version, self.minor_version)
    }
}

/// A provider callable installed under a participant id.
///
/// The request interpreter downcasts through [`RequestCaller::as_any`] to
/// the concrete provider type registered for the interface, so every
/// implementation returns `self` there.
pub trait RequestCaller: Send + Sync + 'static {
    /// Fully qualified interface name this provider implements.
    fn interface_name(&self) -> &str;

    /// Version of the implemented interface.
    fn provider_version(&self) -> Version;

    /// Concrete-type access for interpreter adapters.
    fn as_any(&self) -> &dyn Any;
}
