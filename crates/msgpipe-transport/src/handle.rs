use std::fmt;

/// An owned reference to a message pipe endpoint.
///
/// Handles are neither `Copy` nor `Clone`: whoever holds the value owns the
/// endpoint. Sending a handle moves it into the message, and the invalid
/// sentinel is left behind wherever a handle was taken out.
#[derive(PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u32);

impl Handle {
    /// The invalid sentinel. Raw value `0` never names an endpoint.
    pub const INVALID: Handle = Handle(0);

    /// Wrap a raw endpoint identifier.
    ///
    /// The caller asserts ownership of the endpoint; creating two `Handle`
    /// values for the same identifier only leads to `InvalidHandle` errors
    /// once one of them is closed.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw endpoint identifier.
    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Whether this is anything other than the invalid sentinel.
    pub const fn is_valid(&self) -> bool {
        self.0 != Self::INVALID.0
    }

    /// Move the handle out, leaving the invalid sentinel in its place.
    pub fn take(&mut self) -> Handle {
        std::mem::replace(self, Handle::INVALID)
    }
}

impl Default for Handle {
    fn default() -> Self {
        Handle::INVALID
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "Handle({})", self.0)
        } else {
            f.write_str("Handle(invalid)")
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
