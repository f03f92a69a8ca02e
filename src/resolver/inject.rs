//! Injection marker.

/// Says where a resolver entry point gets its handle from.
///
/// `Inject::Resolve` lets the resolver pick the ambient handle or open a
/// fresh one. `Inject::Provided` passes a caller-owned handle that is used
/// as-is and never closed by the resolver.
#[derive(Debug)]
pub enum Inject<'h, H> {
    Resolve,
    Provided(&'h H),
}

impl<'h, H> Inject<'h, H> {
    pub fn provided(&self) -> Option<&'h H> {
        match *self {
            Self::Resolve => None,
            Self::Provided(handle) => Some(handle),
        }
    }

    pub fn is_provided(&self) -> bool {
        matches!(self, Self::Provided(_))
    }
}

impl<H> Default for Inject<'_, H> {
    fn default() -> Self {
        Self::Resolve
    }
}

impl<H> Clone for Inject<'_, H> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H> Copy for Inject<'_, H> {}

impl<'h, H> From<&'h H> for Inject<'h, H> {
    fn from(handle: &'h H) -> Self {
        Self::Provided(handle)
    }
}

impl<'h, H> From<Option<&'h H>> for Inject<'h, H> {
    fn from(handle: Option<&'h H>) -> Self {
        handle.map_or(Self::Resolve, Self::Provided)
    }
}
