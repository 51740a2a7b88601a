//! Identity shared by every wrapper
//!
//! A wrapper owns at most one kernel object. Its [`Handle`] is null until the
//! object exists, and the object is deleted exactly once, when the wrapper is
//! dropped.

use crate::kernel::queue_set::Member;
use crate::kernel::Result;
use crate::types::Handle;

/// A wrapper around one kernel object.
pub trait Waitable {
    /// Handle of the kernel object, null if creation failed or has not
    /// happened yet.
    fn handle(&self) -> Handle;

    fn is_created(&self) -> bool {
        !self.handle().is_null()
    }

    /// Whether `handle` (typically returned by `QueueSet::select`) refers to
    /// this wrapper. A null handle matches nothing.
    fn matches(&self, handle: Handle) -> bool {
        !handle.is_null() && self.handle() == handle
    }
}

/// A wrapper that can be added to a [`QueueSet`](super::QueueSet).
pub trait SetMember: Waitable + sealed::Sealed {
    /// Most events this member can have pending in a set at once. The sum
    /// over all members of a set must not exceed the set's capacity.
    ///
    /// 0 while the wrapper is not created.
    fn event_cost(&self) -> usize;

    #[doc(hidden)]
    fn member(&self) -> Option<&dyn Member>;
}

pub(crate) mod sealed {
    pub trait Sealed {}
}

pub(crate) fn handle_of<M: Member>(object: &Option<M>) -> Handle {
    object.as_ref().map_or(Handle::NULL, Member::handle)
}

pub(crate) fn cost_of<M: Member>(object: &Option<M>) -> usize {
    object.as_ref().map_or(0, Member::event_cost)
}

/// Runs the kernel constructor on a region, keeping the object on success.
/// Failures are already reported by the kernel's trace hooks.
pub(crate) fn build<R, O>(region: Result<R>, create: impl FnOnce(R) -> Result<O>) -> Option<O> {
    region.and_then(create).ok()
}
