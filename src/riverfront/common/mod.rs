mod errors;
mod bytes;
mod coarse_clock;
mod atomic_cell;
mod atomic_ref;
mod atomic_refcell;
mod atomic_arc;
mod ark;
mod util;
mod utf8;
mod math;
mod spsc;
mod version;

pub use self::errors::{Error, Result, ErrorKind, ErrorSeverity, ClientErrorKind};
pub use self::bytes::{bytes_to_slice_mut, unsplit_bytes, bytes_are_contiguous};
pub use self::coarse_clock::{coarse_monotonic_now, coarse_monotonic_clock_updater};
pub use self::atomic_cell::AtomicCell;
pub use self::atomic_ref::AtomicRef;
pub use self::atomic_refcell::AtomicRefCell;
pub use self::atomic_arc::AtomicArc;
pub use self::ark::{Ark, AtomicRefCounted};
pub use self::util::{change_lifetime, change_lifetime_mut};
pub use self::math::fast_modulo32;
pub use self::spsc::SpscQueue;
pub use self::version::Version;
