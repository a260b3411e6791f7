//! FLAME: forwarding layer for meshing
//!
//! A flat alternative to HWMP with hop count as the only metric and no
//! control traffic. Paths are learned from the data itself.

mod header;
mod protocol;
mod rtable;

pub use header::FlameHeader;
pub use protocol::{FlameConfig, FlameProtocol, FlameStats};
pub use rtable::{FlameLookupResult, FlameRoute, FlameRtable, MAX_COST};
