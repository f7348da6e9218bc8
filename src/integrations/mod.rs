//! Source adapters over the raw-record store.

pub mod profile_source {
    pub use crate::profile_source::*;
}

pub mod registration_source {
    pub use crate::registration_source::*;
}
