//! Storage: raw records, Postgres pool and stores.

pub mod raw_store {
    pub use crate::raw_store::*;
}

pub mod db {
    pub use crate::db::*;
}

pub mod db_storage {
    pub use crate::db_storage::*;
}
