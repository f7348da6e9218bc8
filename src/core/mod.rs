// Domain-layer modules and shared errors/models
pub mod aggregator {
    pub use crate::aggregator::*;
}

pub mod scoring {
    pub use crate::scoring::*;
}

pub mod cache {
    pub use crate::cache::*;
}

pub mod limiter {
    pub use crate::limiter::*;
}

pub mod accounts {
    pub use crate::accounts::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
