// Domain-layer modules and shared errors/models
pub mod composer {
    pub use crate::composer::*;
}

pub mod locator {
    pub use crate::locator::*;
}

pub mod signals {
    pub use crate::signals::*;
}

pub mod pipeline {
    pub use crate::pipeline::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
