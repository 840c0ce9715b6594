//! External service integrations.

pub mod llm_client {
    pub use crate::llm_client::*;
}

pub mod dataset {
    pub use crate::dataset::*;
}

pub mod persistence {
    pub use crate::persistence::*;
}
