pub mod color;
pub mod config;
pub mod error;
pub mod revert;
pub mod uart;
pub mod wled;

pub mod prelude {
    pub use crate::{
        color::*, config::*, error::*, revert::*, uart::*, wled::*,
    };
}
