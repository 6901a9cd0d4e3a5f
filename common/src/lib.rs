mod api;
mod wled;

pub use api::*;
pub use wled::*;
