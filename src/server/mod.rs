mod admin;
pub mod dto;
pub mod response;
mod router;
mod session;
mod user;
pub mod validation;

pub use router::{AppState, create_router};
