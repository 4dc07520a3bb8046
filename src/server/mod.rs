mod admin;
pub mod dto;
pub mod keys;
pub mod pow;
pub mod response;
mod router;
pub mod trace;
pub mod user;
pub mod validation;

pub use admin::admin_router;
pub use router::{AppState, create_router};
pub use user::user_router;
