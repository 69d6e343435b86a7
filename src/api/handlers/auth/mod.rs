//! Authentication endpoints and the helpers handlers use to require an
//! authenticated, 2FA-verified or CSRF-protected request.

pub mod csrf;
pub mod login;
pub mod logout;
pub mod refresh;
pub mod session;
pub mod two_factor;
pub mod types;

mod principal;
mod tokens;
mod utils;

pub use csrf::{require_csrf, CSRF_HEADER};
pub use principal::{require_auth, require_verified};
