mod admin_auth;
mod response_signing;

pub use admin_auth::*;
pub use response_signing::*;
