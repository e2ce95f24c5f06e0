/// Authentication primitives
///
/// Password hashing, access token signing and refresh token generation.
/// None of these touch storage; the session manager composes them.

mod claims;
mod jwt;
mod password;
mod refresh_token;

pub use claims::Claims;
pub use jwt::TokenCodec;
pub use password::hash_password;
pub use password::verify_password;
pub use refresh_token::generate_refresh_token;
pub use refresh_token::hash_token;
pub use refresh_token::IssuedRefreshToken;
