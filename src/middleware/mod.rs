/// Middleware module
///
/// Access token extraction for protected routes.

mod jwt_middleware;

pub use jwt_middleware::{JwtMiddleware, ACCESS_TOKEN_COOKIE};
