mod auth;
mod health_check;

pub use auth::{
    delete_account, get_current_user, login, logout, logout_all, refresh, register, CookiePolicy,
    REFRESH_TOKEN_COOKIE,
};
pub use health_check::health_check;
