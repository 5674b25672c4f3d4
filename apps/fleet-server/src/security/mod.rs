pub mod client_ip;
pub mod headers;
pub mod login_guard;
pub mod rate_limiter;

pub use client_ip::resolve_client_ip;
pub use headers::security_headers;
pub use login_guard::LoginGuard;
pub use rate_limiter::ApiRateLimiter;
