use tracing::info;

/// Route of the login entry point
pub const LOGIN_ROUTE: &str = "/login";

/// Redirect capability used by the logout cascade
pub trait Navigator: Send + Sync {
    fn go_to_login(&self);
}

/// Navigator for headless shells: records the redirect in the log only
#[derive(Debug, Default)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn go_to_login(&self) {
        info!(route = LOGIN_ROUTE, "Session ended, login required");
    }
}
