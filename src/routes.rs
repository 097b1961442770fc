//! Route names and the rules that classify request paths.

pub const LOGIN_ROUTE: &str = "/login";
pub const SIGNUP_ROUTE: &str = "/signup";
pub const VERIFY_OTP_ROUTE: &str = "/verify-otp";
pub const FORGOT_PASSWORD_ROUTE: &str = "/forgot-password";
pub const RESET_PASSWORD_ROUTE: &str = "/reset-password";
pub const BUSINESS_SETUP_ROUTE: &str = "/business-setup";
pub const DASHBOARD_ROUTE: &str = "/dashboard";
pub const SESSION_API_ROUTE: &str = "/api/session";
pub const LOGOUT_ROUTE: &str = "/logout";

/// Query parameter carrying the page to return to after signing in
pub const REDIRECT_PARAM: &str = "redirectTo";

/// Pages that only make sense while signed out
pub const AUTH_ROUTES: [&str; 5] = [
    LOGIN_ROUTE,
    SIGNUP_ROUTE,
    VERIFY_OTP_ROUTE,
    FORGOT_PASSWORD_ROUTE,
    RESET_PASSWORD_ROUTE,
];

const PUBLIC_PREFIXES: [&str; 4] = ["/static", "/favicon.ico", SESSION_API_ROUTE, LOGOUT_ROUTE];

fn matches_route(path: &str, route: &str) -> bool {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    path == route
        || path
            .strip_prefix(route)
            .is_some_and(|rest| rest.starts_with('/'))
}

pub fn is_auth_route(path: &str) -> bool {
    AUTH_ROUTES.iter().any(|route| matches_route(path, route))
}

/// Paths the guard lets through without looking at the session
pub fn is_public_route(path: &str) -> bool {
    PUBLIC_PREFIXES.iter().any(|route| matches_route(path, route))
}

pub fn is_api_route(path: &str) -> bool {
    matches_route(path, "/api")
}

/// Accept only same-site absolute paths as return targets
pub fn safe_return_path(candidate: Option<&str>) -> Option<&str> {
    candidate
        .map(str::trim)
        .filter(|path| path.starts_with('/') && !path.starts_with("//") && !path.contains('\\'))
}

/// Login URL that brings the user back to `original` afterwards
#[cfg(feature = "web")]
pub fn login_redirect(original: &str) -> String {
    match safe_return_path(Some(original)) {
        Some(path) if path != "/" && !is_auth_route(path) => format!(
            "{}?{}={}",
            LOGIN_ROUTE,
            REDIRECT_PARAM,
            urlencoding::encode(path)
        ),
        _ => LOGIN_ROUTE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_routes_match_whole_segments() {
        assert!(is_auth_route("/login"));
        assert!(is_auth_route("/reset-password/confirm"));
        assert!(!is_auth_route("/login-history"));
        assert!(!is_auth_route("/dashboard"));
        assert!(is_auth_route("/login?registered=true"));
    }

    #[test]
    fn public_routes_skip_the_guard() {
        assert!(is_public_route("/static/app.css"));
        assert!(is_public_route("/api/session"));
        assert!(is_public_route("/logout"));
        assert!(!is_public_route("/api/customers"));
    }

    #[test]
    fn return_paths_must_stay_on_site() {
        assert_eq!(safe_return_path(Some("/customers?page=2")), Some("/customers?page=2"));
        assert_eq!(safe_return_path(Some("//evil.example")), None);
        assert_eq!(safe_return_path(Some("https://evil.example")), None);
        assert_eq!(safe_return_path(None), None);
    }

    #[cfg(feature = "web")]
    #[test]
    fn login_redirect_carries_the_original_path() {
        assert_eq!(
            login_redirect("/customers?sort=points"),
            "/login?redirectTo=%2Fcustomers%3Fsort%3Dpoints"
        );
        assert_eq!(login_redirect("/"), "/login");
        assert_eq!(login_redirect("/login"), "/login");
    }
}
