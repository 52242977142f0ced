//! Credentials used to authenticate both the streaming session and,
//! optionally, metadata lookups for custom (non-standard) indicators.

/// The cookies/token pair the metadata provider accepts for authenticated
/// lookups of `USER;`/`PUB;` indicators. Absent for anonymous sessions,
/// which can still resolve `STD;` indicators.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthCookies {
    pub session_id: String,
    pub session_id_sign: String,
}

impl AuthCookies {
    pub fn new(session_id: impl Into<String>, session_id_sign: impl Into<String>) -> Self {
        Self { session_id: session_id.into(), session_id_sign: session_id_sign.into() }
    }

    /// Renders as a `Cookie:` header value.
    pub fn to_header_value(&self) -> String {
        format!("sessionid={}; sessionid_sign={}", self.session_id, self.session_id_sign)
    }
}

/// Supplies the auth token used by `set_auth_token` and the cookies used
/// by authenticated metadata lookups. Kept as a trait so production
/// credential sourcing (environment, secret store, interactive login) can
/// vary without touching the streaming or metadata code.
pub trait CredentialStore: Send + Sync {
    /// The token passed to `set_auth_token`. `"unauthorized_user_token"`
    /// is the well-known anonymous value.
    fn auth_token(&self) -> String;

    /// Cookies for authenticated metadata lookups, if any.
    fn cookies(&self) -> Option<AuthCookies>;
}

/// A `CredentialStore` backed by values fixed at construction time.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    token: String,
    cookies: Option<AuthCookies>,
}

impl StaticCredentials {
    pub fn anonymous() -> Self {
        Self { token: "unauthorized_user_token".to_string(), cookies: None }
    }

    pub fn authenticated(token: impl Into<String>, cookies: AuthCookies) -> Self {
        Self { token: token.into(), cookies: Some(cookies) }
    }
}

impl CredentialStore for StaticCredentials {
    fn auth_token(&self) -> String {
        self.token.clone()
    }

    fn cookies(&self) -> Option<AuthCookies> {
        self.cookies.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_credentials_carry_no_cookies() {
        let creds = StaticCredentials::anonymous();
        assert_eq!(creds.auth_token(), "unauthorized_user_token");
        assert!(creds.cookies().is_none());
    }

    #[test]
    fn authenticated_credentials_render_a_cookie_header() {
        let creds = StaticCredentials::authenticated("tok", AuthCookies::new("sid", "sig"));
        assert_eq!(creds.cookies().unwrap().to_header_value(), "sessionid=sid; sessionid_sign=sig");
    }
}
