use http::Method;

/// What the gateway does with a request below `/proxy/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Login,
    Register,
    Verify,
    ResendVerification,
    ChangePassword,
    Forward,
}

impl RouteKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            RouteKind::Login => "login",
            RouteKind::Register => "register",
            RouteKind::Verify => "verify",
            RouteKind::ResendVerification => "resend_verification",
            RouteKind::ChangePassword => "change_password",
            RouteKind::Forward => "forward",
        }
    }
}

#[derive(Debug)]
struct PathPattern {
    segments: Vec<String>,
    has_trailing_splat: bool,
}

impl PathPattern {
    /// Parses a path pattern string.
    /// Supports:
    /// - Static segments: "auth/login"
    /// - Trailing splat: "auth/*"
    fn parse(pattern: &str) -> Self {
        let mut normalized = pattern.trim().trim_matches('/');

        let mut has_trailing_splat = false;
        if normalized == "*" {
            has_trailing_splat = true;
            normalized = "";
        } else if let Some(stripped) = normalized.strip_suffix("/*") {
            has_trailing_splat = true;
            normalized = stripped;
        }

        let segments = if normalized.is_empty() {
            vec![]
        } else {
            normalized.split('/').map(String::from).collect()
        };

        PathPattern {
            segments,
            has_trailing_splat,
        }
    }

    /// Trailing slash normalization is applied to the request path.
    fn matches(&self, request_path: &str) -> bool {
        let normalized = request_path.trim().trim_matches('/');
        let request_segments: Vec<&str> = if normalized.is_empty() {
            vec![]
        } else {
            normalized.split('/').collect()
        };

        if request_segments.len() < self.segments.len() {
            return false;
        }

        let prefix_matches = self
            .segments
            .iter()
            .zip(&request_segments)
            .all(|(expected, actual)| expected == actual);

        prefix_matches
            && (self.has_trailing_splat || request_segments.len() == self.segments.len())
    }
}

#[derive(Debug)]
struct Route {
    path: PathPattern,
    methods: Vec<Method>,
    kind: RouteKind,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Resolution {
    Matched(RouteKind),
    /// The path has a route, but not for this method.
    MethodNotAllowed,
}

/// Ordered route table; the first route whose path matches decides.
#[derive(Debug)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    fn route(path: &str, methods: &[Method], kind: RouteKind) -> Route {
        Route {
            path: PathPattern::parse(path),
            methods: methods.to_vec(),
            kind,
        }
    }

    pub fn resolve(&self, method: &Method, path: &str) -> Resolution {
        match self.routes.iter().find(|route| route.path.matches(path)) {
            Some(route) if route.methods.contains(method) => Resolution::Matched(route.kind),
            _ => Resolution::MethodNotAllowed,
        }
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        RouteTable {
            routes: vec![
                Self::route("auth/login", &[Method::POST], RouteKind::Login),
                Self::route("auth/register", &[Method::POST], RouteKind::Register),
                Self::route("auth/verify", &[Method::GET], RouteKind::Verify),
                Self::route(
                    "auth/resend-verification",
                    &[Method::POST],
                    RouteKind::ResendVerification,
                ),
                Self::route(
                    "user/change-password",
                    &[Method::POST, Method::PATCH],
                    RouteKind::ChangePassword,
                ),
                Self::route(
                    "*",
                    &[Method::GET, Method::POST, Method::PATCH],
                    RouteKind::Forward,
                ),
            ],
        }
    }
}
