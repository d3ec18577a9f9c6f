use crate::Category;

/// One entry in the ordered route-classification table.
#[derive(Debug, Clone, Copy)]
pub struct RouteRule {
    /// Path to match, either exactly or as a prefix.
    pub pattern: &'static str,
    /// When false, the pattern matches any path it prefixes.
    pub exact: bool,
    /// Methods this rule applies to; `None` matches every method.
    pub methods: Option<&'static [&'static str]>,
    /// Category assigned on match.
    pub category: Category,
}

/// Route classification table. Order is part of the contract: the first
/// matching rule wins, so narrower prefixes must stay above the `/api/`
/// catch-all.
pub const ROUTE_RULES: &[RouteRule] = &[
    RouteRule {
        pattern: "/health",
        exact: true,
        methods: None,
        category: Category::Health,
    },
    RouteRule {
        pattern: "/api/health",
        exact: true,
        methods: None,
        category: Category::Health,
    },
    RouteRule {
        pattern: "/api/auth/",
        exact: false,
        methods: None,
        category: Category::Authentication,
    },
    RouteRule {
        pattern: "/api/webhooks/",
        exact: false,
        methods: None,
        category: Category::Webhook,
    },
    RouteRule {
        pattern: "/api/uploads/",
        exact: false,
        methods: Some(&["POST", "PUT"]),
        category: Category::FileUpload,
    },
    RouteRule {
        pattern: "/api/documents",
        exact: false,
        methods: Some(&["POST", "PUT"]),
        category: Category::FileUpload,
    },
    RouteRule {
        pattern: "/api/",
        exact: false,
        methods: None,
        category: Category::Api,
    },
];

/// Path prefixes that never consume admission quota.
const EXCLUDED_PREFIXES: &[&str] = &["/static/", "/assets/"];

/// Exact paths that never consume admission quota.
const EXCLUDED_PATHS: &[&str] = &["/favicon.ico", "/robots.txt"];

impl RouteRule {
    fn matches(&self, path: &str, method: &str) -> bool {
        let path_matches = if self.exact {
            path == self.pattern
        } else {
            path.starts_with(self.pattern)
        };

        if !path_matches {
            return false;
        }

        match self.methods {
            Some(methods) => methods
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(method)),
            None => true,
        }
    }
}

/// Classifies a request path and method into a traffic category.
///
/// Evaluates [`ROUTE_RULES`] in declared order; anything unmatched is
/// `public`.
#[must_use]
pub fn resolve_category(path: &str, method: &str) -> Category {
    ROUTE_RULES
        .iter()
        .find(|rule| rule.matches(path, method))
        .map_or(Category::Public, |rule| rule.category)
}

/// Returns true for static-asset style paths that bypass admission control
/// entirely: no quota is consumed and no violation is ever recorded.
#[must_use]
pub fn is_excluded_path(path: &str) -> bool {
    EXCLUDED_PATHS.contains(&path)
        || EXCLUDED_PREFIXES
            .iter()
            .any(|prefix| path.starts_with(prefix))
}
