//! Vanity import metadata for `go get`.
//!
//! Tooling requests `https://<host>/<prefix>?go-get=1` and expects a
//! `go-import` meta tag naming the repository. Browsers get redirected to
//! the package documentation instead.

use std::collections::BTreeMap;

use axum::body::Body;
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::config::ImportConfig;
use crate::routing::matcher::Responder;

/// Serves a static table of imports keyed by path (without slashes).
#[derive(Debug, Clone)]
pub struct GoImportService {
    imports: BTreeMap<String, ImportConfig>,
}

impl GoImportService {
    pub fn new(imports: BTreeMap<String, ImportConfig>) -> Self {
        let imports = imports
            .into_iter()
            .map(|(path, import)| (path.trim_matches('/').to_string(), import))
            .collect();
        Self { imports }
    }

    fn lookup(&self, req: &Request<Body>) -> Option<&ImportConfig> {
        self.imports.get(req.uri().path().trim_matches('/'))
    }
}

fn is_go_get(req: &Request<Body>) -> bool {
    req.uri()
        .query()
        .and_then(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .find(|(k, _)| k == "go-get")
                .map(|(_, v)| v == "1")
        })
        .unwrap_or(false)
}

/// Render the meta tag for `import` served from `host`.
pub fn meta_tag(host: &str, import: &ImportConfig) -> String {
    format!(
        "<meta name=\"go-import\" content=\"{}\">\n",
        escape_html(&format!("{}/{} {} {}", host, import.prefix, import.vcs, import.repo))
    )
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

impl Responder for GoImportService {
    fn name(&self) -> &'static str {
        "go-import"
    }

    fn matches(&self, req: &Request<Body>) -> bool {
        self.lookup(req).is_some()
    }

    fn respond(&self, host: &str, req: &Request<Body>) -> Response {
        let Some(import) = self.lookup(req) else {
            return StatusCode::NOT_FOUND.into_response();
        };

        if is_go_get(req) {
            return (
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                meta_tag(host, import),
            )
                .into_response();
        }

        let location = import
            .redirect
            .clone()
            .unwrap_or_else(|| format!("https://godoc.org/{}{}", host, req.uri().path()));
        match HeaderValue::from_str(&location) {
            Ok(location) => (StatusCode::FOUND, [(header::LOCATION, location)]).into_response(),
            Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> GoImportService {
        let mut imports = BTreeMap::new();
        imports.insert(
            "server".to_string(),
            ImportConfig {
                prefix: "server".into(),
                vcs: "git".into(),
                repo: "https://github.com/example/server".into(),
                redirect: None,
            },
        );
        imports.insert(
            "/tools/".to_string(),
            ImportConfig {
                prefix: "tools".into(),
                vcs: "git".into(),
                repo: "https://github.com/example/tools".into(),
                redirect: Some("https://github.com/example/tools".into()),
            },
        );
        GoImportService::new(imports)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn serves_meta_tag_to_tooling() {
        let req = get("/server?go-get=1");
        let svc = service();
        assert!(svc.matches(&req));

        let res = svc.respond("example.org", &req);
        assert_eq!(res.status(), StatusCode::OK);
        let body = axum::body::to_bytes(res.into_body(), 1024).await.unwrap();
        assert_eq!(
            std::str::from_utf8(&body).unwrap(),
            "<meta name=\"go-import\" content=\"example.org/server git https://github.com/example/server\">\n"
        );
    }

    #[test]
    fn browsers_are_redirected() {
        let svc = service();

        let res = svc.respond("example.org", &get("/server/"));
        assert_eq!(res.status(), StatusCode::FOUND);
        assert_eq!(res.headers()[header::LOCATION], "https://godoc.org/example.org/server/");

        let res = svc.respond("example.org", &get("/tools"));
        assert_eq!(res.headers()[header::LOCATION], "https://github.com/example/tools");
    }

    #[test]
    fn only_first_go_get_value_counts() {
        let svc = service();
        let res = svc.respond("example.org", &get("/server?go-get=0&go-get=1"));
        assert_eq!(res.status(), StatusCode::FOUND);

        let res = svc.respond("example.org", &get("/server?x=y&go-get=1&go-get=0"));
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[test]
    fn unknown_paths_do_not_match() {
        assert!(!service().matches(&get("/other?go-get=1")));
    }

    #[test]
    fn meta_content_is_escaped() {
        let import = ImportConfig {
            prefix: "x".into(),
            vcs: "git".into(),
            repo: "https://example.org/?a=1&b=\"2\"".into(),
            redirect: None,
        };
        assert_eq!(
            meta_tag("h", &import),
            "<meta name=\"go-import\" content=\"h/x git https://example.org/?a=1&amp;b=&#34;2&#34;\">\n"
        );
    }
}
