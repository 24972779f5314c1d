//! Request classification.
//!
//! Deciding how a request is served is a pure function of its method,
//! scheme, destination and path. The decision table is an ordered list of
//! predicate/route pairs; the first predicate that holds wins.

use reqwest::Method;

use crate::config::WorkerConfig;
use crate::net::{Destination, Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Serve from the bucket, touching the network only on a miss.
    CacheFirst,
    /// Go to the network, falling back to the bucket when it fails.
    NetworkFirst,
    /// Serve from the bucket immediately and refresh it in the background.
    StaleWhileRevalidate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Not intercepted; goes straight to the network.
    Passthrough,
    Intercept(Strategy),
}

type Predicate = fn(&Classifier, &Request) -> bool;

const RULES: &[(Predicate, Route)] = &[
    (Classifier::is_not_get, Route::Passthrough),
    (Classifier::is_not_http, Route::Passthrough),
    (Classifier::is_api, Route::Intercept(Strategy::NetworkFirst)),
    (Classifier::is_static_asset, Route::Intercept(Strategy::CacheFirst)),
    (Classifier::is_document, Route::Intercept(Strategy::StaleWhileRevalidate)),
];

const DEFAULT_ROUTE: Route = Route::Intercept(Strategy::NetworkFirst);

#[derive(Debug, Clone)]
pub struct Classifier {
    api_prefix: String,
    asset_prefixes: Vec<String>,
}

impl Classifier {
    pub fn new(api_prefix: &str, asset_prefixes: &[String]) -> Self {
        Self {
            api_prefix: api_prefix.to_string(),
            asset_prefixes: asset_prefixes.to_vec(),
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(&config.api_prefix, &config.asset_prefixes)
    }

    pub fn classify(&self, request: &Request) -> Route {
        RULES
            .iter()
            .find(|(applies, _)| applies(self, request))
            .map(|(_, route)| *route)
            .unwrap_or(DEFAULT_ROUTE)
    }

    fn is_not_get(&self, request: &Request) -> bool {
        request.method != Method::GET
    }

    fn is_not_http(&self, request: &Request) -> bool {
        !matches!(request.url.scheme(), "http" | "https")
    }

    /// Whether the request path lies under the API namespace.
    pub fn is_api(&self, request: &Request) -> bool {
        under_prefix(request.path(), &self.api_prefix)
    }

    fn is_static_asset(&self, request: &Request) -> bool {
        matches!(
            request.destination,
            Destination::Image | Destination::Style | Destination::Script
        ) || self
            .asset_prefixes
            .iter()
            .any(|prefix| under_prefix(request.path(), prefix))
    }

    fn is_document(&self, request: &Request) -> bool {
        request.is_navigation()
    }
}

/// `/api/` covers `/api` and `/api/...` but not `/apiary`.
fn under_prefix(path: &str, prefix: &str) -> bool {
    let bare = prefix.trim_end_matches('/');
    path == bare || path.starts_with(&format!("{}/", bare))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Url;

    fn classifier() -> Classifier {
        Classifier::from_config(&WorkerConfig::default())
    }

    fn get(url: &str) -> Request {
        Request::get(Url::parse(url).unwrap())
    }

    #[test]
    fn test_non_get_passes_through() {
        let request = get("https://club.example/api/bets").with_method(Method::POST);
        assert_eq!(classifier().classify(&request), Route::Passthrough);
    }

    #[test]
    fn test_non_http_passes_through() {
        let request = get("chrome-extension://abc/script.js").with_destination(Destination::Script);
        assert_eq!(classifier().classify(&request), Route::Passthrough);
    }

    #[test]
    fn test_api_is_network_first_even_for_documents() {
        let request = get("https://club.example/api/teams").with_destination(Destination::Document);
        assert_eq!(
            classifier().classify(&request),
            Route::Intercept(Strategy::NetworkFirst)
        );
        assert_eq!(
            classifier().classify(&get("https://club.example/api")),
            Route::Intercept(Strategy::NetworkFirst)
        );
    }

    #[test]
    fn test_assets_are_cache_first() {
        let c = classifier();
        for request in [
            get("https://club.example/icons/icon-192.png"),
            get("https://club.example/images/banner.jpg"),
            get("https://club.example/static/app.js").with_destination(Destination::Script),
            get("https://club.example/static/app.css").with_destination(Destination::Style),
            get("https://cdn.example/logo.svg").with_destination(Destination::Image),
        ] {
            assert_eq!(
                c.classify(&request),
                Route::Intercept(Strategy::CacheFirst),
                "{}",
                request.url
            );
        }
    }

    #[test]
    fn test_navigation_is_stale_while_revalidate() {
        let request = Request::navigate(Url::parse("https://club.example/community").unwrap());
        assert_eq!(
            classifier().classify(&request),
            Route::Intercept(Strategy::StaleWhileRevalidate)
        );
    }

    #[test]
    fn test_everything_else_is_network_first() {
        let c = classifier();
        assert_eq!(
            c.classify(&get("https://club.example/manifest.json")),
            Route::Intercept(Strategy::NetworkFirst)
        );
        // Only a path segment match counts as the API namespace
        assert_eq!(
            c.classify(&get("https://club.example/apiary").with_destination(Destination::Document)),
            Route::Intercept(Strategy::StaleWhileRevalidate)
        );
        let font = get("https://club.example/fonts/a.woff2").with_destination(Destination::Font);
        assert_eq!(c.classify(&font), Route::Intercept(Strategy::NetworkFirst));
    }
}
