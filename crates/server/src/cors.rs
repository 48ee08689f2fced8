use std::time::Duration;

use config::{AnyOrUrlArray, CorsConfig};
use http::{HeaderName, HeaderValue};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer, ExposeHeaders};

pub(super) fn generate(config: &CorsConfig) -> CorsLayer {
    let mut cors_layer = CorsLayer::new().allow_credentials(config.allow_credentials);

    if let Some(allow_origins) = &config.allow_origins {
        cors_layer = cors_layer.allow_origin(match allow_origins {
            AnyOrUrlArray::Any(_) => AllowOrigin::any(),
            AnyOrUrlArray::Explicit(origins) => {
                let origins = origins
                    .iter()
                    .filter_map(|origin| {
                        // Scheme and authority only, the path is not part of
                        // an origin.
                        let origin = &origin[..url::Position::BeforePath];
                        HeaderValue::from_str(origin).ok()
                    })
                    .collect::<Vec<_>>();

                AllowOrigin::list(origins)
            }
        });
    }

    if let Some(max_age) = config.max_age {
        cors_layer = cors_layer.max_age(Duration::from_secs(max_age));
    }

    if let Some(allow_methods) = &config.allow_methods {
        let mut methods: Vec<http::Method> = allow_methods.iter().map(|method| http::Method::from(*method)).collect();

        // Preflight always needs OPTIONS when explicit methods are configured.
        if !methods.contains(&http::Method::OPTIONS) {
            methods.push(http::Method::OPTIONS);
        }

        cors_layer = cors_layer.allow_methods(AllowMethods::list(methods));
    }

    if let Some(allow_headers) = &config.allow_headers {
        cors_layer = cors_layer.allow_headers(AllowHeaders::list(parse_header_names(allow_headers)));
    }

    if let Some(expose_headers) = &config.expose_headers {
        cors_layer = cors_layer.expose_headers(ExposeHeaders::list(parse_header_names(expose_headers)));
    }

    cors_layer
}

fn parse_header_names(names: &[String]) -> Vec<HeaderName> {
    names
        .iter()
        .filter_map(|name| match name.parse::<HeaderName>() {
            Ok(name) => Some(name),
            Err(_) => {
                log::warn!("Ignoring invalid CORS header name: {name}");
                None
            }
        })
        .collect()
}
