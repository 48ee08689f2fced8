use serde::Deserialize;
use url::Url;

/// Configuration for CORS (Cross-Origin Resource Sharing).
#[derive(Clone, Default, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// If false (or not defined), credentials are not allowed in requests.
    pub allow_credentials: bool,
    /// Origins from which we allow requests.
    pub allow_origins: Option<AnyOrUrlArray>,
    /// Maximum time in seconds between OPTIONS and the next request.
    pub max_age: Option<u64>,
    /// HTTP methods allowed to the endpoint.
    pub allow_methods: Option<Vec<HttpMethod>>,
    /// Headers allowed in incoming requests.
    pub allow_headers: Option<Vec<String>>,
    /// Headers exposed in responses.
    pub expose_headers: Option<Vec<String>>,
}

/// Either a wildcard, or an explicit list of origin URLs.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum AnyOrUrlArray {
    /// The literal string `"any"`.
    Any(AnyKeyword),
    /// An explicit list of allowed origins.
    Explicit(Vec<Url>),
}

/// Serde helper matching only the literal string `"any"`.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum AnyKeyword {
    /// Allow every origin.
    Any,
}

/// Represents a standard HTTP method.
#[derive(Debug, PartialEq, Clone, Copy, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// The GET method requests a representation of the specified resource.
    Get,
    /// The POST method submits an entity to the specified resource.
    Post,
    /// The PUT method replaces all current representations of the target resource.
    Put,
    /// The DELETE method deletes the specified resource.
    Delete,
    /// The HEAD method asks for a response identical to GET, without the body.
    Head,
    /// The OPTIONS method describes the communication options for the target resource.
    Options,
    /// The PATCH method applies partial modifications to a resource.
    Patch,
}

impl From<HttpMethod> for http::Method {
    fn from(value: HttpMethod) -> Self {
        match value {
            HttpMethod::Get => http::Method::GET,
            HttpMethod::Post => http::Method::POST,
            HttpMethod::Put => http::Method::PUT,
            HttpMethod::Delete => http::Method::DELETE,
            HttpMethod::Head => http::Method::HEAD,
            HttpMethod::Options => http::Method::OPTIONS,
            HttpMethod::Patch => http::Method::PATCH,
        }
    }
}
