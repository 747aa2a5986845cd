// Builds the outbound header set for upstream calls. Only the caller's
// credentials are carried over; everything else is fixed by the gateway.
// Credential values are copied as opaque bytes and never decoded or logged.

use http::Version;
use http::header::{
    ACCEPT, AUTHORIZATION, CONTENT_TYPE, COOKIE, HeaderMap, HeaderName, HeaderValue, VIA,
};

const PROXY_NAME: &str = "dashgate";

static PROPAGATED_NAMES: &[HeaderName] = &[AUTHORIZATION, COOKIE];

/// Copies `Authorization` and `Cookie` from the inbound request and pins the
/// JSON content negotiation headers.
pub fn propagate(inbound: &HeaderMap, version: Version) -> HeaderMap {
    let mut outbound = HeaderMap::new();

    for name in PROPAGATED_NAMES {
        if let Some(value) = inbound.get(name) {
            outbound.insert(name.clone(), value.clone());
        }
    }

    let json = HeaderValue::from_static("application/json");
    outbound.insert(CONTENT_TYPE, json.clone());
    outbound.insert(ACCEPT, json);
    add_via_header(&mut outbound, inbound, version);

    outbound
}

/// Which credentials a request carries. Safe to log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialPresence {
    pub authorization: bool,
    pub cookie: bool,
}

impl CredentialPresence {
    pub fn of(headers: &HeaderMap) -> Self {
        CredentialPresence {
            authorization: headers.contains_key(AUTHORIZATION),
            cookie: headers.contains_key(COOKIE),
        }
    }
}

/// Adds a Via header to indicate the request passed through the gateway.
/// Appends to the inbound value if the request already carried one.
fn add_via_header(outbound: &mut HeaderMap, inbound: &HeaderMap, version: Version) {
    let version_str = match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_11 => "1.1",
        Version::HTTP_2 => "2",
        Version::HTTP_3 => "3",
        _ => {
            tracing::debug!(?version, "Unknown HTTP version, skipping Via header");
            return;
        }
    };

    let via_value = format!("{version_str} {PROXY_NAME}");

    let combined = match inbound.get(VIA).and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{existing}, {via_value}"),
        None => via_value,
    };

    if let Ok(value) = HeaderValue::from_str(&combined) {
        outbound.insert(VIA, value);
    }
}
