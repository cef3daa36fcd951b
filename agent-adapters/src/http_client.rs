use std::sync::Arc;
use std::time::Duration;

use hyper::client::HttpConnector;
use hyper::{Body, Client};
use hyper_rustls::HttpsConnector;
use rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore};
use webpki_roots::TLS_SERVER_ROOTS;

use crate::traits::AdapterResult;

pub(crate) type HyperClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Idle connections kept per host; throttled callers reuse a small pool.
const MAX_IDLE_PER_HOST: usize = 8;

/// Builds a pooled HTTPS client whose idle connections expire after
/// `idle_timeout` and whose connect phase is bounded by the same duration.
#[allow(clippy::unnecessary_wraps)]
pub(crate) fn build_https_client(idle_timeout: Duration) -> AdapterResult<HyperClient> {
    let mut roots = RootCertStore::empty();
    roots.add_trust_anchors(TLS_SERVER_ROOTS.iter().map(|anchor| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            anchor.subject,
            anchor.spki,
            anchor.name_constraints,
        )
    }));

    let tls = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();

    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_connect_timeout(Some(idle_timeout));
    http.set_nodelay(true);

    let connector = HttpsConnector::from((http, Arc::new(tls)));

    Ok(Client::builder()
        .pool_idle_timeout(idle_timeout)
        .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
        .build::<_, Body>(connector))
}
