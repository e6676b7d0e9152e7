use super::BackendKind;
use crate::compat::BackendVersion;
use crate::errors::SeamError;
use crate::pool::{
    pristine_get_conn, pristine_is_connection_dropped, pristine_new_conn, LifoPool,
    CONNECTION_CLS, GET_CONN, IS_CONNECTION_DROPPED, NEW_CONN,
};
use crate::registry::{BackendManifest, SeamRegistry};
use crate::seam::SeamValue;
use crate::transport::{Handler, Request, Response, TransportType};
use std::collections::BTreeMap;
use std::sync::Arc;

fn transport(name: &str) -> SeamValue {
    SeamValue::Transport(TransportType::plain(name))
}

fn network_handler(name: String) -> SeamValue {
    SeamValue::Handler(Handler::new(name.clone(), move |request: &Request| {
        if request.url.is_empty() {
            return Err(SeamError::Transport(format!("{name}: empty url")));
        }
        Ok(Response {
            status: 200,
            body: Vec::new(),
            served_by: "network".to_string(),
        })
    }))
}

fn pooling_manifest(kind: BackendKind, version: BackendVersion) -> BackendManifest {
    let ns = kind.as_str();
    let connection = format!("{ns}.connection");
    let http = TransportType::plain("HttpConnection");
    // the verified name is an alias of the plain HTTPS type
    let https = TransportType::plain("HttpsConnection");
    let mut manifest = BackendManifest::new(kind, version)
        .with_seam(
            connection.clone(),
            "VerifiedHttpsConnection",
            SeamValue::Transport(https.clone()),
        )
        .with_seam(
            connection.clone(),
            "HttpConnection",
            SeamValue::Transport(http.clone()),
        )
        .with_seam(connection, "HttpsConnection", SeamValue::Transport(https.clone()))
        .with_seam(
            format!("{ns}.connectionpool"),
            IS_CONNECTION_DROPPED,
            SeamValue::Probe(pristine_is_connection_dropped()),
        );
    for (class, connection) in [("HttpConnectionPool", http), ("HttpsConnectionPool", https)] {
        let target = format!("{ns}.{class}");
        manifest = manifest
            .with_seam(target.clone(), CONNECTION_CLS, SeamValue::Transport(connection))
            .with_seam(target.clone(), NEW_CONN, SeamValue::Create(pristine_new_conn()))
            .with_seam(target, GET_CONN, SeamValue::Acquire(pristine_get_conn()));
    }
    manifest
}

/// In-memory manifest mirroring the seam layout of one client stack, with
/// plain transport types and handlers that answer from a pretend network.
pub fn reference_manifest(kind: BackendKind) -> BackendManifest {
    match kind {
        BackendKind::StdHttp => BackendManifest::new(kind, BackendVersion::new(3, 12, 0))
            .with_seam("std_http", "HttpConnection", transport("HttpConnection"))
            .with_seam("std_http", "HttpsConnection", transport("HttpsConnection")),
        BackendKind::Sessions => pooling_manifest(kind, BackendVersion::new(2, 31, 0)),
        BackendKind::Aws => BackendManifest::new(kind, BackendVersion::new(1, 34, 0))
            .with_seam(
                "aws.HttpConnectionPool",
                CONNECTION_CLS,
                transport("AwsHttpConnection"),
            )
            .with_seam(
                "aws.HttpsConnectionPool",
                CONNECTION_CLS,
                transport("AwsHttpsConnection"),
            ),
        BackendKind::Pooled => pooling_manifest(kind, BackendVersion::new(2, 2, 0)),
        BackendKind::TimeoutHttp => {
            let http = TransportType::plain("HttpConnectionWithTimeout");
            let https = TransportType::plain("HttpsConnectionWithTimeout");
            let table = BTreeMap::from([
                ("http".to_string(), SeamValue::Transport(http.clone())),
                ("https".to_string(), SeamValue::Transport(https.clone())),
            ]);
            BackendManifest::new(kind, BackendVersion::new(0, 22, 0))
                .with_seam(
                    "timeout_http",
                    "HttpConnectionWithTimeout",
                    SeamValue::Transport(http),
                )
                .with_seam(
                    "timeout_http",
                    "HttpsConnectionWithTimeout",
                    SeamValue::Transport(https),
                )
                .with_seam(
                    "timeout_http",
                    "SCHEME_TO_CONNECTION",
                    SeamValue::Table(table),
                )
        }
        BackendKind::CertHttp => BackendManifest::new(kind, BackendVersion::new(0, 3, 0)).with_seam(
            "cert_http",
            "CertValidatingHttpsConnection",
            transport("CertValidatingHttpsConnection"),
        ),
        BackendKind::AsyncFetch => {
            let mut manifest = BackendManifest::new(kind, BackendVersion::new(6, 4, 0));
            for client in ["SimpleAsyncHttpClient", "CurlAsyncHttpClient"] {
                let target = format!("async_fetch.{client}");
                manifest = manifest.with_seam(
                    target.clone(),
                    "fetch_impl",
                    network_handler(format!("{target}.fetch_impl")),
                );
            }
            manifest
        }
        BackendKind::ClientSession => BackendManifest::new(kind, BackendVersion::new(3, 9, 0))
            .with_seam(
                "client_session.ClientSession",
                "request",
                network_handler("client_session.ClientSession.request".to_string()),
            ),
        BackendKind::DualClient => {
            let mut manifest = BackendManifest::new(kind, BackendVersion::new(0, 27, 0));
            for client in ["AsyncClient", "Client"] {
                let target = format!("dual_client.{client}");
                manifest = manifest.with_seam(
                    target.clone(),
                    "send",
                    network_handler(format!("{target}.send")),
                );
            }
            manifest
        }
    }
}

/// Register a reference manifest for every backend in `kinds`.
pub fn register_reference_backends(
    registry: &SeamRegistry,
    kinds: &[BackendKind],
) -> Result<(), SeamError> {
    for kind in kinds {
        registry.register_backend(reference_manifest(*kind))?;
    }
    Ok(())
}

/// An empty pool of one of the pooling backends' pool classes.
pub fn reference_pool(backend: BackendKind, class: &str, host: &str) -> Arc<LifoPool> {
    let ns = backend.as_str();
    LifoPool::new(format!("{ns}.{class}"), format!("{ns}.connectionpool"), host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::AdapterCatalog;

    #[test]
    fn reference_manifests_cover_every_declared_seam() {
        let registry = SeamRegistry::new();
        register_reference_backends(&registry, &BackendKind::ALL).expect("register");
        let catalog = AdapterCatalog::with_defaults();
        for adapter in catalog.iter() {
            let mut declared = adapter.declared_seams();
            declared.sort();
            assert_eq!(
                declared,
                registry.backend_keys(adapter.backend()),
                "{}",
                adapter.backend().as_str()
            );
        }
    }
}
