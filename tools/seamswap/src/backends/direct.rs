use super::{AdapterContext, AdapterOutput, BackendKind, SeamAdapter};
use crate::seam::{PatchSpec, SeamKey, SeamValue};
use std::collections::BTreeMap;

fn transport_spec(
    context: &AdapterContext<'_>,
    backend: BackendKind,
    target: &str,
    attribute: &str,
    stub_name: &str,
) -> Option<PatchSpec> {
    let stub = context.session.stubs().transport(backend, stub_name)?;
    Some(PatchSpec::new(target, attribute, SeamValue::Transport(stub)))
}

fn keys(target: &str, attributes: &[&str]) -> Vec<SeamKey> {
    attributes
        .iter()
        .map(|attribute| SeamKey::new(target, *attribute))
        .collect()
}

pub struct StdHttpAdapter;

impl SeamAdapter for StdHttpAdapter {
    fn backend(&self) -> BackendKind {
        BackendKind::StdHttp
    }

    fn declared_seams(&self) -> Vec<SeamKey> {
        keys("std_http", &["HttpConnection", "HttpsConnection"])
    }

    fn build(&self, context: &AdapterContext<'_>) -> AdapterOutput {
        let specs = ["HttpConnection", "HttpsConnection"]
            .into_iter()
            .filter_map(|name| transport_spec(context, self.backend(), "std_http", name, name))
            .collect();
        AdapterOutput {
            specs,
            guards: Vec::new(),
        }
    }
}

pub struct AwsAdapter;

const AWS_POOLS: [(&str, &str); 2] = [
    ("aws.HttpConnectionPool", "AwsHttpConnection"),
    ("aws.HttpsConnectionPool", "AwsHttpsConnection"),
];

impl SeamAdapter for AwsAdapter {
    fn backend(&self) -> BackendKind {
        BackendKind::Aws
    }

    fn declared_seams(&self) -> Vec<SeamKey> {
        AWS_POOLS
            .iter()
            .map(|(pool, _)| SeamKey::new(*pool, "ConnectionCls"))
            .collect()
    }

    fn build(&self, context: &AdapterContext<'_>) -> AdapterOutput {
        let specs = AWS_POOLS
            .iter()
            .filter_map(|(pool, stub)| {
                transport_spec(context, self.backend(), pool, "ConnectionCls", stub)
            })
            .collect();
        AdapterOutput {
            specs,
            guards: Vec::new(),
        }
    }
}

/// Besides the two connection types, the scheme table is rebuilt so that
/// `http` and `https` map to the same substitutes as the direct bindings.
pub struct TimeoutHttpAdapter;

pub const SCHEME_TO_CONNECTION: &str = "SCHEME_TO_CONNECTION";

impl SeamAdapter for TimeoutHttpAdapter {
    fn backend(&self) -> BackendKind {
        BackendKind::TimeoutHttp
    }

    fn declared_seams(&self) -> Vec<SeamKey> {
        keys(
            "timeout_http",
            &[
                "HttpConnectionWithTimeout",
                "HttpsConnectionWithTimeout",
                SCHEME_TO_CONNECTION,
            ],
        )
    }

    fn build(&self, context: &AdapterContext<'_>) -> AdapterOutput {
        let backend = self.backend();
        let stubs = context.session.stubs();
        let mut specs = Vec::new();
        let mut table = BTreeMap::new();
        for (scheme, name) in [
            ("http", "HttpConnectionWithTimeout"),
            ("https", "HttpsConnectionWithTimeout"),
        ] {
            let Some(stub) = stubs.transport(backend, name) else {
                continue;
            };
            specs.push(PatchSpec::new(
                "timeout_http",
                name,
                SeamValue::Transport(stub.clone()),
            ));
            table.insert(scheme.to_string(), SeamValue::Transport(stub));
        }
        if !table.is_empty() {
            specs.push(PatchSpec::new(
                "timeout_http",
                SCHEME_TO_CONNECTION,
                SeamValue::Table(table),
            ));
        }
        AdapterOutput {
            specs,
            guards: Vec::new(),
        }
    }
}

pub struct CertHttpAdapter;

impl SeamAdapter for CertHttpAdapter {
    fn backend(&self) -> BackendKind {
        BackendKind::CertHttp
    }

    fn declared_seams(&self) -> Vec<SeamKey> {
        keys("cert_http", &["CertValidatingHttpsConnection"])
    }

    fn build(&self, context: &AdapterContext<'_>) -> AdapterOutput {
        let specs = transport_spec(
            context,
            self.backend(),
            "cert_http",
            "CertValidatingHttpsConnection",
            "CertValidatingHttpsConnection",
        )
        .into_iter()
        .collect();
        AdapterOutput {
            specs,
            guards: Vec::new(),
        }
    }
}
