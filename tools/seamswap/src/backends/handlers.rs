use super::{AdapterContext, AdapterOutput, BackendKind, SeamAdapter};
use crate::seam::{PatchSpec, SeamKey, SeamValue};

/// Wrap whatever handler currently sits at each `(target, attribute)` with the
/// session's interceptor. Seams that are missing or hold something other than
/// a handler are left alone.
fn intercept_specs(
    context: &AdapterContext<'_>,
    backend: BackendKind,
    seams: &[(&str, &str)],
) -> AdapterOutput {
    let mut output = AdapterOutput::default();
    for (target, attribute) in seams {
        let key = SeamKey::new(*target, *attribute);
        let Some(SeamValue::Handler(current)) = context.registry.get(&key) else {
            continue;
        };
        let Some(wrapped) =
            context
                .session
                .stubs()
                .intercept(backend, attribute, context.session.id(), current)
        else {
            continue;
        };
        output
            .specs
            .push(PatchSpec::new(*target, *attribute, SeamValue::Handler(wrapped)));
    }
    output
}

fn declared(seams: &[(&str, &str)]) -> Vec<SeamKey> {
    seams
        .iter()
        .map(|(target, attribute)| SeamKey::new(*target, *attribute))
        .collect()
}

const ASYNC_FETCH_SEAMS: [(&str, &str); 2] = [
    ("async_fetch.SimpleAsyncHttpClient", "fetch_impl"),
    ("async_fetch.CurlAsyncHttpClient", "fetch_impl"),
];

pub struct AsyncFetchAdapter;

impl SeamAdapter for AsyncFetchAdapter {
    fn backend(&self) -> BackendKind {
        BackendKind::AsyncFetch
    }

    fn declared_seams(&self) -> Vec<SeamKey> {
        declared(&ASYNC_FETCH_SEAMS)
    }

    fn build(&self, context: &AdapterContext<'_>) -> AdapterOutput {
        intercept_specs(context, self.backend(), &ASYNC_FETCH_SEAMS)
    }
}

const CLIENT_SESSION_SEAMS: [(&str, &str); 1] = [("client_session.ClientSession", "request")];

pub struct ClientSessionAdapter;

impl SeamAdapter for ClientSessionAdapter {
    fn backend(&self) -> BackendKind {
        BackendKind::ClientSession
    }

    fn declared_seams(&self) -> Vec<SeamKey> {
        declared(&CLIENT_SESSION_SEAMS)
    }

    fn build(&self, context: &AdapterContext<'_>) -> AdapterOutput {
        intercept_specs(context, self.backend(), &CLIENT_SESSION_SEAMS)
    }
}

const DUAL_CLIENT_SEAMS: [(&str, &str); 2] = [
    ("dual_client.AsyncClient", "send"),
    ("dual_client.Client", "send"),
];

pub struct DualClientAdapter;

impl SeamAdapter for DualClientAdapter {
    fn backend(&self) -> BackendKind {
        BackendKind::DualClient
    }

    fn declared_seams(&self) -> Vec<SeamKey> {
        declared(&DUAL_CLIENT_SEAMS)
    }

    fn build(&self, context: &AdapterContext<'_>) -> AdapterOutput {
        intercept_specs(context, self.backend(), &DUAL_CLIENT_SEAMS)
    }
}
