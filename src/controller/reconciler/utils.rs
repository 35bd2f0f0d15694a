//! # Utilities
//!
//! Step helpers shared by both drivers.

use crate::builders::ResolvedHttps;
use crate::certificates::{ensure_certificate, CertificateAction, CertificateRequest, TLS_CERT_KEY};
use crate::crd::CertSource;
use crate::engine::{fetch, Converger, ObjectApi, ObjectKey, Outcome};
use crate::error::Result;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Secret;
use std::collections::BTreeMap;

/// Run the certificate step for a self-signed source
///
/// A freshly created or rotated certificate requeues the pass so the
/// deployment is compared against the restarted workload. A rotation that
/// lost a write conflict requeues as well, without any restart.
pub async fn certificate_step<S>(
    converger: &Converger<'_, S>,
    https: &ResolvedHttps,
    secret: ObjectKey,
    hostnames: &[String],
    labels: BTreeMap<String, String>,
    deployment: ObjectKey,
) -> Result<Outcome>
where
    S: ObjectApi<Secret> + ObjectApi<Deployment> + ?Sized,
{
    if !https.is_self_signed() {
        return Ok(Outcome::done());
    }
    let request = CertificateRequest {
        secret,
        hostnames: hostnames.to_vec(),
        labels,
        restart: Some(deployment),
    };
    Ok(match ensure_certificate(converger, &request).await? {
        CertificateAction::Noop => Outcome::done(),
        CertificateAction::Created | CertificateAction::Rotated | CertificateAction::Retry => {
            Outcome::requeue_after(converger.timing().create_requeue)
        }
    })
}

/// PEM the router must trust when re-encrypting towards the pods
///
/// `None` for the service CA, which the router already trusts, and when
/// HTTPS is off or the secret does not exist yet.
pub async fn destination_ca<S>(
    store: &S,
    namespace: &str,
    https: &ResolvedHttps,
) -> Result<Option<String>>
where
    S: ObjectApi<Secret> + ?Sized,
{
    let Some(secret_name) = https.secret_name.as_ref() else {
        return Ok(None);
    };
    if !https.enabled || https.source == CertSource::Ocp {
        return Ok(None);
    }
    let key = ObjectKey::new(namespace, secret_name);
    let secret = fetch::<Secret, _>(store, &key).await?;
    Ok(secret
        .and_then(|s| s.data)
        .and_then(|mut data| data.remove(TLS_CERT_KEY))
        .and_then(|bytes| String::from_utf8(bytes.0).ok()))
}
