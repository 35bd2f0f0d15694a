//! # Certificate Manager
//!
//! Keeps a `kubernetes.io/tls` secret holding a valid self-signed certificate
//! for the configured hostnames, and rolls the dependent deployment whenever
//! the certificate changes so pods pick up the new files.

use super::material::{generate_self_signed, inspect, CertificateMaterial};
use crate::constants::RESTARTED_AT_ANNOTATION;
use crate::engine::diff::labels_subset;
use crate::engine::{fetch, Converger, ObjectApi, ObjectKey, Presence};
use crate::error::{is_not_found, Result};
use crate::observability::metrics;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use serde_json::json;
use std::collections::BTreeMap;
use time::OffsetDateTime;
use tracing::{debug, info};

/// Secret key holding the PEM certificate
pub const TLS_CERT_KEY: &str = "tls.crt";
/// Secret key holding the PEM private key
pub const TLS_KEY_KEY: &str = "tls.key";

/// The certificate one workload needs
#[derive(Debug, Clone)]
pub struct CertificateRequest {
    /// Where the TLS secret lives
    pub secret: ObjectKey,
    /// Hostnames to cover; the first one is primary and must be present
    pub hostnames: Vec<String>,
    /// Labels the secret must carry
    pub labels: BTreeMap<String, String>,
    /// Deployment to roll when the certificate changes
    pub restart: Option<ObjectKey>,
}

/// What [`ensure_certificate`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateAction {
    Noop,
    Created,
    Rotated,
    /// A rotation was due but the new certificate did not reach the secret
    Retry,
}

impl CertificateAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Noop => "noop",
            Self::Created => "created",
            Self::Rotated => "rotated",
            Self::Retry => "retry",
        }
    }
}

fn tls_secret(request: &CertificateRequest, material: &CertificateMaterial) -> Secret {
    let data = BTreeMap::from([
        (
            TLS_CERT_KEY.to_string(),
            ByteString(material.cert_pem.as_bytes().to_vec()),
        ),
        (
            TLS_KEY_KEY.to_string(),
            ByteString(material.key_pem.as_bytes().to_vec()),
        ),
    ]);
    Secret {
        metadata: ObjectMeta {
            name: Some(request.secret.name.clone()),
            namespace: Some(request.secret.namespace.clone()),
            labels: Some(request.labels.clone()),
            ..ObjectMeta::default()
        },
        type_: Some("kubernetes.io/tls".to_string()),
        data: Some(data),
        ..Secret::default()
    }
}

/// Create, rotate or keep the TLS secret described by `request`
///
/// A secret that exists but is owned by anything other than the converger's
/// owner is user-provided and left alone.
pub async fn ensure_certificate<S>(
    converger: &Converger<'_, S>,
    request: &CertificateRequest,
) -> Result<CertificateAction>
where
    S: ObjectApi<Secret> + ObjectApi<Deployment> + ?Sized,
{
    let store = converger.store();
    let primary = request
        .hostnames
        .first()
        .ok_or(super::CertificateError::NoHostnames)?;

    let Some(found) = fetch::<Secret, _>(store, &request.secret).await? else {
        let material = generate_self_signed(&request.hostnames)?;
        return match converger
            .create_if_missing(tls_secret(request, &material))
            .await?
        {
            Presence::Created => {
                info!("Created certificate secret {}", request.secret);
                restart_workload(store, request.restart.as_ref()).await?;
                metrics::increment_certificate_actions(CertificateAction::Created.as_str());
                Ok(CertificateAction::Created)
            }
            Presence::AlreadyExists | Presence::Found(_) => Ok(CertificateAction::Noop),
        };
    };

    if !converger.owns(&found) {
        debug!(
            "Certificate secret {} is not managed by this resource, leaving it untouched",
            request.secret
        );
        return Ok(CertificateAction::Noop);
    }

    let stored = found
        .data
        .as_ref()
        .and_then(|data| data.get(TLS_CERT_KEY))
        .map(|bytes| bytes.0.as_slice())
        .unwrap_or_default();
    let verdict = inspect(stored, primary, OffsetDateTime::now_utc());

    if verdict.is_valid() {
        if !labels_subset(Some(&request.labels), found.metadata.labels.as_ref()) {
            debug!("Restoring labels on certificate secret {}", request.secret);
            <S as ObjectApi<Secret>>::merge_patch(
                store,
                &request.secret,
                json!({ "metadata": { "labels": request.labels } }),
            )
            .await?;
            metrics::increment_object_operations("Secret", "patch");
        }
        return Ok(CertificateAction::Noop);
    }

    info!(
        "Certificate in {} is {}, regenerating it",
        request.secret, verdict
    );
    let material = generate_self_signed(&request.hostnames)?;
    let outcome = converger
        .update_or_recreate(tls_secret(request, &material), &found)
        .await?;
    if !outcome.is_done() && !holds_certificate(store, &request.secret, &material).await? {
        debug!(
            "Rotation of certificate secret {} did not land, retrying on the next pass",
            request.secret
        );
        return Ok(CertificateAction::Retry);
    }
    restart_workload(store, request.restart.as_ref()).await?;
    metrics::increment_certificate_actions(CertificateAction::Rotated.as_str());
    Ok(CertificateAction::Rotated)
}

/// Whether the secret at `key` now carries the certificate in `material`
async fn holds_certificate<S>(
    store: &S,
    key: &ObjectKey,
    material: &CertificateMaterial,
) -> Result<bool>
where
    S: ObjectApi<Secret> + ?Sized,
{
    let current = fetch::<Secret, _>(store, key).await?;
    Ok(current
        .and_then(|secret| secret.data)
        .and_then(|data| data.get(TLS_CERT_KEY).cloned())
        .is_some_and(|bytes| bytes.0 == material.cert_pem.as_bytes()))
}

/// Stamp the pod template of `deployment` so its pods are replaced
///
/// Skipped when no deployment is given or it does not exist yet.
pub async fn restart_workload<S>(store: &S, deployment: Option<&ObjectKey>) -> Result<()>
where
    S: ObjectApi<Deployment> + ?Sized,
{
    let Some(key) = deployment else {
        return Ok(());
    };
    let patch = json!({
        "spec": { "template": { "metadata": { "annotations": {
            RESTARTED_AT_ANNOTATION: chrono::Utc::now().to_rfc3339(),
        } } } }
    });
    match store.merge_patch(key, patch).await {
        Ok(_) => {
            info!("Restarted deployment {} to load the new certificate", key);
            metrics::increment_object_operations("Deployment", "restart");
            Ok(())
        }
        Err(e) if is_not_found(&e) => {
            debug!("Deployment {} does not exist yet, no restart needed", key);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
