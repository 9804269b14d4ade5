//! Manifest rendering
//!
//! Writes the control plane as a multi-document YAML stream. The stream
//! contains the configuration map and issuer secret in the same shape the
//! cluster stores them, so rendered output can be read back as cluster
//! state by a later upgrade.

use base64::Engine;
use serde_json::{json, Value};
use std::io::Write;
use tracing::debug;

use crate::cluster::{
    CONFIG_MAP_NAME, ISSUER_CRT_NAME, ISSUER_EXPIRY_ANNOTATION, ISSUER_KEY_NAME,
    ISSUER_SECRET_NAME,
};
use crate::duration::format_duration;
use crate::values::ReconciledValues;

const COMPONENT_LABEL: &str = "meshplane.io/control-plane-component";
const NAMESPACE_LABEL: &str = "meshplane.io/control-plane-ns";
const VERSION_LABEL: &str = "meshplane.io/control-plane-version";

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to encode configuration: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to encode manifest: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to write manifest: {0}")]
    Io(#[from] std::io::Error),
}

/// Render every control plane object to `out`.
pub fn render(values: &ReconciledValues, out: &mut impl Write) -> Result<(), RenderError> {
    let mut documents = vec![
        namespace(values),
        config_map(values)?,
        issuer_secret(values),
        identity_deployment(values),
        controller_deployment(values),
    ];
    if values.auto_inject() {
        documents.push(proxy_injector_deployment(values));
    }

    for document in &documents {
        out.write_all(b"---\n")?;
        out.write_all(serde_yaml::to_string(document)?.as_bytes())?;
    }

    debug!(objects = documents.len(), "Rendered manifest");
    Ok(())
}

fn metadata(values: &ReconciledValues, name: &str, component: Option<&str>) -> Value {
    let mut labels = json!({
        NAMESPACE_LABEL: values.namespace(),
        VERSION_LABEL: values.global().version,
    });
    if let Some(component) = component {
        labels[COMPONENT_LABEL] = json!(component);
    }
    json!({
        "name": name,
        "namespace": values.namespace(),
        "labels": labels,
    })
}

fn namespace(values: &ReconciledValues) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": { "name": values.namespace() },
    })
}

fn config_map(values: &ReconciledValues) -> Result<Value, RenderError> {
    let data = values.configs().to_config_map()?;
    Ok(json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": metadata(values, CONFIG_MAP_NAME, Some("controller")),
        "data": data,
    }))
}

fn issuer_secret(values: &ReconciledValues) -> Value {
    let issuer = &values.identity().issuer;
    let encode = |pem: &str| base64::engine::general_purpose::STANDARD.encode(pem);

    let mut meta = metadata(values, ISSUER_SECRET_NAME, Some("identity"));
    meta["annotations"] = json!({
        ISSUER_EXPIRY_ANNOTATION: issuer.not_after.to_rfc3339(),
    });

    json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "type": "Opaque",
        "metadata": meta,
        "data": {
            ISSUER_KEY_NAME: encode(&issuer.key_pem),
            ISSUER_CRT_NAME: encode(&issuer.crt_pem),
        },
    })
}

fn deployment(
    values: &ReconciledValues,
    component: &str,
    replicas: u32,
    args: Vec<String>,
    env: Value,
    volumes: Value,
    mounts: Value,
) -> Value {
    let controller = values.controller();
    let name = format!("mesh-{}", component);

    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": metadata(values, &name, Some(component)),
        "spec": {
            "replicas": replicas,
            "selector": {
                "matchLabels": { COMPONENT_LABEL: component },
            },
            "template": {
                "metadata": {
                    "labels": {
                        COMPONENT_LABEL: component,
                        NAMESPACE_LABEL: values.namespace(),
                    },
                },
                "spec": {
                    "containers": [{
                        "name": component,
                        "image": controller.image,
                        "imagePullPolicy": controller.pull_policy,
                        "args": args,
                        "env": env,
                        "volumeMounts": mounts,
                        "securityContext": { "runAsUser": controller.uid },
                    }],
                    "volumes": volumes,
                },
            },
        },
    })
}

fn identity_deployment(values: &ReconciledValues) -> Value {
    let identity = values.identity();
    deployment(
        values,
        "identity",
        identity.replicas,
        vec![
            "identity".to_string(),
            format!("-log-level={}", values.controller().log_level),
        ],
        json!([
            { "name": "MESH_TRUST_DOMAIN", "value": identity.trust_domain },
            {
                "name": "MESH_ISSUANCE_LIFETIME",
                "value": format_duration(identity.issuance_lifetime),
            },
            {
                "name": "MESH_CLOCK_SKEW_ALLOWANCE",
                "value": format_duration(identity.clock_skew_allowance),
            },
        ]),
        json!([
            { "name": "issuer", "secret": { "secretName": ISSUER_SECRET_NAME } },
            { "name": "config", "configMap": { "name": CONFIG_MAP_NAME } },
        ]),
        json!([
            {
                "name": "issuer",
                "mountPath": "/var/run/meshplane/identity/issuer",
                "readOnly": true,
            },
            { "name": "config", "mountPath": "/var/run/meshplane/config", "readOnly": true },
        ]),
    )
}

fn controller_deployment(values: &ReconciledValues) -> Value {
    deployment(
        values,
        "controller",
        values.controller().replicas,
        vec![
            "controller".to_string(),
            format!("-controller-namespace={}", values.namespace()),
            format!("-log-level={}", values.controller().log_level),
        ],
        json!([]),
        json!([{ "name": "config", "configMap": { "name": CONFIG_MAP_NAME } }]),
        json!([{ "name": "config", "mountPath": "/var/run/meshplane/config", "readOnly": true }]),
    )
}

fn proxy_injector_deployment(values: &ReconciledValues) -> Value {
    deployment(
        values,
        "proxy-injector",
        values.controller().replicas,
        vec![
            "proxy-injector".to_string(),
            format!("-log-level={}", values.controller().log_level),
        ],
        json!([
            {
                "name": "MESH_PROXY_DISABLE_H2_UPGRADE",
                "value": values.disable_h2_upgrade().to_string(),
            },
        ]),
        json!([{ "name": "config", "configMap": { "name": CONFIG_MAP_NAME } }]),
        json!([{ "name": "config", "mountPath": "/var/run/meshplane/config", "readOnly": true }]),
    )
}
