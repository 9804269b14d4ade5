//! Install and upgrade pipeline integration tests

use std::collections::BTreeMap;

use meshctl::cli::recordable_command;
use meshctl::cluster::{
    ManifestCluster, CONFIG_MAP_NAME, ISSUER_CRT_NAME, ISSUER_KEY_NAME, ISSUER_SECRET_NAME,
};
use meshctl::flags::FlagSet;
use meshctl::identity::{
    GenerationRequest, IdentityGenerator, IdentityOrigin, RcgenIdentityGenerator,
};
use meshctl::install::install;
use meshctl::model::InstallFlag;
use meshctl::render::render;
use meshctl::tls::TlsError;
use meshctl::upgrade::{upgrade, Invocation};
use meshctl::values::ReconciledValues;
use meshctl::{UpgradeError, CURRENT_VERSION};

const NAMESPACE: &str = "mesh-system";

fn flags(args: &[&str]) -> FlagSet {
    let command = recordable_command();
    let matches = command.clone().try_get_matches_from(args).unwrap();
    FlagSet::from_matches(&command, &matches)
}

fn config_map(global: &str, install: &str) -> BTreeMap<String, String> {
    let mut data = BTreeMap::new();
    data.insert("global".to_string(), global.to_string());
    data.insert("proxy".to_string(), "{}".to_string());
    data.insert("install".to_string(), install.to_string());
    data
}

fn rendered(values: &ReconciledValues) -> String {
    let mut out = Vec::new();
    render(values, &mut out).unwrap();
    String::from_utf8(out).unwrap()
}

async fn fresh_install(args: &[&str]) -> ReconciledValues {
    let mut invocation = Invocation::new(flags(args));
    invocation.ignore_cluster = true;
    install(
        &ManifestCluster::default(),
        &RcgenIdentityGenerator,
        NAMESPACE,
        invocation,
        || "install-uuid".to_string(),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_upgrade_from_version_without_identity() {
    let mut cluster = ManifestCluster::default();
    cluster.insert_config_map(
        NAMESPACE,
        CONFIG_MAP_NAME,
        config_map(
            r#"{"namespace":"mesh-system","version":"v0"}"#,
            r#"{"uuid":"","cliVersion":"v0","flags":[{"name":"ha","value":"true"}]}"#,
        ),
    );

    let values = upgrade(
        &cluster,
        &RcgenIdentityGenerator,
        NAMESPACE,
        Invocation::new(flags(&[])),
        || "generated-uuid".to_string(),
    )
    .await
    .unwrap();

    assert_eq!(values.install().uuid, "generated-uuid");
    assert_eq!(values.install().cli_version, CURRENT_VERSION);
    assert_eq!(values.install().flags, vec![InstallFlag::new("ha", "true")]);
    assert_eq!(values.controller().replicas, 3);
    assert_eq!(values.global().version, CURRENT_VERSION);

    let identity = values.identity();
    assert_eq!(identity.origin, IdentityOrigin::Generated);
    let idctx = values.global().identity_context.as_ref().unwrap();
    assert_eq!(idctx.trust_domain, identity.trust_domain);
    assert_eq!(idctx.trust_anchors_pem, identity.trust_anchors_pem);
    assert!(!identity.issuer.crt_pem.is_empty());
}

#[tokio::test]
async fn test_install_output_upgrades_in_place() {
    let installed = fresh_install(&["--controller-log-level=debug", "--proxy-uid=3000"]).await;
    let cluster = ManifestCluster::from_yaml(&rendered(&installed)).unwrap();

    let upgraded = upgrade(
        &cluster,
        &RcgenIdentityGenerator,
        NAMESPACE,
        Invocation::new(flags(&[])),
        || panic!("an installed control plane already has a uuid"),
    )
    .await
    .unwrap();

    assert_eq!(upgraded.install().uuid, "install-uuid");
    assert_eq!(upgraded.identity().origin, IdentityOrigin::Reused);
    assert_eq!(upgraded.identity().trust_domain, installed.identity().trust_domain);
    assert_eq!(
        upgraded.identity().trust_anchors_pem,
        installed.identity().trust_anchors_pem
    );
    assert_eq!(upgraded.identity().issuer, installed.identity().issuer);
    assert_eq!(upgraded.controller().log_level, "debug");
    assert_eq!(upgraded.proxy().proxy_uid, 3000);
    assert_eq!(upgraded.install().flags, installed.install().flags);
}

#[tokio::test]
async fn test_explicit_flags_beat_recorded_ones() {
    let installed = fresh_install(&["--controller-log-level=debug"]).await;
    let cluster = ManifestCluster::from_yaml(&rendered(&installed)).unwrap();

    let upgraded = upgrade(
        &cluster,
        &RcgenIdentityGenerator,
        NAMESPACE,
        Invocation::new(flags(&["--controller-log-level", "error", "--ha"])),
        || unreachable!(),
    )
    .await
    .unwrap();

    assert_eq!(upgraded.controller().log_level, "error");
    assert_eq!(
        upgraded.install().flags,
        vec![
            InstallFlag::new("controller-log-level", "error"),
            InstallFlag::new("ha", "true"),
        ]
    );
}

#[tokio::test]
async fn test_repeated_upgrades_are_stable() {
    let installed = fresh_install(&[]).await;
    let first_cluster = ManifestCluster::from_yaml(&rendered(&installed)).unwrap();
    let first = upgrade(
        &first_cluster,
        &RcgenIdentityGenerator,
        NAMESPACE,
        Invocation::new(flags(&[])),
        || unreachable!(),
    )
    .await
    .unwrap();

    let second_cluster = ManifestCluster::from_yaml(&rendered(&first)).unwrap();
    let second = upgrade(
        &second_cluster,
        &RcgenIdentityGenerator,
        NAMESPACE,
        Invocation::new(flags(&[])),
        || unreachable!(),
    )
    .await
    .unwrap();

    assert_eq!(first.install(), second.install());
    assert_eq!(first.global(), second.global());
    assert_eq!(first.identity().issuer, second.identity().issuer);
}

#[tokio::test]
async fn test_foreign_issuer_is_rejected() {
    let installed = fresh_install(&[]).await;
    let mut cluster = ManifestCluster::from_yaml(&rendered(&installed)).unwrap();

    let request = GenerationRequest {
        namespace: NAMESPACE.to_string(),
        trust_domain: "cluster.local".to_string(),
        issuer_lifetime: std::time::Duration::from_secs(3600),
        anchor_lifetime: std::time::Duration::from_secs(7200),
        clock_skew_allowance: std::time::Duration::from_secs(20),
        now: chrono::Utc::now(),
    };
    let rogue = RcgenIdentityGenerator.generate(&request).unwrap();
    let mut secret = BTreeMap::new();
    secret.insert(ISSUER_KEY_NAME.to_string(), rogue.issuer.key_pem.into_bytes());
    secret.insert(ISSUER_CRT_NAME.to_string(), rogue.issuer.crt_pem.into_bytes());
    cluster.insert_secret(NAMESPACE, ISSUER_SECRET_NAME, secret);

    let err = upgrade(
        &cluster,
        &RcgenIdentityGenerator,
        NAMESPACE,
        Invocation::new(flags(&[])),
        || unreachable!(),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        UpgradeError::InvalidIssuerCredential(TlsError::UnknownIssuer)
    ));
}

#[tokio::test]
async fn test_missing_configuration_is_fatal() {
    let err = upgrade(
        &ManifestCluster::default(),
        &RcgenIdentityGenerator,
        NAMESPACE,
        Invocation::new(flags(&[])),
        || unreachable!(),
    )
    .await
    .unwrap_err();

    match err {
        UpgradeError::Fetch(fetch) => assert!(fetch.is_not_found()),
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_unsupported_recorded_value_is_reported() {
    let mut cluster = ManifestCluster::default();
    cluster.insert_config_map(
        NAMESPACE,
        CONFIG_MAP_NAME,
        config_map(
            r#"{"namespace":"mesh-system"}"#,
            r#"{"uuid":"abc","cliVersion":"v0","flags":[{"name":"image-pull-policy","value":"Sometimes"},{"name":"retired-flag","value":"1"}]}"#,
        ),
    );

    let err = upgrade(
        &cluster,
        &RcgenIdentityGenerator,
        NAMESPACE,
        Invocation::new(flags(&[])),
        || unreachable!(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, UpgradeError::InvalidOptions(_)));
}

#[tokio::test]
#[should_panic(expected = "ignore cluster must be unset")]
async fn test_upgrade_with_ignore_cluster_panics() {
    let mut invocation = Invocation::new(flags(&[]));
    invocation.ignore_cluster = true;

    let _ = upgrade(
        &ManifestCluster::default(),
        &RcgenIdentityGenerator,
        NAMESPACE,
        invocation,
        || unreachable!(),
    )
    .await;
}
