//! End-to-end resolution pipeline tests over the public API.

use std::collections::HashMap;
use std::sync::Arc;

use envgene::config::RepositoryConfig;
use envgene::decrypt::{Decryptor, SopsDecryptor};
use envgene::remote::InMemoryRepository;
use envgene::subprocess::SubprocessManager;
use envgene::{ConnectionType, EnvironmentResolver};
use uuid::Uuid;

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

const DEV_PARAMETERS: &str = r#"
ATP_ENVGENE_CONFIGURATION:
  effectiveSet:
    billing-gateway:
      HTTP:
        url: "https://billing.dev.example.com"
        timeout: "30000"
      DB:
        jdbc_url: "jdbc:postgresql://db.dev:5432/billing"
    reporting:
      HTTP:
        url: "https://reporting.dev.example.com"
"#;

const QA_PARAMETERS: &str = r#"
ATP_ENVGENE_CONFIGURATION:
  effectiveSet:
    billing-gateway:
      HTTP:
        url: "https://billing.qa.example.com"
"#;

const DEV_CREDENTIALS_ENCRYPTED: &str = r#"
billing-gateway:
  DB:
    password: ENC[AES256-GCM, data:OhjLbWwPcqLuqWXFWxrwx]
sops:
  age:
    - recipient: age1test
"#;

const DEV_CREDENTIALS_PLAINTEXT: &str = r#"
billing-gateway:
  DB:
    password: "plain-password"
"#;

fn config(project_id: Uuid) -> RepositoryConfig {
    RepositoryConfig {
        base_url: "https://git.test.com".to_string(),
        project: "env/test-project".to_string(),
        token: "test-token".to_string(),
        git_ref: "master".to_string(),
        deployment_root: "effective-set/deployment".to_string(),
        parameters_file: "values/deployment-parameters.yaml".to_string(),
        credentials_file: "values/deployment-credentials.yaml".to_string(),
        projects: HashMap::from([(project_id, "env/test-project".to_string())]),
    }
}

fn seeded_repository() -> InMemoryRepository {
    let repo = InMemoryRepository::new();
    repo.put_file(
        "effective-set/deployment/cluster-a/dev01/values/deployment-parameters.yaml",
        DEV_PARAMETERS,
    );
    repo.put_file(
        "effective-set/deployment/cluster-a/dev01/values/deployment-credentials.yaml",
        DEV_CREDENTIALS_ENCRYPTED,
    );
    repo.put_file(
        "effective-set/deployment/cluster-b/qa01/values/deployment-parameters.yaml",
        QA_PARAMETERS,
    );
    repo
}

#[tokio::test]
async fn resolves_a_project_tree_with_encrypted_credentials() {
    init_tracing();
    let project_id = Uuid::new_v4();
    let repo = seeded_repository();

    let (subprocess, mock) = SubprocessManager::mock();
    mock.expect_command("sops")
        .with_args(|args| args.first().map(String::as_str) == Some("--decrypt"))
        .returns_stdout(DEV_CREDENTIALS_PLAINTEXT)
        .finish();
    let gate: Arc<dyn Decryptor> =
        Arc::new(SopsDecryptor::new("AGE-SECRET-KEY-1TEST", subprocess).unwrap());

    let resolver = EnvironmentResolver::new(config(project_id), Arc::new(repo), Some(gate));

    let refs = resolver.environments(project_id).await.unwrap();
    assert_eq!(refs.len(), 2);
    assert!(refs.iter().all(|r| !r.is_resolved()));

    let dev = resolver
        .environment_by_name(project_id, "dev01")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(dev.cluster_name, "cluster-a");
    assert_eq!(dev.systems.len(), 2);

    let billing = dev.system_by_name("billing-gateway").unwrap();
    let db = billing
        .connections
        .iter()
        .find(|c| c.connection_type == ConnectionType::Db)
        .unwrap();
    assert_eq!(db.parameters.get("password").unwrap(), "plain-password");
    assert_eq!(
        db.parameters.get("jdbc_url").unwrap(),
        "jdbc:postgresql://db.dev:5432/billing"
    );

    // Only the encrypted credentials document went through sops.
    assert_eq!(mock.call_count("sops"), 1);

    // After resolution the discovery walk hands out resolved references.
    let refs = resolver.environments(project_id).await.unwrap();
    assert_eq!(refs.iter().filter(|r| r.is_resolved()).count(), 1);
}

#[tokio::test]
async fn sibling_environments_resolve_independently() {
    init_tracing();
    let project_id = Uuid::new_v4();
    let repo = seeded_repository();
    // Poison dev01's parameters; qa01 must still resolve.
    repo.put_file(
        "effective-set/deployment/cluster-a/dev01/values/deployment-parameters.yaml",
        "ATP_ENVGENE_CONFIGURATION: scalar-garbage",
    );

    let resolver = EnvironmentResolver::new(config(project_id), Arc::new(repo), None);

    let dev = resolver
        .environment_by_name(project_id, "dev01")
        .await
        .unwrap()
        .unwrap();
    assert!(dev.systems.is_empty());

    let qa = resolver
        .environment_by_name(project_id, "qa01")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(qa.systems.len(), 1);
    assert_eq!(qa.systems[0].name, "billing-gateway");
}

#[tokio::test]
async fn clear_drops_cache_and_discovered_locations() {
    init_tracing();
    let project_id = Uuid::new_v4();
    let repo = seeded_repository();
    let resolver = EnvironmentResolver::new(config(project_id), Arc::new(repo.clone()), None);

    let qa = resolver
        .environment_by_name(project_id, "qa01")
        .await
        .unwrap()
        .unwrap();
    let qa_id = qa.id;

    resolver.clear();
    assert!(resolver
        .environment_by_id(qa_id)
        .await
        .unwrap()
        .is_none());

    // Re-discovery assigns a fresh identity and resolves again.
    let qa = resolver
        .environment_by_name(project_id, "qa01")
        .await
        .unwrap()
        .unwrap();
    assert_ne!(qa.id, qa_id);
}
