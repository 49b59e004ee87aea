//! The environment resolution pipeline.
//!
//! A lookup miss walks the deployment tree of the configured repository,
//! fetches the environment's parameter and credential documents, passes
//! each through the decryption gate, parses and merges them into an
//! [`Environment`], and publishes the result through the resolution cache.
//! All lookup operations probe optimistically: a missing environment,
//! system or connection is an empty result, never an error.

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, RwLock};

use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::cache::ResolutionCache;
use crate::config::{RepositoryConfig, ResolverConfig};
use crate::decrypt::{Decryptor, SopsDecryptor};
use crate::descriptor;
use crate::error::Result;
use crate::model::{Connection, Environment, EnvironmentRef, System};
use crate::remote::{GitLabClient, RepositoryClient};
use crate::subprocess::SubprocessManager;

/// Tree coordinates of a discovered environment. Ids are assigned on first
/// discovery and stay stable for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
struct EnvironmentLocation {
    project_id: Uuid,
    cluster: String,
    name: String,
}

pub struct EnvironmentResolver {
    config: RepositoryConfig,
    remote: Arc<dyn RepositoryClient>,
    decryptor: Option<Arc<dyn Decryptor>>,
    cache: ResolutionCache,
    locations: RwLock<HashMap<Uuid, EnvironmentLocation>>,
}

impl EnvironmentResolver {
    pub fn new(
        config: RepositoryConfig,
        remote: Arc<dyn RepositoryClient>,
        decryptor: Option<Arc<dyn Decryptor>>,
    ) -> Self {
        Self {
            config,
            remote,
            decryptor,
            cache: ResolutionCache::new(),
            locations: RwLock::new(HashMap::new()),
        }
    }

    /// Wire up the production pipeline: GitLab fetcher plus, when an age
    /// key is configured, the SOPS decryption gate.
    pub fn from_config(config: &ResolverConfig, subprocess: SubprocessManager) -> Result<Self> {
        config.validate()?;
        let remote = Arc::new(GitLabClient::new(&config.repository)?);
        let decryptor = match &config.decryption.age_key {
            Some(key) => Some(Arc::new(SopsDecryptor::with_timeout(
                key,
                config.decryption.timeout_seconds,
                subprocess,
            )?) as Arc<dyn Decryptor>),
            None => None,
        };
        Ok(Self::new(config.repository.clone(), remote, decryptor))
    }

    /// Discover the environments of a project by walking the deployment
    /// tree (`<root>/<cluster>/<environment>`). Returns resolved references
    /// for environments already in the cache and unresolved ones otherwise;
    /// nothing is fetched beyond the directory listings.
    pub async fn environments(&self, project_id: Uuid) -> Result<Vec<EnvironmentRef>> {
        if !self.config.projects.contains_key(&project_id) {
            tracing::warn!("Unknown project {}, no environments", project_id);
            return Ok(Vec::new());
        }

        let mut refs = Vec::new();
        let root = self.config.deployment_root.clone();
        for cluster in self.remote.list_directories(&root).await? {
            let cluster_path = format!("{}/{}", root, cluster);
            for name in self.remote.list_directories(&cluster_path).await? {
                let id = self.register_location(project_id, &cluster, &name);
                match self.cache.get(id) {
                    Some(env) => refs.push(EnvironmentRef::Resolved(env)),
                    None => refs.push(EnvironmentRef::Unresolved { id }),
                }
            }
        }
        tracing::debug!("Discovered {} environments for {}", refs.len(), project_id);
        Ok(refs)
    }

    /// Upgrade a reference to the resolved environment.
    pub async fn resolve(&self, env_ref: &EnvironmentRef) -> Result<Option<Arc<Environment>>> {
        match env_ref {
            EnvironmentRef::Resolved(env) => Ok(Some(Arc::clone(env))),
            EnvironmentRef::Unresolved { id } => self.environment_by_id(*id).await,
        }
    }

    /// Full environment by identifier; `None` when the identifier is
    /// unknown or its directory holds no parameters document.
    pub async fn environment_by_id(&self, env_id: Uuid) -> Result<Option<Arc<Environment>>> {
        let location = match self.location(env_id) {
            Some(location) => location,
            None => return Ok(None),
        };
        self.cache
            .get_or_resolve(env_id, || self.resolve_location(env_id, location))
            .await
    }

    /// Environment lookup by name, discovering the project's tree first
    /// when the name has not been seen yet.
    pub async fn environment_by_name(
        &self,
        project_id: Uuid,
        name: &str,
    ) -> Result<Option<Arc<Environment>>> {
        if self.location_id_by_name(project_id, name).is_none() {
            self.environments(project_id).await?;
        }
        match self.location_id_by_name(project_id, name) {
            Some(id) => self.environment_by_id(id).await,
            None => Ok(None),
        }
    }

    /// Single system of an environment by system identifier.
    pub async fn system_by_id(&self, env_id: Uuid, system_id: Uuid) -> Result<Option<System>> {
        Ok(self
            .environment_by_id(env_id)
            .await?
            .and_then(|env| env.system_by_id(system_id).cloned()))
    }

    /// Single system of an environment by name.
    pub async fn system_by_name(&self, env_id: Uuid, name: &str) -> Result<Option<System>> {
        Ok(self
            .environment_by_id(env_id)
            .await?
            .and_then(|env| env.system_by_name(name).cloned()))
    }

    /// Connections of the identified system across every currently cached
    /// environment. An unmatched system yields an empty list.
    pub fn connections_by_system_id(&self, system_id: Uuid) -> Vec<Connection> {
        self.cache
            .environments()
            .iter()
            .flat_map(|env| env.systems.iter())
            .filter(|system| system.id == system_id)
            .flat_map(|system| system.connections.iter().cloned())
            .collect()
    }

    /// Evict one environment so the next lookup resolves afresh.
    pub fn invalidate(&self, env_id: Uuid) {
        self.cache.invalidate(env_id);
    }

    /// Drop every cached environment and all discovered locations.
    pub fn clear(&self) {
        self.cache.clear();
        self.locations.write().unwrap().clear();
    }

    fn location(&self, env_id: Uuid) -> Option<EnvironmentLocation> {
        self.locations.read().unwrap().get(&env_id).cloned()
    }

    fn location_id_by_name(&self, project_id: Uuid, name: &str) -> Option<Uuid> {
        self.locations
            .read()
            .unwrap()
            .iter()
            .find(|(_, loc)| loc.project_id == project_id && loc.name == name)
            .map(|(id, _)| *id)
    }

    fn register_location(&self, project_id: Uuid, cluster: &str, name: &str) -> Uuid {
        let location = EnvironmentLocation {
            project_id,
            cluster: cluster.to_string(),
            name: name.to_string(),
        };
        let mut locations = self.locations.write().unwrap();
        if let Some((id, _)) = locations.iter().find(|(_, loc)| **loc == location) {
            return *id;
        }
        let id = Uuid::new_v4();
        locations.insert(id, location);
        id
    }

    /// One resolution pass: fetch, decrypt, parse, merge. The credentials
    /// overlay is applied strictly after the base parse completes.
    async fn resolve_location(
        &self,
        env_id: Uuid,
        location: EnvironmentLocation,
    ) -> Result<Option<Environment>> {
        let env_path = format!(
            "{}/{}/{}",
            self.config.deployment_root, location.cluster, location.name
        );

        let parameters_path = format!("{}/{}", env_path, self.config.parameters_file);
        let raw = match self.remote.read_file(&parameters_path).await? {
            Some(raw) => raw,
            None => {
                tracing::warn!(
                    "No parameters document at {}, not an environment",
                    env_path
                );
                return Ok(None);
            }
        };
        let parameters = self.document_plaintext(raw, &parameters_path).await;
        let mut systems = descriptor::parse_parameters_document(&parameters);

        let credentials_path = format!("{}/{}", env_path, self.config.credentials_file);
        match self.remote.read_file(&credentials_path).await? {
            Some(raw) => {
                let credentials = self.document_plaintext(raw, &credentials_path).await;
                let overlay = descriptor::parse_credentials_document(&credentials);
                systems = descriptor::merge_credentials(systems, overlay);
            }
            None => {
                tracing::debug!("No credential overlay for {}", env_path);
            }
        }

        tracing::debug!(
            "Resolved environment {} with {} systems",
            location.name,
            systems.len()
        );
        Ok(Some(Environment {
            id: env_id,
            name: location.name,
            cluster_name: location.cluster,
            project_id: location.project_id,
            systems,
        }))
    }

    /// Pass a fetched document through the decryption gate. Detection and
    /// decryption failures degrade to the raw content with a warning so one
    /// bad secret never blocks sibling environments.
    async fn document_plaintext(&self, raw: Vec<u8>, origin: &str) -> String {
        let text = String::from_utf8_lossy(&raw).into_owned();
        let decryptor = match &self.decryptor {
            Some(decryptor) => decryptor,
            None => return text,
        };

        let mut file = match NamedTempFile::new() {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!("Failed to stage {} for decryption: {}", origin, e);
                return text;
            }
        };
        if let Err(e) = file.write_all(&raw).and_then(|_| file.flush()) {
            tracing::warn!("Failed to stage {} for decryption: {}", origin, e);
            return text;
        }

        if !decryptor.is_encrypted(file.path()) {
            return text;
        }

        match decryptor.decrypt(file.path()).await {
            Ok(plaintext) => plaintext,
            Err(e) => {
                tracing::warn!("Failed to decrypt {}: {}; serving raw content", origin, e);
                text
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConnectionType;
    use crate::remote::InMemoryRepository;

    const PARAMETERS: &str = r#"
ATP_ENVGENE_CONFIGURATION:
  effectiveSet:
    test-system-1:
      HTTP:
        url: "https://one.example.com"
    test-system-2:
      HTTP:
        url: "https://two.example.com"
      DB:
        jdbc_url: "jdbc:postgresql://db:5432/two"
    test-system-3:
      KAFKA:
        brokers: "kafka:9092"
"#;

    const CREDENTIALS: &str = r#"
test-system-2:
  DB:
    password: "s3cret"
"#;

    fn repository_config(project_id: Uuid) -> RepositoryConfig {
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

    fn params_path(env: &str) -> String {
        format!(
            "effective-set/deployment/cluster-a/{}/values/deployment-parameters.yaml",
            env
        )
    }

    fn creds_path(env: &str) -> String {
        format!(
            "effective-set/deployment/cluster-a/{}/values/deployment-credentials.yaml",
            env
        )
    }

    fn resolver_with(
        project_id: Uuid,
        repo: &InMemoryRepository,
        decryptor: Option<Arc<dyn Decryptor>>,
    ) -> EnvironmentResolver {
        EnvironmentResolver::new(
            repository_config(project_id),
            Arc::new(repo.clone()),
            decryptor,
        )
    }

    async fn resolve_single(
        resolver: &EnvironmentResolver,
        project_id: Uuid,
    ) -> Arc<Environment> {
        let refs = resolver.environments(project_id).await.unwrap();
        assert_eq!(refs.len(), 1);
        resolver.resolve(&refs[0]).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn resolves_environment_without_credentials() {
        let project_id = Uuid::new_v4();
        let repo = InMemoryRepository::new();
        repo.put_file(&params_path("dev01"), PARAMETERS);

        let resolver = resolver_with(project_id, &repo, None);
        let env = resolve_single(&resolver, project_id).await;

        assert_eq!(env.name, "dev01");
        assert_eq!(env.cluster_name, "cluster-a");
        assert_eq!(env.project_id, project_id);
        assert_eq!(env.systems.len(), 3);
        assert_eq!(
            env.systems.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            vec!["test-system-1", "test-system-2", "test-system-3"]
        );
    }

    #[tokio::test]
    async fn merges_credentials_into_matching_system() {
        let project_id = Uuid::new_v4();
        let repo = InMemoryRepository::new();
        repo.put_file(&params_path("dev01"), PARAMETERS);
        repo.put_file(&creds_path("dev01"), CREDENTIALS);

        let resolver = resolver_with(project_id, &repo, None);
        let env = resolve_single(&resolver, project_id).await;

        let system = env.system_by_name("test-system-2").unwrap();
        let db = system.connections.iter().find(|c| c.name == "DB").unwrap();
        assert_eq!(db.connection_type, ConnectionType::Db);
        assert_eq!(db.parameters.get("password").unwrap(), "s3cret");
        assert_eq!(
            db.parameters.get("jdbc_url").unwrap(),
            "jdbc:postgresql://db:5432/two"
        );
    }

    #[tokio::test]
    async fn directory_without_parameters_is_skipped() {
        let project_id = Uuid::new_v4();
        let repo = InMemoryRepository::new();
        repo.put_file(&creds_path("broken"), CREDENTIALS);
        repo.put_file(&params_path("dev01"), PARAMETERS);

        let resolver = resolver_with(project_id, &repo, None);
        let refs = resolver.environments(project_id).await.unwrap();
        assert_eq!(refs.len(), 2);

        let mut resolved = Vec::new();
        for env_ref in &refs {
            if let Some(env) = resolver.resolve(env_ref).await.unwrap() {
                resolved.push(env);
            }
        }
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].name, "dev01");
    }

    #[tokio::test]
    async fn repeated_resolution_fetches_remote_only_once() {
        let project_id = Uuid::new_v4();
        let repo = InMemoryRepository::new();
        repo.put_file(&params_path("dev01"), PARAMETERS);

        let resolver = resolver_with(project_id, &repo, None);
        let env = resolve_single(&resolver, project_id).await;
        for _ in 0..4 {
            let again = resolver.environment_by_id(env.id).await.unwrap().unwrap();
            assert_eq!(again.id, env.id);
        }

        assert_eq!(repo.read_count(&params_path("dev01")), 1);
        assert_eq!(repo.read_count(&creds_path("dev01")), 1);
    }

    #[tokio::test]
    async fn invalidate_triggers_a_fresh_fetch() {
        let project_id = Uuid::new_v4();
        let repo = InMemoryRepository::new();
        repo.put_file(&params_path("dev01"), PARAMETERS);

        let resolver = resolver_with(project_id, &repo, None);
        let env = resolve_single(&resolver, project_id).await;

        resolver.invalidate(env.id);
        let again = resolver.environment_by_id(env.id).await.unwrap().unwrap();
        assert_eq!(again.name, "dev01");
        assert_eq!(repo.read_count(&params_path("dev01")), 2);
    }

    #[tokio::test]
    async fn system_lookups_by_id_and_name() {
        let project_id = Uuid::new_v4();
        let repo = InMemoryRepository::new();
        repo.put_file(&params_path("dev01"), PARAMETERS);

        let resolver = resolver_with(project_id, &repo, None);
        let env = resolve_single(&resolver, project_id).await;
        let system = env.system_by_name("test-system-2").unwrap();

        let by_id = resolver.system_by_id(env.id, system.id).await.unwrap().unwrap();
        assert_eq!(by_id.name, "test-system-2");

        let by_name = resolver
            .system_by_name(env.id, "test-system-2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_name.id, system.id);

        // Optimistic probes for absent systems are empty, not errors.
        assert!(resolver
            .system_by_id(env.id, Uuid::new_v4())
            .await
            .unwrap()
            .is_none());
        assert!(resolver
            .system_by_name(env.id, "no-such-system")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn connections_by_system_id_across_cached_environments() {
        let project_id = Uuid::new_v4();
        let repo = InMemoryRepository::new();
        repo.put_file(&params_path("dev01"), PARAMETERS);

        let resolver = resolver_with(project_id, &repo, None);
        let env = resolve_single(&resolver, project_id).await;
        let system = env.system_by_name("test-system-2").unwrap();

        let connections = resolver.connections_by_system_id(system.id);
        assert_eq!(connections.len(), 2);
        assert!(connections.iter().all(|c| c.system_id == system.id));

        assert!(resolver.connections_by_system_id(Uuid::new_v4()).is_empty());
    }

    #[tokio::test]
    async fn environment_by_name_discovers_lazily() {
        let project_id = Uuid::new_v4();
        let repo = InMemoryRepository::new();
        repo.put_file(&params_path("dev01"), PARAMETERS);

        let resolver = resolver_with(project_id, &repo, None);
        let env = resolver
            .environment_by_name(project_id, "dev01")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(env.name, "dev01");

        assert!(resolver
            .environment_by_name(project_id, "nope")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn unknown_project_yields_no_environments() {
        let repo = InMemoryRepository::new();
        repo.put_file(&params_path("dev01"), PARAMETERS);

        let resolver = resolver_with(Uuid::new_v4(), &repo, None);
        let refs = resolver.environments(Uuid::new_v4()).await.unwrap();
        assert!(refs.is_empty());
    }

    #[tokio::test]
    async fn encrypted_credentials_are_decrypted_before_the_merge() {
        let project_id = Uuid::new_v4();
        let repo = InMemoryRepository::new();
        repo.put_file(&params_path("dev01"), PARAMETERS);
        repo.put_file(
            &creds_path("dev01"),
            "test-system-2:\n  DB:\n    password: ENC[age, data:abc123]\n",
        );

        let (subprocess, mock) = SubprocessManager::mock();
        mock.expect_command("sops")
            .returns_stdout("test-system-2:\n  DB:\n    password: \"s3cret\"\n")
            .finish();
        let gate: Arc<dyn Decryptor> =
            Arc::new(SopsDecryptor::new("AGE-SECRET-KEY-1TEST", subprocess).unwrap());

        let resolver = resolver_with(project_id, &repo, Some(gate));
        let env = resolve_single(&resolver, project_id).await;
        let system = env.system_by_name("test-system-2").unwrap();
        let db = system.connections.iter().find(|c| c.name == "DB").unwrap();
        assert_eq!(db.parameters.get("password").unwrap(), "s3cret");

        // Plain parameters document never went through sops.
        assert_eq!(mock.call_count("sops"), 1);
    }

    #[tokio::test]
    async fn decryption_failure_falls_back_to_raw_content() {
        let project_id = Uuid::new_v4();
        let repo = InMemoryRepository::new();
        repo.put_file(&params_path("dev01"), PARAMETERS);
        repo.put_file(
            &creds_path("dev01"),
            "test-system-2:\n  DB:\n    password: ENC[age, data:abc123]\n",
        );

        let (subprocess, mock) = SubprocessManager::mock();
        mock.expect_command("sops")
            .returns_exit_code(128)
            .returns_stderr("Failed to get the data key: no decryption key")
            .finish();
        let gate: Arc<dyn Decryptor> =
            Arc::new(SopsDecryptor::new("AGE-SECRET-KEY-1TEST", subprocess).unwrap());

        let resolver = resolver_with(project_id, &repo, Some(gate));
        let env = resolve_single(&resolver, project_id).await;

        // Resolution survives; the overlay applies with the raw ciphertext
        // value rather than blocking the environment.
        let system = env.system_by_name("test-system-2").unwrap();
        let db = system.connections.iter().find(|c| c.name == "DB").unwrap();
        assert_eq!(db.parameters.get("password").unwrap(), "ENC[age, data:abc123]");
    }
}
