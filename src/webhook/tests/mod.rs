

#[cfg(test)]
pub mod test_helpers {
    use crate::config::settings::{
        CopySettings, ImageCopyPolicy, ImageSwapPolicy, Logger, QueueFullPolicy, Repository,
        Settings, Source, Target,
    };
    use crate::copy::{CopyBackend, CopyCoordinator, CopyError, CopyRunner, CopyTask};
    use crate::image::ImageReference;
    use crate::registry::{RegistryError, TargetRegistry};
    use crate::secrets::PullSecretsProvider;
    use crate::webhook::swapper::ImageSwapper;
    use async_trait::async_trait;
    use k8s_openapi::api::core::v1::{Container, Pod, PodSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::core::admission::{AdmissionRequest, AdmissionReview};
    use std::collections::HashSet;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    pub struct MockRegistry {
        endpoint: String,
        pub existing: Mutex<HashSet<String>>,
        pub creates: AtomicUsize,
        pub exists_checks: AtomicUsize,
        pub fail_creates: bool,
    }

    impl MockRegistry {
        pub fn new(endpoint: &str) -> Self {
            Self {
                endpoint: endpoint.to_string(),
                existing: Mutex::new(HashSet::new()),
                creates: AtomicUsize::new(0),
                exists_checks: AtomicUsize::new(0),
                fail_creates: false,
            }
        }

        pub fn with_existing(self, references: &[&str]) -> Self {
            {
                let mut existing = self.existing.lock().unwrap();
                for reference in references {
                    existing.insert(reference.to_string());
                }
            }
            self
        }

        pub fn failing_creates(mut self) -> Self {
            self.fail_creates = true;
            self
        }
    }

    #[async_trait]
    impl TargetRegistry for MockRegistry {
        fn endpoint(&self) -> &str {
            &self.endpoint
        }

        async fn credentials(&self) -> String {
            "AWS:token".to_string()
        }

        async fn image_exists(&self, reference: &str) -> bool {
            self.exists_checks.fetch_add(1, Ordering::SeqCst);
            self.existing.lock().unwrap().contains(reference)
        }

        async fn create_repository(&self, name: &str) -> Result<(), RegistryError> {
            if self.fail_creates {
                return Err(RegistryError::RepositoryCreate {
                    name: name.to_string(),
                    reason: "remote unavailable".to_string(),
                });
            }
            self.creates.fetch_add(1, Ordering::SeqCst);
            self.existing.lock().unwrap().insert(name.to_string());
            Ok(())
        }
    }

    pub struct CopyRecord {
        pub source: String,
        pub target: String,
        pub pull_always: bool,
        pub authfile: Option<PathBuf>,
        pub authfile_existed: bool,
    }

    #[derive(Default)]
    pub struct RecordingBackend {
        pub copies: Mutex<Vec<CopyRecord>>,
        pub delay: Option<Duration>,
    }

    impl RecordingBackend {
        pub fn with_delay(delay: Duration) -> Self {
            Self {
                copies: Mutex::new(Vec::new()),
                delay: Some(delay),
            }
        }

        pub fn copy_count(&self) -> usize {
            self.copies.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CopyBackend for RecordingBackend {
        async fn copy(
            &self,
            task: &CopyTask,
            src_authfile: Option<&Path>,
            _dest_creds: Option<&str>,
        ) -> Result<(), CopyError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.copies.lock().unwrap().push(CopyRecord {
                source: task.source.canonical(),
                target: task.target.clone(),
                pull_always: task.pull_always,
                authfile: src_authfile.map(Path::to_path_buf),
                authfile_existed: src_authfile.map(Path::exists).unwrap_or(false),
            });
            Ok(())
        }
    }

    pub struct StaticSecrets(pub Option<String>);

    #[async_trait]
    impl PullSecretsProvider for StaticSecrets {
        async fn auth_config(&self, _namespace: &str, _names: &[String]) -> Option<String> {
            self.0.clone()
        }
    }

    pub fn copy_settings() -> CopySettings {
        CopySettings {
            max_workers: 4,
            queue_size: 16,
            queue_full_policy: QueueFullPolicy::Block,
            timeout_seconds: None,
        }
    }

    pub fn make_settings(
        swap_policy: ImageSwapPolicy,
        copy_policy: ImageCopyPolicy,
        filters: &[&str],
    ) -> Settings {
        Settings {
            logger: Logger::default(),
            listen_address: "127.0.0.1:0".to_string(),
            dry_run: false,
            tls: None,
            source: Source {
                filters: filters.iter().map(|s| s.to_string()).collect(),
            },
            target: Target {
                account_id: "123456789012".to_string(),
                region: "us-east-1".to_string(),
                repository: Repository::default(),
                cache_capacity: 64,
            },
            image_swap_policy: swap_policy,
            image_copy_policy: copy_policy,
            copy: copy_settings(),
            prometheus: None,
        }
    }

    pub struct Harness {
        pub registry: Arc<MockRegistry>,
        pub backend: Arc<RecordingBackend>,
        pub swapper: ImageSwapper,
    }

    pub fn harness(
        endpoint: &str,
        swap_policy: ImageSwapPolicy,
        copy_policy: ImageCopyPolicy,
        filters: &[&str],
        existing: &[&str],
        copy_delay: Option<Duration>,
    ) -> Harness {
        let registry = Arc::new(MockRegistry::new(endpoint).with_existing(existing));
        let backend = Arc::new(match copy_delay {
            Some(delay) => RecordingBackend::with_delay(delay),
            None => RecordingBackend::default(),
        });
        let runner = CopyRunner::new(
            registry.clone(),
            Arc::new(StaticSecrets(None)),
            backend.clone(),
        );
        let copier = CopyCoordinator::start(runner, &copy_settings());
        let swapper = ImageSwapper::new(
            registry.clone(),
            copier,
            &make_settings(swap_policy, copy_policy, filters),
        );
        Harness {
            registry,
            backend,
            swapper,
        }
    }

    pub fn make_pod(namespace: &str, images: &[&str]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("test-pod".to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: images
                    .iter()
                    .enumerate()
                    .map(|(index, image)| Container {
                        name: format!("c{}", index),
                        image: Some((*image).to_string()),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn copy_task(source: &str, target: &str, pull_always: bool) -> CopyTask {
        CopyTask {
            source: ImageReference::parse(source).unwrap(),
            target: target.to_string(),
            pull_always,
            namespace: "default".to_string(),
            image_pull_secrets: vec!["regcred".to_string()],
        }
    }

    pub fn admission_request_in(pod: &Pod, namespace: &str) -> AdmissionRequest<Pod> {
        let review: AdmissionReview<Pod> = serde_json::from_value(serde_json::json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": {"group": "", "version": "v1", "kind": "Pod"},
                "resource": {"group": "", "version": "v1", "resource": "pods"},
                "requestKind": {"group": "", "version": "v1", "kind": "Pod"},
                "requestResource": {"group": "", "version": "v1", "resource": "pods"},
                "name": pod.metadata.name.clone().unwrap_or_default(),
                "namespace": namespace,
                "operation": "CREATE",
                "userInfo": {"username": "system:serviceaccount:kube-system:replicaset-controller"},
                "dryRun": false,
                "object": pod,
            }
        }))
        .expect("valid admission review");
        review.try_into().expect("admission request")
    }

    pub fn admission_request(pod: &Pod) -> AdmissionRequest<Pod> {
        let namespace = pod
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        admission_request_in(pod, &namespace)
    }

    pub fn images(pod: &Pod) -> Vec<String> {
        pod.spec
            .as_ref()
            .map(|spec| {
                spec.containers
                    .iter()
                    .filter_map(|container| container.image.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}
