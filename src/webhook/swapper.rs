use crate::config::settings::{ImageCopyPolicy, ImageSwapPolicy, Settings};
use crate::copy::{CopyCoordinator, CopyTask};
use crate::filter::{self, FilterContext};
use crate::image::ImageReference;
use crate::prometheus::{CONTAINERS_PROCESSED, IMAGES_SWAPPED};
use crate::registry::TargetRegistry;
use k8s_openapi::api::core::v1::{Container, EphemeralContainer, Pod};
use kube::core::admission::AdmissionRequest;
use std::sync::Arc;
use tracing::{debug, info, warn};

const PULL_ALWAYS: &str = "Always";

/// Per-admission mutation pipeline: parse, short-circuit, filter, mirror,
/// swap.
pub struct ImageSwapper {
    registry: Arc<dyn TargetRegistry>,
    copier: CopyCoordinator,
    filters: Vec<String>,
    swap_policy: ImageSwapPolicy,
    copy_policy: ImageCopyPolicy,
}

impl ImageSwapper {
    pub fn new(
        registry: Arc<dyn TargetRegistry>,
        copier: CopyCoordinator,
        settings: &Settings,
    ) -> Self {
        Self {
            registry,
            copier,
            filters: settings.source.filters.clone(),
            swap_policy: settings.image_swap_policy,
            copy_policy: settings.image_copy_policy,
        }
    }

    /// Process every container of the Pod, in spec order, and return the
    /// (possibly) mutated Pod. Never fails: a broken swapper must not block
    /// admission.
    pub async fn mutate(&self, request: &AdmissionRequest<Pod>, mut pod: Pod) -> Pod {
        if pod.metadata.namespace.is_none() {
            pod.metadata.namespace = request.namespace.clone();
        }
        for list in [
            ContainerList::Containers,
            ContainerList::Init,
            ContainerList::Ephemeral,
        ] {
            for index in 0..list.len(&pod) {
                let Some(view) = list.view(&pod, index) else {
                    continue;
                };
                if let Some(new_image) = self.process_image(&pod, &view).await {
                    list.set_image(&mut pod, index, new_image);
                }
            }
        }
        pod
    }

    /// Returns the mirrored reference when the container image should be
    /// rewritten.
    async fn process_image(&self, pod: &Pod, view: &ContainerView) -> Option<String> {
        CONTAINERS_PROCESSED.inc();
        let reference = match ImageReference::parse(&view.image) {
            Ok(reference) => reference,
            Err(e) => {
                warn!(
                    container = view.name,
                    image = view.image,
                    error = %e,
                    "Unparseable image reference, leaving container untouched"
                );
                return None;
            }
        };
        if reference.domain() == self.registry.endpoint() {
            debug!(image = view.image, "Image already points at the target registry");
            return None;
        }
        let ctx = FilterContext {
            obj: pod,
            container: view.value.clone(),
        };
        if filter::matches(&ctx, &self.filters) {
            debug!(container = view.name, image = view.image, "Container excluded by filter");
            return None;
        }
        let target = format!("{}/{}", self.registry.endpoint(), reference.canonical());
        let task = CopyTask {
            source: reference,
            target: target.clone(),
            pull_always: view.pull_always,
            namespace: pod.metadata.namespace.clone().unwrap_or_default(),
            image_pull_secrets: pull_secret_names(pod),
        };
        self.copier.dispatch(self.copy_policy, task).await;
        let swap = match self.swap_policy {
            ImageSwapPolicy::Always => true,
            ImageSwapPolicy::Exists => self.registry.image_exists(&target).await,
        };
        if swap {
            info!(from = view.image, to = target, "Swapping container image");
            IMAGES_SWAPPED.inc();
            Some(target)
        } else {
            debug!(
                image = view.image,
                target, "Target not mirrored yet, leaving image untouched"
            );
            None
        }
    }
}

fn pull_secret_names(pod: &Pod) -> Vec<String> {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.image_pull_secrets.as_ref())
        .map(|refs| refs.iter().map(|r| r.name.clone()).collect())
        .unwrap_or_default()
}

/// The three container lists of a Pod spec, processed identically.
#[derive(Clone, Copy)]
enum ContainerList {
    Containers,
    Init,
    Ephemeral,
}

impl ContainerList {
    fn len(self, pod: &Pod) -> usize {
        let Some(spec) = pod.spec.as_ref() else {
            return 0;
        };
        match self {
            Self::Containers => spec.containers.len(),
            Self::Init => spec.init_containers.as_ref().map_or(0, Vec::len),
            Self::Ephemeral => spec.ephemeral_containers.as_ref().map_or(0, Vec::len),
        }
    }

    fn view(self, pod: &Pod, index: usize) -> Option<ContainerView> {
        let spec = pod.spec.as_ref()?;
        match self {
            Self::Containers => spec.containers.get(index).and_then(ContainerView::from_container),
            Self::Init => spec
                .init_containers
                .as_ref()?
                .get(index)
                .and_then(ContainerView::from_container),
            Self::Ephemeral => spec
                .ephemeral_containers
                .as_ref()?
                .get(index)
                .and_then(ContainerView::from_ephemeral),
        }
    }

    fn set_image(self, pod: &mut Pod, index: usize, image: String) {
        let Some(spec) = pod.spec.as_mut() else {
            return;
        };
        match self {
            Self::Containers => {
                if let Some(container) = spec.containers.get_mut(index) {
                    container.image = Some(image);
                }
            }
            Self::Init => {
                if let Some(container) =
                    spec.init_containers.as_mut().and_then(|list| list.get_mut(index))
                {
                    container.image = Some(image);
                }
            }
            Self::Ephemeral => {
                if let Some(container) = spec
                    .ephemeral_containers
                    .as_mut()
                    .and_then(|list| list.get_mut(index))
                {
                    container.image = Some(image);
                }
            }
        }
    }
}

/// Snapshot of one container, taken before any mutation of this iteration.
struct ContainerView {
    name: String,
    image: String,
    pull_always: bool,
    value: serde_json::Value,
}

impl ContainerView {
    fn from_container(container: &Container) -> Option<Self> {
        Some(Self {
            name: container.name.clone(),
            image: container.image.clone()?,
            pull_always: container.image_pull_policy.as_deref() == Some(PULL_ALWAYS),
            value: serde_json::to_value(container).ok()?,
        })
    }

    fn from_ephemeral(container: &EphemeralContainer) -> Option<Self> {
        Some(Self {
            name: container.name.clone(),
            image: container.image.clone()?,
            pull_always: container.image_pull_policy.as_deref() == Some(PULL_ALWAYS),
            value: serde_json::to_value(container).ok()?,
        })
    }
}
