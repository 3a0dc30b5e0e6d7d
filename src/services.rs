//! The context object every plugin is handed at load time.

use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::api::Api;
use crate::config::Config;
use crate::events::Events;
use crate::hooks::HookManager;
use crate::image::ProcessImage;
use crate::metrics::MetricsSink;
use crate::stack::ArgumentStack;
use crate::tasks::MainThreadQueue;

static GLOBAL: OnceCell<Arc<Services>> = OnceCell::new();

pub struct Services {
    pub image: Arc<ProcessImage>,
    pub hooks: Arc<HookManager>,
    pub events: Arc<Events>,
    pub api: Arc<Api>,
    pub stack: Arc<ArgumentStack>,
    pub tasks: Arc<MainThreadQueue>,
    pub metrics: Arc<dyn MetricsSink>,
    pub config: Arc<dyn Config>,
}

impl Services {
    pub fn new(image: Arc<ProcessImage>, config: Arc<dyn Config>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            hooks: Arc::new(HookManager::new(image.clone())),
            events: Arc::new(Events::with_metrics(metrics.clone())),
            api: Arc::new(Api::with_metrics(metrics.clone())),
            stack: Arc::new(ArgumentStack::new()),
            tasks: Arc::new(MainThreadQueue::new()),
            image,
            metrics,
            config,
        }
    }

    /// Publishes `services` for code that can only reach it through a static, such as
    /// interceptors of targets hooked before any plugin state exists.
    ///
    /// Returns the services back if another instance was already published.
    pub fn install_global(services: Arc<Services>) -> Result<&'static Arc<Services>, Arc<Services>> {
        GLOBAL.try_insert(services).map_err(|(_, rejected)| rejected)
    }

    pub fn global() -> Option<&'static Arc<Services>> {
        GLOBAL.get()
    }

    /// Removes everything `owner` registered with the hook manager.
    pub fn teardown(&self, owner: &str) -> usize {
        let removed = self.hooks.unhook_owner(owner);
        tracing::info!(owner, removed, "plugin torn down");
        removed
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("image", &self.image)
            .field("hooks", &self.hooks)
            .field("events", &self.events)
            .field("api", &self.api)
            .finish_non_exhaustive()
    }
}
