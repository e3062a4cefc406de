//! A session: one channel client, one coordinator and an optional polling
//! fallback, wired from one [`MirrorlineConfig`].

use std::sync::Arc;

use mirrorline_channel::{ChannelClient, ChannelRegistry, Clock, Scheduler, TokenProvider, Transport};
use mirrorline_sync::{
    Baseline, Coordinator, Notifier, SnapshotApplier, SyncMode, SyncObserver, SyncStateView,
};

use crate::config::MirrorlineConfig;
use crate::error::Result;
use crate::polling::{PollingDriver, Refresher};

/// Builder for [`Session`].
pub struct SessionBuilder {
    config: MirrorlineConfig,
    transport: Arc<dyn Transport>,
    applier: Arc<dyn SnapshotApplier>,
    tokens: Option<Arc<dyn TokenProvider>>,
    notifier: Option<Arc<dyn Notifier>>,
    observer: Option<Arc<dyn SyncObserver>>,
    refresher: Option<Arc<dyn Refresher>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    clock: Option<Arc<dyn Clock>>,
    registry: &'static ChannelRegistry,
}

impl SessionBuilder {
    pub fn token_provider(mut self, tokens: Arc<dyn TokenProvider>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Enable the polling fallback (unless disabled in config).
    pub fn refresher(mut self, refresher: Arc<dyn Refresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Registry holding the channel client. Defaults to the process-wide one.
    pub fn registry(mut self, registry: &'static ChannelRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Wire the session. Must be called inside a Tokio runtime.
    ///
    /// If the registry already holds a client for the configured path, that
    /// client is reused and the builder's transport, token provider and
    /// scheduler are ignored.
    pub fn build(self) -> Session {
        let path = self.config.channel.path.clone();
        let channel = self.registry.get_or_insert_with(&path, || {
            let mut builder = ChannelClient::builder(self.config.channel.clone(), Arc::clone(&self.transport));
            if let Some(tokens) = &self.tokens {
                builder = builder.token_provider(Arc::clone(tokens));
            }
            if let Some(scheduler) = &self.scheduler {
                builder = builder.scheduler(Arc::clone(scheduler));
            }
            builder.build()
        });

        let mut coordinator = Coordinator::builder(channel.clone(), self.applier).config(self.config.sync.clone());
        if let Some(notifier) = self.notifier {
            coordinator = coordinator.notifier(notifier);
        }
        if let Some(observer) = self.observer {
            coordinator = coordinator.observer(observer);
        }
        if let Some(scheduler) = self.scheduler {
            coordinator = coordinator.scheduler(scheduler);
        }
        if let Some(clock) = self.clock {
            coordinator = coordinator.clock(clock);
        }
        let coordinator = coordinator.build();

        let polling = match self.refresher {
            Some(refresher) if self.config.polling.enabled => Some(PollingDriver::spawn(
                coordinator.clone(),
                refresher,
                &self.config.polling,
            )),
            _ => None,
        };

        tracing::info!(channel = %path, polling = polling.is_some(), "session ready");
        Session {
            channel,
            coordinator,
            polling,
            registry: self.registry,
        }
    }
}

/// One synchronized channel.
pub struct Session {
    channel: ChannelClient,
    coordinator: Coordinator,
    polling: Option<PollingDriver>,
    registry: &'static ChannelRegistry,
}

impl Session {
    pub fn builder(
        config: MirrorlineConfig,
        transport: Arc<dyn Transport>,
        applier: Arc<dyn SnapshotApplier>,
    ) -> SessionBuilder {
        SessionBuilder {
            config,
            transport,
            applier,
            tokens: None,
            notifier: None,
            observer: None,
            refresher: None,
            scheduler: None,
            clock: None,
            registry: ChannelRegistry::global(),
        }
    }

    pub fn channel(&self) -> &ChannelClient {
        &self.channel
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn mode(&self) -> SyncMode {
        self.coordinator.mode()
    }

    pub fn state(&self) -> SyncStateView {
        self.coordinator.state()
    }

    pub fn is_polling(&self) -> bool {
        self.polling.as_ref().map_or(false, |p| !p.is_finished())
    }

    /// Connect the channel; the coordinator starts its handshake.
    pub async fn connect(&self) -> Result<()> {
        self.channel.connect().await?;
        Ok(())
    }

    /// Connect and wait for the first handshake to settle.
    pub async fn connect_and_sync(&self) -> Result<SyncMode> {
        self.connect().await?;
        self.coordinator.settled().await;
        Ok(self.mode())
    }

    /// Run a handshake and return the baseline it established.
    pub async fn sync(&self, force_full: bool) -> Result<Baseline> {
        Ok(self.coordinator.request_sync(force_full).await?)
    }

    /// Retarget the session at another context.
    pub async fn switch_context(&self, context_id: impl Into<String>) -> Result<Baseline> {
        Ok(self.coordinator.switch_context(Some(context_id.into())).await?)
    }

    /// Stop polling, detach the coordinator, disconnect and release the
    /// channel from the registry.
    pub async fn shutdown(mut self) {
        if let Some(polling) = self.polling.take() {
            polling.stop();
        }
        self.coordinator.detach();
        self.channel.disconnect().await;
        self.registry.remove(self.channel.channel());
        tracing::info!(channel = %self.channel.channel(), "session closed");
    }
}
