//! # Dispatch Service
//!
//! One cooperative loop per process. It listens on every configured source's
//! `complete`/`incomplete` channels and runs the reconciliation sweep on its own
//! schedule between notifications. A lost subscription is rebuilt in place; repeated
//! store failures escalate to a full reconnect through the consecutive-error tracker.

use std::sync::Arc;
use std::time::Instant;

use opentelemetry::KeyValue;
use tracing::{debug, info, warn};

use super::dispatcher::Dispatcher;
use super::reconciler::Reconciler;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::keys::{dispatch_channels, parse_channel};
use crate::logging::log_error;
use crate::metrics::store_reconnects_total;
use crate::resilience::{ConsecutiveErrorTracker, ErrorAction};
use crate::shutdown::ShutdownSignal;
use crate::store::{KvStore, Notification, Subscription};

const COMPONENT: &str = "dispatcher";

pub struct DispatchService {
    store: Arc<dyn KvStore>,
    dispatcher: Arc<Dispatcher>,
    reconciler: Arc<Reconciler>,
    config: Arc<PipelineConfig>,
}

impl std::fmt::Debug for DispatchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchService")
            .field("channels", &self.channels())
            .finish()
    }
}

impl DispatchService {
    pub fn new(
        store: Arc<dyn KvStore>,
        dispatcher: Arc<Dispatcher>,
        reconciler: Arc<Reconciler>,
        config: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            reconciler,
            config,
        }
    }

    pub fn channels(&self) -> Vec<String> {
        self.config
            .sources
            .iter()
            .flat_map(|source| dispatch_channels(source.kind))
            .collect()
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Dispatch one received notification; unknown channels and empty ids are ignored
    pub async fn handle_notification(&self, notification: &Notification) -> PipelineResult<()> {
        let Some((source, state)) = parse_channel(&notification.channel) else {
            warn!(channel = %notification.channel, "Notification on unexpected channel");
            return Ok(());
        };
        let id = notification.payload.trim();
        if id.is_empty() {
            return Ok(());
        }
        let outcome = self.dispatcher.dispatch(source, state, id).await?;
        debug!(source = %source, state = %state, item_id = id, outcome = ?outcome, "Notification dispatched");
        Ok(())
    }

    async fn subscribe(&self) -> PipelineResult<Box<dyn Subscription>> {
        let channels = self.channels();
        let subscription = self.store.subscribe(&channels).await?;
        info!(channels = ?channels, "Subscribed to dispatch channels");
        Ok(subscription)
    }

    async fn reconcile(&self) {
        if let Err(e) = self.reconciler.run_sweep().await {
            log_error(COMPONENT, "reconcile", &e.to_string(), None);
        }
    }

    async fn escalate(&self, errors: &mut ConsecutiveErrorTracker, error: &PipelineError, shutdown: &ShutdownSignal) {
        if errors.record_failure(error) == ErrorAction::Reconnect {
            store_reconnects_total().add(1, &[KeyValue::new("component", COMPONENT)]);
            if let Err(e) = self.store.reconnect().await {
                warn!(error = %e, "Store reconnect failed");
            }
            shutdown.sleep(self.config.processor.reconnect_backoff()).await;
        }
    }

    pub async fn run(&self, shutdown: ShutdownSignal) {
        let mut errors = ConsecutiveErrorTracker::new(
            COMPONENT,
            self.config.processor.io_error_threshold,
            self.config.processor.generic_error_threshold,
        );
        let interval = self.config.dispatch.reconcile_interval();
        let poll_timeout = self.config.dispatch.poll_timeout();

        if self.config.dispatch.reconcile_on_startup {
            self.reconcile().await;
        }
        let mut next_sweep = Instant::now() + interval;
        let mut subscription: Option<Box<dyn Subscription>> = None;
        info!("Dispatch service started");

        while !shutdown.is_triggered() {
            if subscription.is_none() {
                match self.subscribe().await {
                    Ok(sub) => subscription = Some(sub),
                    Err(e) => {
                        log_error(COMPONENT, "subscribe", &e.to_string(), None);
                        self.escalate(&mut errors, &e, &shutdown).await;
                        shutdown.sleep(poll_timeout).await;
                    }
                }
            }

            if let Some(sub) = subscription.as_mut() {
                match sub.next_notification(poll_timeout).await {
                    Ok(Some(notification)) => match self.handle_notification(&notification).await {
                        Ok(()) => errors.record_success(),
                        Err(e) => {
                            log_error(COMPONENT, "dispatch", &e.to_string(), Some(&notification.payload));
                            self.escalate(&mut errors, &e, &shutdown).await;
                        }
                    },
                    Ok(None) => {}
                    Err(e) => {
                        let e = PipelineError::from(e);
                        log_error(COMPONENT, "next_notification", &e.to_string(), None);
                        subscription = None;
                        self.escalate(&mut errors, &e, &shutdown).await;
                    }
                }
            }

            if Instant::now() >= next_sweep {
                self.reconcile().await;
                next_sweep = Instant::now() + interval;
            }
        }
        info!("Dispatch service stopped");
    }
}
