use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;

use super::probe;
use super::probe::Probe;
use super::state::DiscoveryState;
use super::state::Transition;
use super::state::TransitionError;
use super::transport::Transport;
use crate::config::DiscoveryConfig;
use crate::store::DeviceId;
use crate::store::Store;
use crate::store::StoreError;

/// The device a discovery attempt probes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryTarget {
    pub name: String,
    pub address: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MachineError {
    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// State shared between the machine and its attempt task.
#[derive(Debug, Default)]
struct Shared {
    /// Bumped on every start or cancel; results tagged with an older value are dropped
    generation: u64,
    history: Vec<DiscoveryState>,
    target: Option<DiscoveryTarget>,
    /// Device created for this session, at most one
    device: Option<DeviceId>,
}

struct Inner {
    shared: Mutex<Shared>,
    state_tx: watch::Sender<DiscoveryState>,
    store: Arc<dyn Store>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, shared: &mut Shared, state: DiscoveryState) {
        info!("Discovery attempt {}: {}", shared.generation, state);
        shared.history.push(state);
        self.state_tx.send_replace(state);
    }

    /// Record a state reached by attempt `generation`.
    ///
    /// Returns false if the attempt has been superseded, in which case nothing changes.
    fn advance(&self, generation: u64, state: DiscoveryState) -> bool {
        let mut shared = self.lock();
        if shared.generation != generation {
            debug!("Dropping {} from stale attempt {}", state, generation);
            return false;
        }
        self.publish(&mut shared, state);
        true
    }

    /// Persist extracted entities and move to `Ready`.
    ///
    /// The generation check and the store writes happen under one lock, so a cancelled
    /// attempt can never persist anything once a newer one has begun.
    fn complete(&self, generation: u64, target: &DiscoveryTarget, names: &[String]) {
        let mut shared = self.lock();
        if shared.generation != generation {
            debug!("Dropping entities from stale attempt {}", generation);
            return;
        }

        let state = match self.persist(&mut shared, target, names) {
            Ok(0) => {
                error!(
                    "Internal error: {} entities extracted but none persisted",
                    names.len()
                );
                DiscoveryState::NoEntitiesFound
            }
            Ok(count) => {
                info!("Created {} entities for '{}'", count, target.name);
                DiscoveryState::Ready
            }
            Err(e) => {
                error!("Failed to persist discovered entities: {}", e);
                DiscoveryState::NoEntitiesFound
            }
        };
        self.publish(&mut shared, state);
    }

    /// Store the extracted entities, creating the session's device if needed.
    ///
    /// A new device and its entities go in with a single store write, so a failure
    /// leaves no device behind and the session keeps no device id.
    fn persist(
        &self,
        shared: &mut Shared,
        target: &DiscoveryTarget,
        names: &[String],
    ) -> Result<usize, StoreError> {
        let id = match shared.device {
            Some(id) => {
                self.store.add_entities(id, names)?;
                id
            }
            None => {
                let id = self
                    .store
                    .create_device_with_entities(&target.name, &target.address, names)?;
                info!("Created device {} ('{}' at {})", id, target.name, target.address);
                shared.device = Some(id);
                id
            }
        };
        Ok(self
            .store
            .device(id)?
            .map(|device| device.entities.len())
            .unwrap_or(0))
    }

    fn ensure_device(
        &self,
        shared: &mut Shared,
        target: &DiscoveryTarget,
    ) -> Result<DeviceId, StoreError> {
        if let Some(id) = shared.device {
            return Ok(id);
        }
        let id = self.store.create_device(&target.name, &target.address)?;
        info!("Created device {} ('{}' at {})", id, target.name, target.address);
        shared.device = Some(id);
        Ok(id)
    }
}

/// The probe sequence of one attempt.
#[derive(Clone)]
struct Pipeline {
    probe: Probe,
    single_fetch: bool,
    settle_delay: Duration,
}

impl Pipeline {
    async fn run(self, inner: Arc<Inner>, generation: u64, target: DiscoveryTarget) {
        let address = target.address.as_str();

        let Some(response) = self.probe.fetch(address).await else {
            inner.advance(generation, DiscoveryState::ConnectionFailed);
            return;
        };
        if !inner.advance(generation, DiscoveryState::Connected) {
            return;
        }
        self.settle().await;

        let valid = if self.single_fetch {
            probe::is_json_object(&response.body)
        } else {
            self.probe.has_valid_format(address).await
        };
        if !valid {
            inner.advance(generation, DiscoveryState::FormatInvalid);
            return;
        }
        if !inner.advance(generation, DiscoveryState::FormatValid) {
            return;
        }
        self.settle().await;

        let names = if self.single_fetch {
            probe::object_keys(&response.body).unwrap_or_default()
        } else {
            self.probe.extract_entities(address).await
        };
        if names.is_empty() {
            inner.advance(generation, DiscoveryState::NoEntitiesFound);
            return;
        }

        inner.complete(generation, &target, &names);
    }

    async fn settle(&self) {
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
    }
}

/// Discovery state machine for one onboarding session.
///
/// Runs reachability, format validation and entity extraction in sequence on a
/// background task, one attempt at a time. Entities are written to the store only when
/// an attempt reaches `Ready`.
pub struct DiscoveryMachine {
    inner: Arc<Inner>,
    pipeline: Pipeline,
    task: Option<JoinHandle<()>>,
}

impl DiscoveryMachine {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn Store>,
        config: &DiscoveryConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(DiscoveryState::Connecting);
        Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared::default()),
                state_tx,
                store,
            }),
            pipeline: Pipeline {
                probe: Probe::new(transport, config.timeout()),
                single_fetch: config.single_fetch,
                settle_delay: config.settle_delay(),
            },
            task: None,
        }
    }

    pub fn state(&self) -> DiscoveryState {
        *self.inner.state_tx.borrow()
    }

    /// Watch state changes. Updates arrive in the order the probes resolve.
    pub fn subscribe(&self) -> watch::Receiver<DiscoveryState> {
        self.inner.state_tx.subscribe()
    }

    /// States visited by the current attempt.
    pub fn history(&self) -> Vec<DiscoveryState> {
        self.inner.lock().history.clone()
    }

    /// Number of the current attempt (0 before the first start).
    pub fn attempt(&self) -> u64 {
        self.inner.lock().generation
    }

    pub fn target(&self) -> Option<DiscoveryTarget> {
        self.inner.lock().target.clone()
    }

    /// Device created by this session, if any.
    pub fn device(&self) -> Option<DeviceId> {
        self.inner.lock().device
    }

    pub fn transitions(&self) -> &'static [Transition] {
        self.state().transitions()
    }

    /// Start a new attempt at `Connecting`, cancelling any attempt in flight.
    pub fn start(&mut self, target: DiscoveryTarget) -> u64 {
        self.abort_task();

        let generation = {
            let mut shared = self.inner.lock();
            shared.generation += 1;
            shared.history.clear();
            shared.target = Some(target.clone());
            info!(
                "Starting discovery attempt {} for '{}' at {}",
                shared.generation, target.name, target.address
            );
            self.inner.publish(&mut shared, DiscoveryState::Connecting);
            shared.generation
        };

        let inner = self.inner.clone();
        let pipeline = self.pipeline.clone();
        self.task = Some(tokio::spawn(async move {
            pipeline.run(inner, generation, target).await;
        }));

        generation
    }

    /// Invalidate the current attempt without starting another.
    ///
    /// The published state stays where the attempt left it. `settled` returns that
    /// state right away instead of waiting for an attempt that will never finish.
    pub fn cancel(&mut self) {
        self.abort_task();
        let mut shared = self.inner.lock();
        shared.generation += 1;
        debug!("Discovery cancelled, next attempt is {}", shared.generation + 1);
    }

    /// Restart discovery with the same target from a failure state.
    pub fn retry(&mut self) -> Result<u64, TransitionError> {
        let target = self.check(Transition::Retry)?;
        Ok(self.start(target))
    }

    /// Abandon discovery from a failure state.
    ///
    /// Returns the session's device, created with zero entities if discovery never
    /// produced one.
    pub fn skip(&mut self) -> Result<DeviceId, MachineError> {
        let target = self.check(Transition::Skip)?;
        self.cancel();

        let mut shared = self.inner.lock();
        let id = self.inner.ensure_device(&mut shared, &target)?;
        info!("Discovery skipped for '{}'", target.name);
        Ok(id)
    }

    /// Wait until the current attempt reaches a terminal state.
    ///
    /// Returns the current state immediately when no attempt is running.
    pub async fn settled(&self) -> DiscoveryState {
        let current = self.state();
        if current.is_terminal() || self.task.is_none() {
            return current;
        }

        let mut rx = self.subscribe();
        let state = match rx.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };
        state
    }

    fn check(&self, transition: Transition) -> Result<DiscoveryTarget, TransitionError> {
        let state = self.state();
        let err = TransitionError { state, transition };
        if !state.allows(transition) {
            return Err(err);
        }
        self.target().ok_or(err)
    }

    fn abort_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for DiscoveryMachine {
    fn drop(&mut self) {
        self.abort_task();
    }
}
