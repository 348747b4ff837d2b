//! Setup of the correction chain.
//!
//! The `Configurator` walks both receivers from discovery through
//! configuration to key installation. Every configuration item is attempted
//! and its outcome kept; a rejected item or a rejected key pair is reported
//! but only stops the pipeline when the key policy is strict.

use crate::config::{ConfigItem, ConfigKey, ConfigSet};
use crate::deployment::Deployment;
use crate::device::{DeviceAddress, DeviceHandle, DeviceRole};
use crate::keys::{KeyError, KeyStore};
use crate::receiver::Receiver;
use crate::retry::{RetryPolicy, Sleeper, ThreadSleeper};
use crate::transport::BusTransport;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    Idle,
    DiscoveringCorrectionReceiver,
    DiscoveringPositionReceiver,
    ConfiguringCorrectionReceiver,
    ConfiguringPositionReceiver,
    LoadingKeys,
    Ready,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Ready | PipelineState::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Discovery,
    CorrectionConfig,
    PositionConfig,
    Persist,
    KeyLoad,
}

impl core::fmt::Display for Stage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Stage::Discovery => "discovery",
            Stage::CorrectionConfig => "correction receiver configuration",
            Stage::PositionConfig => "position receiver configuration",
            Stage::Persist => "configuration persist",
            Stage::KeyLoad => "key load",
        };
        f.write_str(name)
    }
}

/// What to do when the position receiver rejects the key pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeyLoadPolicy {
    /// Report the failure and continue to `Ready`.
    #[default]
    Lenient,
    /// Stop in `Failed`.
    Strict,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("{device} not found after {attempts} attempts")]
    DiscoveryTimeout { device: DeviceAddress, attempts: u32 },
    #[error("{device} rejected {key} = {value}")]
    ConfigWriteRejected {
        device: DeviceAddress,
        key: ConfigKey,
        value: u64,
    },
    #[error("{device} rejected the key pair")]
    KeyLoadRejected { device: DeviceAddress },
    #[error("{device} failed to persist its configuration")]
    PersistFailed { device: DeviceAddress },
    #[error("invalid key configuration: {0}")]
    KeysInvalid(#[from] KeyError),
    #[error("receivers need distinct addresses and their own roles, got {correction} and {position}")]
    AddressConflict {
        correction: DeviceAddress,
        position: DeviceAddress,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub key: ConfigKey,
    pub value: u64,
    pub accepted: bool,
}

/// Per-item outcomes of one device's configuration stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub device: DeviceAddress,
    pub items: Vec<ItemOutcome>,
}

impl StageReport {
    pub fn new(device: DeviceAddress) -> Self {
        Self {
            device,
            items: Vec::new(),
        }
    }

    pub fn record(&mut self, item: &ConfigItem, accepted: bool) {
        self.items.push(ItemOutcome {
            key: item.key,
            value: item.value,
            accepted,
        });
    }

    /// Logical AND over every item.
    pub fn accepted(&self) -> bool {
        self.items.iter().all(|outcome| outcome.accepted)
    }

    pub fn rejected(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.items.iter().filter(|outcome| !outcome.accepted)
    }

    pub fn errors(&self) -> Vec<PipelineError> {
        self.rejected()
            .map(|outcome| PipelineError::ConfigWriteRejected {
                device: self.device,
                key: outcome.key,
                value: outcome.value,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryOutcome {
    pub device: DeviceAddress,
    pub attempts: u32,
    pub connected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PersistOutcome {
    #[default]
    NotAttempted,
    Unsupported,
    Saved,
    Failed,
}

/// Outcome of one setup attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub state: PipelineState,
    pub correction_discovery: Option<DiscoveryOutcome>,
    pub position_discovery: Option<DiscoveryOutcome>,
    pub correction_config: Option<StageReport>,
    pub position_config: Option<StageReport>,
    pub persist: PersistOutcome,
    pub keys_loaded: Option<bool>,
}

impl Default for PipelineResult {
    fn default() -> Self {
        Self {
            state: PipelineState::Idle,
            correction_discovery: None,
            position_discovery: None,
            correction_config: None,
            position_config: None,
            persist: PersistOutcome::NotAttempted,
            keys_loaded: None,
        }
    }
}

impl PipelineResult {
    /// First stage that did not succeed.
    pub fn failed_stage(&self) -> Option<Stage> {
        let undiscovered = |d: &Option<DiscoveryOutcome>| d.is_some_and(|d| !d.connected);
        let rejected = |r: &Option<StageReport>| r.as_ref().is_some_and(|r| !r.accepted());

        if undiscovered(&self.correction_discovery) || undiscovered(&self.position_discovery) {
            Some(Stage::Discovery)
        } else if rejected(&self.correction_config) {
            Some(Stage::CorrectionConfig)
        } else if rejected(&self.position_config) {
            Some(Stage::PositionConfig)
        } else if self.persist == PersistOutcome::Failed {
            Some(Stage::Persist)
        } else if self.keys_loaded == Some(false) {
            Some(Stage::KeyLoad)
        } else {
            None
        }
    }

    /// Ready with every stage accepted.
    pub fn is_success(&self) -> bool {
        self.state == PipelineState::Ready && self.failed_stage().is_none()
    }

    pub fn errors(&self) -> Vec<PipelineError> {
        let mut errors = Vec::new();

        for discovery in [self.correction_discovery, self.position_discovery].into_iter().flatten() {
            if !discovery.connected {
                errors.push(PipelineError::DiscoveryTimeout {
                    device: discovery.device,
                    attempts: discovery.attempts,
                });
            }
        }
        for report in [&self.correction_config, &self.position_config].into_iter().flatten() {
            errors.extend(report.errors());
        }
        if self.persist == PersistOutcome::Failed {
            if let Some(report) = &self.position_config {
                errors.push(PipelineError::PersistFailed { device: report.device });
            }
        }
        if self.keys_loaded == Some(false) {
            if let Some(discovery) = self.position_discovery {
                errors.push(PipelineError::KeyLoadRejected {
                    device: discovery.device,
                });
            }
        }
        errors
    }
}

/// Everything the pipeline and the poll loop operate on: the shared bus,
/// one handle per receiver, the key pair and the deployment they came from.
#[derive(Debug)]
pub struct CorrectionChain<B: BusTransport, H: DeviceHandle = Receiver> {
    pub(crate) bus: B,
    pub(crate) correction: H,
    pub(crate) position: H,
    keys: KeyStore,
    deployment: Deployment,
}

impl<B: BusTransport> CorrectionChain<B, Receiver> {
    /// Fails when the deployment's addresses collide or carry the wrong
    /// roles, or when its key pair is invalid.
    pub fn new(bus: B, deployment: Deployment) -> Result<Self, PipelineError> {
        let correction = deployment.correction_receiver;
        let position = deployment.position_receiver;
        if correction.bus_address() == position.bus_address()
            || correction.role() != DeviceRole::CorrectionReceiver
            || position.role() != DeviceRole::PositionReceiver
        {
            return Err(PipelineError::AddressConflict { correction, position });
        }

        let keys = deployment.key_store()?;
        Ok(Self {
            correction: Receiver::new(deployment.correction_receiver),
            position: Receiver::new(deployment.position_receiver),
            bus,
            keys,
            deployment,
        })
    }
}

impl<B: BusTransport, H: DeviceHandle> CorrectionChain<B, H> {
    pub fn with_handles(bus: B, correction: H, position: H, keys: KeyStore, deployment: Deployment) -> Self {
        Self {
            bus,
            correction,
            position,
            keys,
            deployment,
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn correction(&self) -> &H {
        &self.correction
    }

    pub fn position(&self) -> &H {
        &self.position
    }

    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }
}

/// Drives the setup state machine.
#[derive(Debug)]
pub struct Configurator<S: Sleeper = ThreadSleeper> {
    retry: RetryPolicy,
    key_policy: KeyLoadPolicy,
    sleeper: S,
    state: PipelineState,
    attempts: u32,
    result: PipelineResult,
}

impl Configurator<ThreadSleeper> {
    pub fn with_retry(retry: RetryPolicy) -> Self {
        Self::new(retry, ThreadSleeper)
    }
}

impl<S: Sleeper> Configurator<S> {
    pub fn new(retry: RetryPolicy, sleeper: S) -> Self {
        Self {
            retry,
            key_policy: KeyLoadPolicy::default(),
            sleeper,
            state: PipelineState::Idle,
            attempts: 0,
            result: PipelineResult::default(),
        }
    }

    pub fn with_key_policy(mut self, key_policy: KeyLoadPolicy) -> Self {
        self.key_policy = key_policy;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn sleeper(&self) -> &S {
        &self.sleeper
    }

    /// Current result without changing state.
    pub fn snapshot(&self) -> PipelineResult {
        PipelineResult {
            state: self.state,
            ..self.result.clone()
        }
    }

    /// Run every stage to `Ready` or `Failed`. A finished configurator starts
    /// a fresh attempt.
    pub fn run<B: BusTransport, H: DeviceHandle>(&mut self, chain: &mut CorrectionChain<B, H>) -> PipelineResult {
        if self.state.is_terminal() {
            self.state = PipelineState::Idle;
            self.attempts = 0;
            self.result = PipelineResult::default();
        }

        while !self.state.is_terminal() {
            self.step(chain);
        }

        let result = self.snapshot();
        match result.failed_stage() {
            None => info!("correction pipeline {:?}", result.state),
            Some(stage) => warn!("correction pipeline {:?}, {} failed", result.state, stage),
        }
        result
    }

    /// Perform one transition (or one discovery attempt) and return the new state.
    pub fn step<B: BusTransport, H: DeviceHandle>(&mut self, chain: &mut CorrectionChain<B, H>) -> PipelineState {
        let CorrectionChain {
            bus,
            correction,
            position,
            keys,
            deployment,
        } = chain;

        match self.state {
            PipelineState::Idle => {
                info!("starting correction pipeline setup");
                self.attempts = 0;
                self.state = PipelineState::DiscoveringCorrectionReceiver;
            }

            PipelineState::DiscoveringCorrectionReceiver => {
                let outcome = self.discover(correction, bus, PipelineState::DiscoveringPositionReceiver);
                self.result.correction_discovery = Some(outcome);
            }

            PipelineState::DiscoveringPositionReceiver => {
                let outcome = self.discover(position, bus, PipelineState::ConfiguringCorrectionReceiver);
                self.result.position_discovery = Some(outcome);
            }

            PipelineState::ConfiguringCorrectionReceiver => {
                let report = apply_config_set(correction, bus, &deployment.correction_config_set());
                if report.accepted() {
                    info!("{} configured ({} items)", report.device, report.items.len());
                } else {
                    warn!("{} configured with {} rejected items", report.device, report.rejected().count());
                }
                // Activates the demodulator settings even after a partial failure
                correction.reset_soft(bus);
                self.result.correction_config = Some(report);
                self.state = PipelineState::ConfiguringPositionReceiver;
            }

            PipelineState::ConfiguringPositionReceiver => {
                let report = apply_config_set(position, bus, &deployment.position_config_set());
                if report.accepted() {
                    info!("{} configured ({} items)", report.device, report.items.len());
                } else {
                    warn!("{} configured with {} rejected items", report.device, report.rejected().count());
                }
                self.result.position_config = Some(report);

                self.result.persist = match position.save_config(bus) {
                    None => {
                        info!("{} has no non-volatile storage, configuration not persisted", position.address());
                        PersistOutcome::Unsupported
                    }
                    Some(true) => PersistOutcome::Saved,
                    Some(false) => {
                        warn!("{} failed to persist configuration", position.address());
                        PersistOutcome::Failed
                    }
                };
                self.state = PipelineState::LoadingKeys;
            }

            PipelineState::LoadingKeys => {
                let schedule = keys.schedule();
                let loaded = position.load_keys(bus, keys.current(), keys.next());
                self.result.keys_loaded = Some(loaded);

                if loaded {
                    info!(
                        "keys loaded on {} (current from {}, next from {})",
                        position.address(),
                        schedule.current_from,
                        schedule.next_from
                    );
                    self.state = PipelineState::Ready;
                } else if self.key_policy == KeyLoadPolicy::Strict {
                    error!("{} rejected the key pair, stopping", position.address());
                    self.state = PipelineState::Failed;
                } else {
                    warn!(
                        "{} rejected the key pair, continuing without valid corrections",
                        position.address()
                    );
                    self.state = PipelineState::Ready;
                }
            }

            PipelineState::Ready | PipelineState::Failed => {}
        }

        self.state
    }

    fn discover<B: BusTransport, H: DeviceHandle>(
        &mut self,
        handle: &mut H,
        bus: &mut B,
        next: PipelineState,
    ) -> DiscoveryOutcome {
        let device = handle.address();
        self.attempts += 1;
        let attempts = self.attempts;

        let connected = handle.connect(bus);
        self.retry.notify(&device, attempts, connected);

        if connected {
            info!("{} connected after {} attempt(s)", device, attempts);
            self.attempts = 0;
            self.state = next;
        } else if self.retry.allows_retry(attempts) {
            warn!(
                "{} not detected (attempt {}), retrying in {:?}",
                device,
                attempts,
                self.retry.interval()
            );
            self.sleeper.sleep(self.retry.interval());
        } else {
            error!("{} not detected after {} attempts, giving up", device, attempts);
            self.state = PipelineState::Failed;
        }

        DiscoveryOutcome {
            device,
            attempts,
            connected,
        }
    }
}

/// Apply every item in order. A rejected item never stops the rest.
pub fn apply_config_set<B: BusTransport, H: DeviceHandle>(handle: &mut H, bus: &mut B, set: &ConfigSet) -> StageReport {
    let mut report = StageReport::new(handle.address());
    for item in set.iter() {
        let accepted = handle.set_config(bus, item);
        if !accepted {
            warn!("{} rejected {} = {}", report.device, item.key, item.value);
        }
        report.record(item, accepted);
    }
    report
}
