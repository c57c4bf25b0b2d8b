//! First-run onboarding wizard.
//!
//! Drives one device through `Welcome → DeviceDetails → Discovery → ConfigureEntities →
//! Complete`. Presentation is left to the caller: it renders [`Onboarding::step`],
//! [`Onboarding::discovery_state`] and [`Onboarding::legal_actions`] and calls back into
//! the transition methods.

use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use strum::Display;
use tracing::info;

use crate::config::DiscoveryConfig;
use crate::discovery::is_plausible_address;
use crate::discovery::DiscoveryError;
use crate::discovery::DiscoveryMachine;
use crate::discovery::DiscoveryState;
use crate::discovery::DiscoveryTarget;
use crate::discovery::MachineError;
use crate::discovery::Transition;
use crate::discovery::TransitionError;
use crate::discovery::Transport;
use crate::store::DeviceId;
use crate::store::Entity;
use crate::store::EntityMetadata;
use crate::store::MetadataEdits;
use crate::store::Store;
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Step {
    Welcome,
    /// Name and address entry
    DeviceDetails,
    Discovery,
    /// Editing display name, unit and icon of discovered entities
    ConfigureEntities,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Action {
    Begin,
    EditDetails,
    Submit,
    Retry,
    Skip,
    Continue,
    EditEntity,
    Finish,
}

impl From<Transition> for Action {
    fn from(transition: Transition) -> Self {
        match transition {
            Transition::Retry => Action::Retry,
            Transition::Skip => Action::Skip,
            Transition::Continue => Action::Continue,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OnboardingError {
    #[error("Cannot {action} during {step}")]
    IllegalAction { step: Step, action: Action },

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("No entity named '{0}'")]
    UnknownEntity(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<MachineError> for OnboardingError {
    fn from(err: MachineError) -> Self {
        match err {
            MachineError::Transition(e) => OnboardingError::Transition(e),
            MachineError::Store(e) => OnboardingError::Store(e),
        }
    }
}

/// One onboarding session.
pub struct Onboarding {
    step: Step,
    name: String,
    address: String,
    machine: DiscoveryMachine,
    store: Arc<dyn Store>,
    /// Staged entity metadata, committed by `finish`
    edits: MetadataEdits,
    device: Option<DeviceId>,
}

impl Onboarding {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn Store>,
        config: &DiscoveryConfig,
    ) -> Self {
        Self {
            step: Step::Welcome,
            name: String::new(),
            address: String::new(),
            machine: DiscoveryMachine::new(transport, store.clone(), config),
            store,
            edits: MetadataEdits::new(),
            device: None,
        }
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Device created by this session, once discovery succeeded or was skipped.
    pub fn device(&self) -> Option<DeviceId> {
        self.device
    }

    /// Current discovery state while on the discovery step.
    pub fn discovery_state(&self) -> Option<DiscoveryState> {
        (self.step == Step::Discovery).then(|| self.machine.state())
    }

    /// Wait for the running discovery attempt to finish.
    pub async fn discovery_settled(&self) -> Option<DiscoveryState> {
        if self.step != Step::Discovery {
            return None;
        }
        Some(self.machine.settled().await)
    }

    pub fn legal_actions(&self) -> Vec<Action> {
        match self.step {
            Step::Welcome => vec![Action::Begin],
            Step::DeviceDetails if self.can_submit() => vec![Action::EditDetails, Action::Submit],
            Step::DeviceDetails => vec![Action::EditDetails],
            Step::Discovery => self
                .machine
                .transitions()
                .iter()
                .copied()
                .map(Action::from)
                .collect(),
            Step::ConfigureEntities => vec![Action::EditEntity, Action::Finish],
            Step::Complete => Vec::new(),
        }
    }

    pub fn begin(&mut self) -> Result<(), OnboardingError> {
        self.expect(Step::Welcome, Action::Begin)?;
        self.enter(Step::DeviceDetails);
        Ok(())
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> Result<(), OnboardingError> {
        self.expect(Step::DeviceDetails, Action::EditDetails)?;
        self.name = name.into();
        Ok(())
    }

    pub fn set_address(&mut self, address: impl Into<String>) -> Result<(), OnboardingError> {
        self.expect(Step::DeviceDetails, Action::EditDetails)?;
        self.address = address.into();
        Ok(())
    }

    /// Whether the entered address passes the syntactic pre-check.
    pub fn can_submit(&self) -> bool {
        self.step == Step::DeviceDetails && is_plausible_address(&self.address)
    }

    /// Start discovery for the entered address.
    ///
    /// Addresses failing the pre-check are rejected before any network activity.
    pub fn submit(&mut self) -> Result<u64, OnboardingError> {
        self.expect(Step::DeviceDetails, Action::Submit)?;
        if !is_plausible_address(&self.address) {
            return Err(DiscoveryError::InvalidAddress.into());
        }

        self.enter(Step::Discovery);
        Ok(self.machine.start(DiscoveryTarget {
            name: self.name.clone(),
            address: self.address.clone(),
        }))
    }

    /// Go back to address entry after a failed discovery, keeping name and address.
    pub fn retry(&mut self) -> Result<(), OnboardingError> {
        self.expect(Step::Discovery, Action::Retry)?;
        let state = self.machine.state();
        if !state.allows(Transition::Retry) {
            return Err(TransitionError {
                state,
                transition: Transition::Retry,
            }
            .into());
        }

        self.machine.cancel();
        self.enter(Step::DeviceDetails);
        Ok(())
    }

    /// Abandon discovery and finish with a device that has no entities.
    pub fn skip(&mut self) -> Result<DeviceId, OnboardingError> {
        self.expect(Step::Discovery, Action::Skip)?;
        let id = self.machine.skip()?;
        self.device = Some(id);
        self.enter(Step::Complete);
        Ok(id)
    }

    /// Move on from a successful discovery to entity configuration.
    pub fn continue_to_entities(&mut self) -> Result<DeviceId, OnboardingError> {
        self.expect(Step::Discovery, Action::Continue)?;
        let state = self.machine.state();
        let err = TransitionError {
            state,
            transition: Transition::Continue,
        };
        if !state.allows(Transition::Continue) {
            return Err(err.into());
        }
        let id = self.machine.device().ok_or(err)?;

        self.device = Some(id);
        self.enter(Step::ConfigureEntities);
        Ok(id)
    }

    /// Entities of the session's device with staged edits applied.
    pub fn entities(&self) -> Result<Vec<Entity>, OnboardingError> {
        let Some(id) = self.device else {
            return Ok(Vec::new());
        };
        let Some(device) = self.store.device(id)? else {
            return Err(StoreError::UnknownDevice(id).into());
        };

        Ok(device
            .entities
            .into_iter()
            .map(|mut entity| {
                if let Some(metadata) = self.edits.get(&entity.internal_name) {
                    entity.apply(metadata);
                }
                entity
            })
            .collect())
    }

    /// Stage metadata for one entity. Nothing is persisted until `finish`.
    pub fn edit_entity(
        &mut self,
        internal_name: &str,
        metadata: EntityMetadata,
    ) -> Result<(), OnboardingError> {
        self.expect(Step::ConfigureEntities, Action::EditEntity)?;
        if !self
            .entities()?
            .iter()
            .any(|e| e.internal_name == internal_name)
        {
            return Err(OnboardingError::UnknownEntity(internal_name.to_string()));
        }

        self.edits.insert(internal_name.to_string(), metadata);
        Ok(())
    }

    /// Commit all staged metadata in one transaction and complete onboarding.
    pub fn finish(&mut self) -> Result<(), OnboardingError> {
        self.expect(Step::ConfigureEntities, Action::Finish)?;
        let err = OnboardingError::IllegalAction {
            step: self.step,
            action: Action::Finish,
        };
        let id = self.device.ok_or(err)?;

        self.store.commit_entity_metadata(id, &self.edits)?;
        info!("Committed {} metadata edit(s) for device {}", self.edits.len(), id);
        self.edits.clear();
        self.enter(Step::Complete);
        Ok(())
    }

    fn expect(&self, step: Step, action: Action) -> Result<(), OnboardingError> {
        if self.step != step {
            return Err(OnboardingError::IllegalAction {
                step: self.step,
                action,
            });
        }
        Ok(())
    }

    fn enter(&mut self, step: Step) {
        info!("Onboarding: {} -> {}", self.step, step);
        self.step = step;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::MockReply;
    use crate::discovery::MockTransport;
    use crate::store::MemoryStore;

    fn onboarding(replies: Vec<MockReply>) -> (Onboarding, Arc<MockTransport>, Arc<MemoryStore>) {
        let transport = Arc::new(MockTransport::with_replies(replies));
        let store = Arc::new(MemoryStore::new());
        let config = DiscoveryConfig {
            timeout_ms: 200,
            ..Default::default()
        };
        let onboarding = Onboarding::new(transport.clone(), store.clone(), &config);
        (onboarding, transport, store)
    }

    fn enter_details(o: &mut Onboarding, address: &str) {
        o.begin().unwrap();
        o.set_name("Greenhouse").unwrap();
        o.set_address(address).unwrap();
    }

    #[tokio::test]
    async fn test_full_flow_commits_metadata() {
        let (mut o, _, store) = onboarding(vec![MockReply::ok(r#"{"temp": 1, "humidity": 2}"#)]);
        assert_eq!(o.legal_actions(), vec![Action::Begin]);

        enter_details(&mut o, "192.168.1.42");
        assert!(o.can_submit());
        o.submit().unwrap();
        assert_eq!(o.discovery_settled().await, Some(DiscoveryState::Ready));
        assert_eq!(o.legal_actions(), vec![Action::Continue]);

        let id = o.continue_to_entities().unwrap();
        o.edit_entity(
            "temp",
            EntityMetadata {
                display_name: "Temperature".to_string(),
                unit: "°C".to_string(),
                icon: "thermometer".to_string(),
            },
        )
        .unwrap();

        // staged edits are visible but not yet persisted
        assert_eq!(o.entities().unwrap()[0].display_name, "Temperature");
        let stored = store.device(id).unwrap().unwrap();
        assert_eq!(stored.entity("temp").unwrap().display_name, "");

        o.finish().unwrap();
        assert_eq!(o.step(), Step::Complete);
        let stored = store.device(id).unwrap().unwrap();
        assert_eq!(stored.name, "Greenhouse");
        assert_eq!(stored.entity("temp").unwrap().unit, "°C");
        assert_eq!(stored.entity("humidity").unwrap().display_name, "");
    }

    #[tokio::test]
    async fn test_invalid_address_never_hits_network() {
        let (mut o, transport, _) = onboarding(vec![MockReply::ok("{}")]);
        enter_details(&mut o, "10.0..5");

        assert!(!o.can_submit());
        assert_eq!(o.legal_actions(), vec![Action::EditDetails]);
        let err = o.submit().unwrap_err();
        assert!(matches!(
            err,
            OnboardingError::Discovery(DiscoveryError::InvalidAddress)
        ));
        assert_eq!(o.step(), Step::DeviceDetails);
        assert!(transport.requests().is_empty());

        o.set_address("10.0.0.5").unwrap();
        o.submit().unwrap();
        o.discovery_settled().await;
        assert_eq!(transport.requests()[0].as_str(), "http://10.0.0.5/");
    }

    #[tokio::test]
    async fn test_retry_preserves_details() {
        // each failing reply repeats for every request the failing stage makes
        let failures = [
            (MockReply::Refused, 1, DiscoveryState::ConnectionFailed),
            (MockReply::ok("not json"), 2, DiscoveryState::FormatInvalid),
            (MockReply::ok("{}"), 3, DiscoveryState::NoEntitiesFound),
        ];

        for (reply, requests, failed) in failures {
            let mut replies = vec![reply; requests];
            replies.push(MockReply::ok(r#"{"temp": 1}"#));
            let (mut o, _, store) = onboarding(replies);

            enter_details(&mut o, "192.168.1.42");
            o.submit().unwrap();
            assert_eq!(o.discovery_settled().await, Some(failed));
            assert_eq!(o.legal_actions(), vec![Action::Retry, Action::Skip]);

            o.retry().unwrap();
            assert_eq!(o.step(), Step::DeviceDetails, "retry from {failed}");
            assert_eq!(o.name(), "Greenhouse");
            assert_eq!(o.address(), "192.168.1.42");
            assert!(o.discovery_state().is_none());
            assert!(store.devices().unwrap().is_empty(), "retry from {failed}");

            o.submit().unwrap();
            assert_eq!(o.discovery_settled().await, Some(DiscoveryState::Ready));
            assert_eq!(store.devices().unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_skip_completes_with_no_entities() {
        let (mut o, _, store) = onboarding(vec![MockReply::ok("not json")]);
        enter_details(&mut o, "192.168.1.42");
        o.submit().unwrap();
        assert_eq!(
            o.discovery_settled().await,
            Some(DiscoveryState::FormatInvalid)
        );

        let id = o.skip().unwrap();
        assert_eq!(o.step(), Step::Complete);
        assert_eq!(o.device(), Some(id));
        assert!(o.entities().unwrap().is_empty());
        assert!(store.device(id).unwrap().unwrap().entities.is_empty());
        assert!(o.legal_actions().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_order_actions_are_rejected() {
        let (mut o, _, _) = onboarding(vec![MockReply::ok(r#"{"temp": 1}"#)]);

        assert!(matches!(
            o.submit(),
            Err(OnboardingError::IllegalAction {
                step: Step::Welcome,
                action: Action::Submit
            })
        ));
        enter_details(&mut o, "192.168.1.42");
        o.submit().unwrap();
        assert_eq!(o.discovery_settled().await, Some(DiscoveryState::Ready));

        assert!(matches!(o.retry(), Err(OnboardingError::Transition(_))));
        assert!(matches!(o.skip(), Err(OnboardingError::Transition(_))));
        assert!(matches!(
            o.set_address("10.0.0.5"),
            Err(OnboardingError::IllegalAction { .. })
        ));

        o.continue_to_entities().unwrap();
        assert!(matches!(
            o.edit_entity("pressure", EntityMetadata::default()),
            Err(OnboardingError::UnknownEntity(_))
        ));
    }

    #[tokio::test]
    async fn test_continue_requires_ready() {
        let (mut o, _, _) = onboarding(vec![MockReply::ok("{}")]);
        enter_details(&mut o, "192.168.1.42");
        o.submit().unwrap();
        assert_eq!(
            o.discovery_settled().await,
            Some(DiscoveryState::NoEntitiesFound)
        );

        let err = o.continue_to_entities().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot continue while discovery is NoEntitiesFound"
        );
    }
}
