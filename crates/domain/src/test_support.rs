use common::EntityUid;
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityCore};
use crate::event::{DomainEvent, Event};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub(crate) enum BankEvent {
    Opened { owner: String },
    Deposited { amount: i64 },
    LegacyFeeCharged { amount: i64 },
    CustomerRegistered { name: String },
}

impl DomainEvent for BankEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BankEvent::Opened { .. } => "Opened",
            BankEvent::Deposited { .. } => "Deposited",
            BankEvent::LegacyFeeCharged { .. } => "LegacyFeeCharged",
            BankEvent::CustomerRegistered { .. } => "CustomerRegistered",
        }
    }

    fn is_historic(&self) -> bool {
        matches!(self, BankEvent::LegacyFeeCharged { .. })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Account {
    core: EntityCore<BankEvent>,
    pub(crate) owner: Option<String>,
    pub(crate) balance: i64,
}

impl Entity for Account {
    type Event = BankEvent;

    fn entity_type() -> &'static str {
        "Account"
    }

    fn new(uid: EntityUid) -> Self {
        Self {
            core: EntityCore::new(uid),
            owner: None,
            balance: 0,
        }
    }

    fn core(&self) -> &EntityCore<BankEvent> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EntityCore<BankEvent> {
        &mut self.core
    }

    fn handle(&mut self, event: &Event<BankEvent>) {
        match event.payload() {
            BankEvent::Opened { owner } => self.owner = Some(owner.clone()),
            BankEvent::Deposited { amount } => self.balance += amount,
            BankEvent::LegacyFeeCharged { amount } => self.balance -= amount,
            BankEvent::CustomerRegistered { .. } => {}
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Customer {
    core: EntityCore<BankEvent>,
    pub(crate) name: Option<String>,
}

impl Entity for Customer {
    type Event = BankEvent;

    fn entity_type() -> &'static str {
        "Customer"
    }

    fn new(uid: EntityUid) -> Self {
        Self {
            core: EntityCore::new(uid),
            name: None,
        }
    }

    fn core(&self) -> &EntityCore<BankEvent> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EntityCore<BankEvent> {
        &mut self.core
    }

    fn handle(&mut self, event: &Event<BankEvent>) {
        if let BankEvent::CustomerRegistered { name } = event.payload() {
            self.name = Some(name.clone());
        }
    }
}
