//! Person aggregate shared by the integration tests and benches.

#![allow(dead_code)]

use eventsourcing::{Aggregate, AggregateRoot, DomainEvent, RepositoryError, SnapshotCapable};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PersonEvent {
    Born { name: String },
    AgedOneYear,
}

impl DomainEvent for PersonEvent {
    const EVENT_TYPES: &'static [&'static str] = &["Born", "AgedOneYear"];

    fn event_type(&self) -> &'static str {
        match self {
            PersonEvent::Born { .. } => "Born",
            PersonEvent::AgedOneYear => "AgedOneYear",
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    #[serde(flatten)]
    root: AggregateRoot,
    pub name: String,
    pub age: u32,
}

impl Person {
    pub fn create(name: &str) -> Result<Self, RepositoryError> {
        if name.trim().is_empty() {
            return Err(RepositoryError::Validation("name can't be blank".to_string()));
        }
        let mut person = Person::default();
        person.track_change(PersonEvent::Born {
            name: name.to_string(),
        })?;
        Ok(person)
    }

    pub fn grow_older(&mut self) -> Result<(), RepositoryError> {
        self.track_change(PersonEvent::AgedOneYear)
    }
}

impl Aggregate for Person {
    type Event = PersonEvent;

    fn aggregate_type() -> &'static str {
        "Person"
    }

    fn root(&self) -> &AggregateRoot {
        &self.root
    }

    fn root_mut(&mut self) -> &mut AggregateRoot {
        &mut self.root
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PersonEvent::Born { name } => {
                self.name = name.clone();
                self.age = 0;
            }
            PersonEvent::AgedOneYear => self.age += 1,
        }
    }
}

impl SnapshotCapable for Person {
    fn snapshot_interval() -> u64 {
        10
    }
}
