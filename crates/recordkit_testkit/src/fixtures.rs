//! Fixture models.

use recordkit_core::{FieldDescriptor, FieldSchema};
use serde::{Deserialize, Serialize};

/// A model with a service-assigned integer key.
pub trait Keyed {
    /// The stored key, `None` before the first create.
    fn key(&self) -> Option<i64>;

    /// Assigns the key after a create.
    fn set_key(&mut self, key: i64);
}

/// A small person entity used throughout the tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    /// Key assigned by the service.
    pub id: Option<i64>,
    /// Full name.
    pub name: String,
    /// Contact address.
    pub email: String,
    /// Age in years.
    pub age: u32,
}

static PERSON_FIELDS: [FieldDescriptor; 4] = [
    FieldDescriptor::new("Id").label("ID").key(),
    FieldDescriptor::new("Name").required().max_length(64),
    FieldDescriptor::new("Email").label("E-mail").required(),
    FieldDescriptor::new("Age"),
];

impl Person {
    /// Creates an unsaved person.
    pub fn new(name: impl Into<String>, email: impl Into<String>, age: u32) -> Self {
        Self {
            id: None,
            name: name.into(),
            email: email.into(),
            age,
        }
    }

    /// Returns this person with a key, as if loaded from the service.
    #[must_use]
    pub fn stored(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }
}

impl Keyed for Person {
    fn key(&self) -> Option<i64> {
        self.id
    }

    fn set_key(&mut self, key: i64) {
        self.id = Some(key);
    }
}

impl FieldSchema for Person {
    fn fields() -> &'static [FieldDescriptor] {
        &PERSON_FIELDS
    }
}

/// Three unsaved people with distinct names.
pub fn sample_people() -> Vec<Person> {
    vec![
        Person::new("Ada Lovelace", "ada@example.com", 36),
        Person::new("Grace Hopper", "grace@example.com", 85),
        Person::new("Edsger Dijkstra", "edsger@example.com", 72),
    ]
}
