//! Property-based test generators using proptest.

use crate::fixtures::Person;
use proptest::prelude::*;
use recordkit_core::Capabilities;

/// Strategy for arbitrary combinations of supported service verbs.
pub fn capabilities_strategy() -> impl Strategy<Value = Capabilities> {
    prop::array::uniform6(any::<bool>()).prop_map(|[get_all, get_all_where, create, read, update, delete]| {
        Capabilities {
            get_all,
            get_all_where,
            create,
            read,
            update,
            delete,
        }
    })
}

/// Strategy for unsaved people.
pub fn person_strategy() -> impl Strategy<Value = Person> {
    (
        prop::string::string_regex("[A-Z][a-z]{1,12} [A-Z][a-z]{1,12}").expect("Invalid regex"),
        prop::string::string_regex("[a-z]{1,10}@example\\.com").expect("Invalid regex"),
        0u32..120,
    )
        .prop_map(|(name, email, age)| Person::new(name, email, age))
}

/// Strategy for a starting data set.
pub fn people_strategy(max: usize) -> impl Strategy<Value = Vec<Person>> {
    prop::collection::vec(person_strategy(), 0..=max)
}

/// Names of the editable [`Person`] fields.
pub const PERSON_EDITABLE_FIELDS: [&str; 3] = ["Name", "Email", "Age"];

/// Applies a deterministic change to the named field.
pub fn touch_person(person: &mut Person, field: &str) {
    match field {
        "Name" => person.name.push('!'),
        "Email" => person.email.insert(0, 'x'),
        _ => person.age = person.age.wrapping_add(1),
    }
}

/// A step applied to a recordset in a generated session.
///
/// Indices address the record list modulo its length at the time the step
/// runs.
#[derive(Debug, Clone)]
pub enum RecordAction {
    /// Edit one field.
    Edit {
        /// Record index.
        index: usize,
        /// Field name, one of [`PERSON_EDITABLE_FIELDS`].
        field: &'static str,
    },
    /// Save one record.
    Save {
        /// Record index.
        index: usize,
    },
    /// Undo one record.
    Undo {
        /// Record index.
        index: usize,
    },
    /// Delete one record.
    Delete {
        /// Record index.
        index: usize,
    },
    /// Stage a delete without running it.
    RequestDelete {
        /// Record index.
        index: usize,
    },
    /// Withdraw a staged delete.
    CancelDelete {
        /// Record index.
        index: usize,
    },
    /// Move the cursor.
    Select {
        /// Record index.
        index: usize,
    },
    /// Make the next save come back with validation errors.
    RejectNextSave,
    /// Add a new record if none is pending.
    AddNew,
    /// Save every changed record.
    SaveAll,
}

/// Strategy for one recordset action.
pub fn record_action_strategy() -> impl Strategy<Value = RecordAction> {
    let index = 0usize..16;
    prop_oneof![
        4 => (index.clone(), prop::sample::select(PERSON_EDITABLE_FIELDS.to_vec()))
            .prop_map(|(index, field)| RecordAction::Edit { index, field }),
        2 => index.clone().prop_map(|index| RecordAction::Save { index }),
        1 => index.clone().prop_map(|index| RecordAction::Undo { index }),
        1 => index.clone().prop_map(|index| RecordAction::Delete { index }),
        1 => index.clone().prop_map(|index| RecordAction::RequestDelete { index }),
        1 => index.clone().prop_map(|index| RecordAction::CancelDelete { index }),
        2 => index.prop_map(|index| RecordAction::Select { index }),
        1 => Just(RecordAction::RejectNextSave),
        1 => Just(RecordAction::AddNew),
        1 => Just(RecordAction::SaveAll),
    ]
}

/// Strategy for a sequence of recordset actions.
pub fn action_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<RecordAction>> {
    prop::collection::vec(record_action_strategy(), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Failure, MockService, Verb};
    use recordkit_core::{ConfigError, Recordset, ValidationErrors};
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn check_membership(recordset: &Recordset<Person>) -> Result<(), TestCaseError> {
        let records = recordset.records();
        let ids: BTreeSet<_> = records.iter().map(|r| r.id()).collect();

        let changed: BTreeSet<_> = recordset.changed_records().iter().map(|r| r.id()).collect();
        let expected_changed: BTreeSet<_> =
            records.iter().filter(|r| r.is_changed()).map(|r| r.id()).collect();
        prop_assert_eq!(&changed, &expected_changed);
        prop_assert!(changed.is_subset(&ids));

        let invalid: BTreeSet<_> = recordset.invalid_records().iter().map(|r| r.id()).collect();
        let expected_invalid: BTreeSet<_> = records
            .iter()
            .filter(|r| r.has_validation_errors())
            .map(|r| r.id())
            .collect();
        prop_assert_eq!(&invalid, &expected_invalid);

        if let Some(pending) = recordset.new_record() {
            prop_assert!(ids.contains(&pending.id()));
            prop_assert!(pending.is_new_record());
        }
        let pristine_new = records
            .iter()
            .filter(|r| r.is_new_record() && !r.is_changed())
            .count();
        prop_assert!(pristine_new <= 1, "{} blank new records", pristine_new);

        if let Some(position) = recordset.position() {
            prop_assert!((1..=records.len()).contains(&position));
        }
        prop_assert_eq!(recordset.data().len(), records.len());
        Ok(())
    }

    async fn run_session(
        people: Vec<Person>,
        actions: Vec<RecordAction>,
        auto_save: bool,
    ) -> Result<(), TestCaseError> {
        let service = Arc::new(MockService::new().seeded(people));
        let config = service
            .configuration()
            .save_changes_automatic(auto_save)
            .add_new_record_automatic(true)
            .build()
            .expect("full capabilities are valid");
        let recordset = Recordset::new(config);
        recordset.refresh_data().await;
        check_membership(&recordset)?;

        for action in actions {
            let records = recordset.records();
            let pick = |index: usize| (!records.is_empty()).then(|| records[index % records.len()].clone());
            match action {
                RecordAction::Edit { index, field } => {
                    if let Some(record) = pick(index) {
                        record.edit(field, |p| touch_person(p, field));
                    }
                }
                RecordAction::Save { index } => {
                    if let Some(record) = pick(index) {
                        record.save_changes().await;
                    }
                }
                RecordAction::Undo { index } => {
                    if let Some(record) = pick(index) {
                        record.undo_changes().await;
                    }
                }
                RecordAction::Delete { index } => {
                    if let Some(record) = pick(index) {
                        record.delete().await;
                    }
                }
                RecordAction::RequestDelete { index } => {
                    if let Some(record) = pick(index) {
                        record.request_delete();
                    }
                }
                RecordAction::CancelDelete { index } => {
                    if let Some(record) = pick(index) {
                        record.cancel_delete();
                    }
                }
                RecordAction::Select { index } => {
                    if let Some(record) = pick(index) {
                        recordset.select_record(&record);
                    }
                }
                RecordAction::RejectNextSave => {
                    let errors: ValidationErrors = [("Name", "is taken")].into_iter().collect();
                    service.fail_next(Verb::Update, Failure::invalid("rejected", errors.clone()));
                    service.fail_next(Verb::Create, Failure::invalid("rejected", errors));
                }
                RecordAction::AddNew => {
                    recordset.try_add_new_record();
                }
                RecordAction::SaveAll => {
                    recordset.save_all_changes().await;
                }
            }
            // let cascaded background saves finish
            for _ in 0..8 {
                tokio::task::yield_now().await;
            }
            check_membership(&recordset)?;
        }
        Ok(())
    }

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn configuration_invariants(caps in capabilities_strategy()) {
            let service = Arc::new(MockService::<Person>::with_capabilities(caps));
            let built = service.configuration().build();

            if caps.create && !caps.update {
                prop_assert_eq!(built.unwrap_err(), ConfigError::CreateRequiresUpdate);
            } else if caps.update && !caps.read {
                prop_assert_eq!(built.unwrap_err(), ConfigError::UpdateRequiresRead);
            } else {
                let config = built.unwrap();
                prop_assert_eq!(config.allow_refresh(), caps.get_all || caps.get_all_where);
                prop_assert_eq!(config.allow_create(), caps.create);
                prop_assert_eq!(config.allow_delete(), caps.delete);
            }
        }

        #[test]
        fn membership_sets_track_record_state(
            people in people_strategy(4),
            actions in action_sequence_strategy(1, 24),
            auto_save in any::<bool>(),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");
            runtime.block_on(run_session(people, actions, auto_save))?;
        }

        #[test]
        fn generated_people_are_well_formed(person in person_strategy()) {
            prop_assert!(person.name.contains(' '));
            prop_assert!(person.email.ends_with("@example.com"));
            prop_assert!(person.id.is_none());
        }
    }
}
