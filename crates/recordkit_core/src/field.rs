//! Static field descriptors for model types.

/// Describes one field of a model.
///
/// Descriptors are read-only metadata for presentation layers. Nothing in
/// recordkit mutates or enforces them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field key, as used with `Record::on_field_changed`.
    pub name: &'static str,
    /// Human readable label.
    pub label: &'static str,
    /// Whether a value is required.
    pub required: bool,
    /// Whether the field is part of the model's key.
    pub key: bool,
    /// Maximum length for text fields.
    pub max_length: Option<usize>,
    /// Whether the field may be edited.
    pub editable: bool,
}

impl FieldDescriptor {
    /// Creates an editable, optional descriptor labelled with its name.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            label: name,
            required: false,
            key: false,
            max_length: None,
            editable: true,
        }
    }

    /// Sets the display label.
    #[must_use]
    pub const fn label(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    /// Marks the field as required.
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Marks the field as a key field. Key fields are not editable.
    #[must_use]
    pub const fn key(mut self) -> Self {
        self.key = true;
        self.editable = false;
        self
    }

    /// Sets the maximum length.
    #[must_use]
    pub const fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    /// Marks the field as read-only.
    #[must_use]
    pub const fn read_only(mut self) -> Self {
        self.editable = false;
        self
    }
}

/// A model type with a precomputed field list.
///
/// Implement this once per model, usually with a `const` slice:
///
/// ```rust
/// use recordkit_core::{FieldDescriptor, FieldSchema};
///
/// struct Person;
///
/// impl FieldSchema for Person {
///     fn fields() -> &'static [FieldDescriptor] {
///         const FIELDS: &[FieldDescriptor] = &[
///             FieldDescriptor::new("Id").key(),
///             FieldDescriptor::new("Name").label("Full name").required().max_length(80),
///         ];
///         FIELDS
///     }
/// }
///
/// assert_eq!(Person::field("Name").unwrap().label, "Full name");
/// ```
pub trait FieldSchema {
    /// All fields in declaration order.
    fn fields() -> &'static [FieldDescriptor];

    /// Looks up a field by name.
    fn field(name: &str) -> Option<&'static FieldDescriptor> {
        Self::fields().iter().find(|f| f.name == name)
    }

    /// Key fields in declaration order.
    fn key_fields() -> Vec<&'static FieldDescriptor> {
        Self::fields().iter().filter(|f| f.key).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Invoice;

    impl FieldSchema for Invoice {
        fn fields() -> &'static [FieldDescriptor] {
            const FIELDS: &[FieldDescriptor] = &[
                FieldDescriptor::new("Number").key(),
                FieldDescriptor::new("Customer").required().max_length(40),
                FieldDescriptor::new("Total").read_only(),
            ];
            FIELDS
        }
    }

    #[test]
    fn builder_flags() {
        let number = Invoice::field("Number").unwrap();
        assert!(number.key);
        assert!(!number.editable);
        assert_eq!(number.label, "Number");

        let customer = Invoice::field("Customer").unwrap();
        assert!(customer.required);
        assert!(customer.editable);
        assert_eq!(customer.max_length, Some(40));

        assert!(!Invoice::field("Total").unwrap().editable);
    }

    #[test]
    fn lookups() {
        assert!(Invoice::field("Missing").is_none());
        let keys: Vec<_> = Invoice::key_fields().iter().map(|f| f.name).collect();
        assert_eq!(keys, ["Number"]);
    }
}
