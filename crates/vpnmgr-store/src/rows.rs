//! Row and update types shared between the store and its watchers.

/// Operation type for a row update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Row inserted (no previous image).
    New,
    /// Row updated in place.
    Modify,
    /// Row removed.
    Del,
}

impl Operation {
    /// Returns true if this is a New operation.
    pub fn is_new(&self) -> bool {
        matches!(self, Operation::New)
    }

    /// Returns true if this is a Modify operation.
    pub fn is_modify(&self) -> bool {
        matches!(self, Operation::Modify)
    }

    /// Returns true if this is a Del operation.
    pub fn is_del(&self) -> bool {
        matches!(self, Operation::Del)
    }
}

/// A field-value pair of a table row.
pub type FieldValue = (String, String);

/// The full field-value image of a table row.
pub type FieldValues = Vec<FieldValue>;

/// Convenience accessors for row field-value lists.
pub trait FieldValuesExt {
    /// Returns the value for a field, if present.
    fn get_field(&self, field: &str) -> Option<&str>;

    /// Returns the value for a field, or a default if absent.
    fn get_field_or<'a>(&'a self, field: &str, default: &'a str) -> &'a str {
        self.get_field(field).unwrap_or(default)
    }

    /// Returns true if the row has the given field.
    fn has_field(&self, field: &str) -> bool {
        self.get_field(field).is_some()
    }
}

impl FieldValuesExt for FieldValues {
    fn get_field(&self, field: &str) -> Option<&str> {
        self.iter()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v.as_str())
    }
}

/// A row-level change notification delivered to watchers.
///
/// For `New` updates `old` is empty; for `Del` updates `new` is empty.
/// `Modify` updates carry both images.
#[derive(Debug, Clone)]
pub struct RowUpdate {
    /// The table the row belongs to.
    pub table: String,
    /// The row key.
    pub key: String,
    /// The operation.
    pub op: Operation,
    /// Previous row image (empty for New).
    pub old: FieldValues,
    /// New row image (empty for Del).
    pub new: FieldValues,
}

impl RowUpdate {
    /// Returns true if the named field differs between the old and new
    /// row images. A field appearing or disappearing counts as changed.
    pub fn changed(&self, field: &str) -> bool {
        self.old.get_field(field) != self.new.get_field(field)
    }

    /// Returns true if any field outside the given list changed.
    ///
    /// Used by state-writing managers to ignore echoes of their own
    /// status column writebacks.
    pub fn changed_other_than(&self, ignored: &[&str]) -> bool {
        let mut fields: Vec<&str> = self
            .old
            .iter()
            .chain(self.new.iter())
            .map(|(f, _)| f.as_str())
            .collect();
        fields.sort_unstable();
        fields.dedup();
        fields
            .iter()
            .any(|f| !ignored.contains(f) && self.changed(f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fvs(pairs: &[(&str, &str)]) -> FieldValues {
        pairs
            .iter()
            .map(|(f, v)| (f.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_get_field() {
        let row = fvs(&[("enable", "true"), ("remote_endpoint", "1.2.3.4")]);
        assert_eq!(row.get_field("enable"), Some("true"));
        assert_eq!(row.get_field("missing"), None);
        assert_eq!(row.get_field_or("missing", "default"), "default");
        assert!(row.has_field("remote_endpoint"));
    }

    #[test]
    fn test_changed() {
        let update = RowUpdate {
            table: "IPSec_Config".to_string(),
            key: "vpn1".to_string(),
            op: Operation::Modify,
            old: fvs(&[("enable", "true"), ("psk", "secret")]),
            new: fvs(&[("enable", "false"), ("psk", "secret")]),
        };
        assert!(update.changed("enable"));
        assert!(!update.changed("psk"));
        // Field appearing counts as changed.
        assert!(!update.changed("mark"));
    }

    #[test]
    fn test_changed_field_appears() {
        let update = RowUpdate {
            table: "IPSec_Config".to_string(),
            key: "vpn1".to_string(),
            op: Operation::Modify,
            old: fvs(&[("enable", "true")]),
            new: fvs(&[("enable", "true"), ("mark", "100")]),
        };
        assert!(update.changed("mark"));
        assert!(!update.changed("enable"));
    }

    #[test]
    fn test_changed_other_than() {
        let update = RowUpdate {
            table: "Tunnel_Interface".to_string(),
            key: "tun1".to_string(),
            op: Operation::Modify,
            old: fvs(&[("if_name", "Vpn_tun1"), ("status", "disabled")]),
            new: fvs(&[("if_name", "Vpn_tun1"), ("status", "enabled")]),
        };
        assert!(!update.changed_other_than(&["status"]));

        let update2 = RowUpdate {
            new: fvs(&[("if_name", "Vpn_tun2"), ("status", "enabled")]),
            ..update
        };
        assert!(update2.changed_other_than(&["status"]));
    }
}
