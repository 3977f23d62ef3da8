//! Entity validation results.
//!
//! A commit validates every staged entity first and reports all failures in
//! one aggregate error, so callers can fix a whole batch in one pass.

use std::error::Error;
use std::fmt::{Display, Formatter};

/// One rejected field on one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl Display for FieldViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// All violations reported by one staged entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityViolations {
    pub collection: String,
    /// `None` while the store has not assigned a key yet.
    pub key: Option<String>,
    pub violations: Vec<FieldViolation>,
}

impl Display for EntityViolations {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let key = self.key.as_deref().unwrap_or("<unassigned>");
        write!(f, "{}({key}): ", self.collection)?;
        for (index, violation) in self.violations.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{violation}")?;
        }
        Ok(())
    }
}

/// Aggregate validation failure for a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors {
    entities: Vec<EntityViolations>,
}

impl ValidationErrors {
    pub fn new(entities: Vec<EntityViolations>) -> Self {
        Self { entities }
    }

    pub fn entities(&self) -> &[EntityViolations] {
        &self.entities
    }

    /// Total number of field violations across all entities.
    pub fn violation_count(&self) -> usize {
        self.entities
            .iter()
            .map(|entity| entity.violations.len())
            .sum()
    }
}

impl Display for ValidationErrors {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "the following errors occurred while validating staged entities:"
        )?;
        for entity in &self.entities {
            writeln!(f, "{entity}")?;
        }
        Ok(())
    }
}

impl Error for ValidationErrors {}
