//! Pet-care log records.
//!
//! # Responsibility
//! - Define the reference owner/dependent record shapes: pets own
//!   vaccinations, vaccinations own booster reminders.
//! - Validate required fields before records reach the store.
//!
//! # Invariants
//! - `Pet::name` and `Pet::species` are non-blank.
//! - `Vaccination::next_due_at` is not earlier than `administered_at`.

use crate::model::entity::{Dependent, Entity, EntityId, EntityMeta, Queryable};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// A pet profile; owner of vaccinations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pet {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub name: String,
    /// Category facet (`dog`, `cat`, ...).
    pub species: String,
    #[serde(default)]
    pub breed: Option<String>,
    #[serde(default)]
    pub favorite: bool,
    #[serde(default)]
    pub weight_kg: Option<f64>,
    #[serde(default)]
    pub birth_date: Option<i64>,
    #[serde(default)]
    pub notes: String,
}

impl Pet {
    pub fn new(name: impl Into<String>, species: impl Into<String>) -> Self {
        Self {
            meta: EntityMeta::new(),
            name: name.into(),
            species: species.into(),
            breed: None,
            favorite: false,
            weight_kg: None,
            birth_date: None,
            notes: String::new(),
        }
    }

    pub fn validate(&self) -> Result<(), PetValidationError> {
        if self.name.trim().is_empty() {
            return Err(PetValidationError::MissingField("name"));
        }
        if self.species.trim().is_empty() {
            return Err(PetValidationError::MissingField("species"));
        }
        if let Some(weight) = self.weight_kg {
            if !weight.is_finite() || weight < 0.0 {
                return Err(PetValidationError::InvalidWeight(weight));
            }
        }
        Ok(())
    }
}

impl Entity for Pet {
    const COLLECTION: &'static str = "pets";

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }
}

impl Queryable for Pet {
    fn display_name(&self) -> &str {
        &self.name
    }

    fn categories(&self) -> Vec<&str> {
        vec![self.species.as_str()]
    }

    fn flag(&self) -> Option<bool> {
        Some(self.favorite)
    }

    fn numeric(&self) -> Option<f64> {
        self.weight_kg
    }

    fn search_fields(&self) -> Vec<&str> {
        let mut fields = vec![self.name.as_str(), self.notes.as_str()];
        if let Some(breed) = self.breed.as_deref() {
            fields.push(breed);
        }
        fields
    }
}

/// One administered vaccine, owned by a pet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vaccination {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub pet_id: EntityId,
    pub vaccine: String,
    pub administered_at: i64,
    #[serde(default)]
    pub next_due_at: Option<i64>,
    #[serde(default)]
    pub clinic: Option<String>,
}

impl Vaccination {
    pub fn new(pet_id: EntityId, vaccine: impl Into<String>, administered_at: i64) -> Self {
        Self {
            meta: EntityMeta::new(),
            pet_id,
            vaccine: vaccine.into(),
            administered_at,
            next_due_at: None,
            clinic: None,
        }
    }

    pub fn validate(&self) -> Result<(), PetValidationError> {
        if self.vaccine.trim().is_empty() {
            return Err(PetValidationError::MissingField("vaccine"));
        }
        if let Some(due) = self.next_due_at {
            if due < self.administered_at {
                return Err(PetValidationError::DueBeforeAdministered {
                    administered_at: self.administered_at,
                    next_due_at: due,
                });
            }
        }
        Ok(())
    }
}

impl Entity for Vaccination {
    const COLLECTION: &'static str = "vaccinations";

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }
}

impl Dependent for Vaccination {
    type Owner = Pet;

    fn owner_id(&self) -> EntityId {
        self.pet_id
    }
}

impl Queryable for Vaccination {
    fn display_name(&self) -> &str {
        &self.vaccine
    }

    fn date(&self) -> Option<i64> {
        Some(self.administered_at)
    }

    fn search_fields(&self) -> Vec<&str> {
        let mut fields = vec![self.vaccine.as_str()];
        if let Some(clinic) = self.clinic.as_deref() {
            fields.push(clinic);
        }
        fields
    }
}

/// Booster reminder attached to a vaccination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub vaccination_id: EntityId,
    pub remind_at: i64,
    #[serde(default)]
    pub done: bool,
}

impl Reminder {
    pub fn new(vaccination_id: EntityId, remind_at: i64) -> Self {
        Self {
            meta: EntityMeta::new(),
            vaccination_id,
            remind_at,
            done: false,
        }
    }
}

impl Entity for Reminder {
    const COLLECTION: &'static str = "reminders";

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }
}

impl Dependent for Reminder {
    type Owner = Vaccination;

    fn owner_id(&self) -> EntityId {
        self.vaccination_id
    }
}

/// Required-field failures raised before a record reaches the store.
#[derive(Debug, Clone, PartialEq)]
pub enum PetValidationError {
    MissingField(&'static str),
    InvalidWeight(f64),
    DueBeforeAdministered {
        administered_at: i64,
        next_due_at: i64,
    },
}

impl Display for PetValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingField(field) => write!(f, "required field `{field}` is blank"),
            Self::InvalidWeight(weight) => write!(f, "invalid weight `{weight}`"),
            Self::DueBeforeAdministered {
                administered_at,
                next_due_at,
            } => write!(
                f,
                "next_due_at ({next_due_at}) is earlier than administered_at ({administered_at})"
            ),
        }
    }
}

impl Error for PetValidationError {}
