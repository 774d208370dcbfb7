//! Per-resource-type rule tables
//!
//! Each module declares the A -> B rule for its type and derives the B -> A
//! rule from it. Adding a type means adding a module here.

pub mod allergy;
pub mod composition;
pub mod condition;
pub mod encounter;
pub mod immunization;
pub mod medication;
pub mod observation;
pub mod organization;
pub mod patient;

use super::rule::TransformRule;

/// Every built-in rule in both directions
pub fn all() -> Vec<TransformRule> {
    [
        patient::rules(),
        composition::rules(),
        encounter::rules(),
        condition::rules(),
        allergy::rules(),
        medication::rules(),
        immunization::rules(),
        observation::rules(),
        organization::rules(),
    ]
    .into_iter()
    .flatten()
    .collect()
}
