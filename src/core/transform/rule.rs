//! Table-driven transform rules
//!
//! A [`TransformRule`] is declared once per resource type in the A -> B
//! direction as an ordered list of [`FieldTransform`]s. [`TransformRule::inverse`]
//! derives the B -> A rule by reversing the list and inverting every entry,
//! so both directions always stay in step.

use super::vocabulary::Vocabulary;
use crate::domain::codec::{decode_value, encode_value};
use crate::domain::{
    ClinicalResource, Concept, FieldValue, Generation, Reference, ResourceType, TransformError,
    TransformWarning,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Field map of a resource under transformation
pub type Fields = BTreeMap<String, FieldValue>;

/// Named field transform that cannot be expressed by the table variants
pub type CustomFn = fn(&mut RuleContext, &mut Fields) -> Result<(), TransformError>;

/// Expands a freshly transformed resource into extra fragment resources
pub type SplitFn =
    fn(&mut RuleContext, &mut ClinicalResource) -> Result<Vec<ClinicalResource>, TransformError>;

/// Folds one fragment back into its transformed parent
///
/// Returns `Ok(false)` when the fragment does not fit the parent.
pub type MergeFn =
    fn(&mut RuleContext, &mut ClinicalResource, &ClinicalResource) -> Result<bool, TransformError>;

/// Split/merge pair for resources that fragment across generations
#[derive(Debug, Clone)]
pub struct Fragmentation {
    /// Type of the fragments, which only exist in generation B
    pub fragment_type: ResourceType,
    pub split: SplitFn,
    pub merge: MergeFn,
}

/// Per-resource state while a rule runs
#[derive(Debug)]
pub struct RuleContext {
    resource_id: String,
    resource_type: String,
    warnings: Vec<TransformWarning>,
}

impl RuleContext {
    pub fn new(resource: &ClinicalResource) -> Self {
        Self {
            resource_id: resource.id.to_string(),
            resource_type: resource.resource_type.to_string(),
            warnings: Vec::new(),
        }
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    /// Records a code with no equivalent in the target vocabulary
    pub fn unmapped_code(&mut self, field: &str, code: &str) {
        self.warnings.push(TransformWarning::UnmappedCode {
            resource_id: self.resource_id.clone(),
            resource_type: self.resource_type.clone(),
            field: field.to_string(),
            code: code.to_string(),
        });
    }

    pub fn missing(&self, field: &str) -> TransformError {
        TransformError::MissingField {
            resource_id: self.resource_id.clone(),
            field: field.to_string(),
        }
    }

    pub fn invalid(&self, field: &str, reason: impl Into<String>) -> TransformError {
        TransformError::InvalidField {
            resource_id: self.resource_id.clone(),
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn conflict(&self, fields: &[&str]) -> TransformError {
        TransformError::ConflictingFields {
            resource_id: self.resource_id.clone(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    pub fn into_warnings(self) -> Vec<TransformWarning> {
        self.warnings
    }
}

/// One entry of a rule's field table
#[derive(Debug, Clone, Copy)]
pub enum FieldTransform {
    /// Moves a field to a new name
    Rename {
        from: &'static str,
        to: &'static str,
    },
    /// Remaps a code-valued field (or list of codes) through a table
    Vocabulary {
        field: &'static str,
        table: &'static Vocabulary,
        reversed: bool,
    },
    /// Remaps the codings of a concept-valued field through a table
    ConceptVocabulary {
        field: &'static str,
        table: &'static Vocabulary,
        reversed: bool,
    },
    /// Wraps a single value into a one-element list
    WrapList { field: &'static str },
    /// Unwraps a one-element list
    UnwrapList { field: &'static str },
    /// Folds a `[x]` choice of concept or reference into one codeable reference
    ChoiceToCodeableReference {
        concept: Option<&'static str>,
        reference: Option<&'static str>,
        target: &'static str,
        required: bool,
    },
    /// Splits a codeable reference back into its choice fields
    CodeableReferenceToChoice {
        concept: Option<&'static str>,
        reference: Option<&'static str>,
        target: &'static str,
        required: bool,
    },
    /// Merges parallel concept and reference lists into one codeable-reference list
    MergeReasons {
        concept: &'static str,
        reference: &'static str,
        target: &'static str,
    },
    /// Splits a codeable-reference list into parallel concept and reference lists
    SplitReasons {
        concept: &'static str,
        reference: &'static str,
        target: &'static str,
    },
    /// Named transform with an explicit inverse
    Custom {
        name: &'static str,
        apply: CustomFn,
        undo: CustomFn,
    },
}

impl FieldTransform {
    /// Returns the transform that undoes this one
    pub fn inverse(&self) -> FieldTransform {
        match *self {
            FieldTransform::Rename { from, to } => FieldTransform::Rename { from: to, to: from },
            FieldTransform::Vocabulary {
                field,
                table,
                reversed,
            } => FieldTransform::Vocabulary {
                field,
                table,
                reversed: !reversed,
            },
            FieldTransform::ConceptVocabulary {
                field,
                table,
                reversed,
            } => FieldTransform::ConceptVocabulary {
                field,
                table,
                reversed: !reversed,
            },
            FieldTransform::WrapList { field } => FieldTransform::UnwrapList { field },
            FieldTransform::UnwrapList { field } => FieldTransform::WrapList { field },
            FieldTransform::ChoiceToCodeableReference {
                concept,
                reference,
                target,
                required,
            } => FieldTransform::CodeableReferenceToChoice {
                concept,
                reference,
                target,
                required,
            },
            FieldTransform::CodeableReferenceToChoice {
                concept,
                reference,
                target,
                required,
            } => FieldTransform::ChoiceToCodeableReference {
                concept,
                reference,
                target,
                required,
            },
            FieldTransform::MergeReasons {
                concept,
                reference,
                target,
            } => FieldTransform::SplitReasons {
                concept,
                reference,
                target,
            },
            FieldTransform::SplitReasons {
                concept,
                reference,
                target,
            } => FieldTransform::MergeReasons {
                concept,
                reference,
                target,
            },
            FieldTransform::Custom { name, apply, undo } => FieldTransform::Custom {
                name,
                apply: undo,
                undo: apply,
            },
        }
    }

    /// Applies the transform to a field map
    pub fn apply(&self, ctx: &mut RuleContext, fields: &mut Fields) -> Result<(), TransformError> {
        match *self {
            FieldTransform::Rename { from, to } => {
                if let Some(value) = fields.remove(from) {
                    if fields.contains_key(to) {
                        return Err(ctx.conflict(&[from, to]));
                    }
                    fields.insert(to.to_string(), value);
                }
                Ok(())
            }
            FieldTransform::Vocabulary {
                field,
                table,
                reversed,
            } => {
                if let Some(value) = fields.get_mut(field) {
                    remap_code(ctx, field, table, reversed, value);
                }
                Ok(())
            }
            FieldTransform::ConceptVocabulary {
                field,
                table,
                reversed,
            } => {
                match fields.get_mut(field) {
                    Some(FieldValue::Concept(concept)) => {
                        remap_concept(ctx, field, table, reversed, concept)
                    }
                    Some(FieldValue::List(items)) => {
                        for item in items.iter_mut() {
                            if let FieldValue::Concept(concept) = item {
                                remap_concept(ctx, field, table, reversed, concept);
                            }
                        }
                    }
                    _ => {}
                }
                Ok(())
            }
            FieldTransform::WrapList { field } => {
                if let Some(value) = fields.remove(field) {
                    let wrapped = match value {
                        FieldValue::List(items) => FieldValue::List(items),
                        single => FieldValue::List(vec![single]),
                    };
                    fields.insert(field.to_string(), wrapped);
                }
                Ok(())
            }
            FieldTransform::UnwrapList { field } => {
                if let Some(FieldValue::List(items)) = fields.get(field) {
                    if items.len() == 1 {
                        let single = items[0].clone();
                        fields.insert(field.to_string(), single);
                    }
                }
                Ok(())
            }
            FieldTransform::ChoiceToCodeableReference {
                concept,
                reference,
                target,
                required,
            } => choice_to_codeable_reference(ctx, fields, concept, reference, target, required),
            FieldTransform::CodeableReferenceToChoice {
                concept,
                reference,
                target,
                required,
            } => codeable_reference_to_choice(ctx, fields, concept, reference, target, required),
            FieldTransform::MergeReasons {
                concept,
                reference,
                target,
            } => merge_reasons(ctx, fields, concept, reference, target),
            FieldTransform::SplitReasons {
                concept,
                reference,
                target,
            } => split_reasons(ctx, fields, concept, reference, target),
            FieldTransform::Custom { apply, .. } => apply(ctx, fields),
        }
    }
}

fn remap_code(
    ctx: &mut RuleContext,
    field: &str,
    table: &Vocabulary,
    reversed: bool,
    value: &mut FieldValue,
) {
    match value {
        FieldValue::Code(code) => match table.lookup(code, reversed) {
            Some(mapped) => *code = mapped.to_string(),
            None => {
                let code = code.clone();
                ctx.unmapped_code(field, &code);
                *value = FieldValue::Text(code);
            }
        },
        FieldValue::List(items) => {
            for item in items.iter_mut() {
                remap_code(ctx, field, table, reversed, item);
            }
        }
        _ => {}
    }
}

fn remap_concept(
    ctx: &mut RuleContext,
    field: &str,
    table: &Vocabulary,
    reversed: bool,
    concept: &mut Concept,
) {
    let mut unmapped = Vec::new();
    let mut codings = Vec::with_capacity(concept.codings.len());
    for mut coding in std::mem::take(&mut concept.codings) {
        let in_system = match table.system {
            Some(system) => coding.system.as_deref() == Some(system),
            None => true,
        };
        let code = match coding.code.clone() {
            Some(code) if in_system => code,
            _ => {
                codings.push(coding);
                continue;
            }
        };
        match table.lookup(&code, reversed) {
            Some(mapped) => {
                coding.code = Some(mapped.to_string());
                codings.push(coding);
            }
            None => {
                ctx.unmapped_code(field, &code);
                unmapped.push(code);
            }
        }
    }
    concept.codings = codings;
    if !unmapped.is_empty() {
        let codes = unmapped.join(", ");
        concept.text = Some(match concept.text.take() {
            Some(text) => format!("{text} [{codes}]"),
            None => codes,
        });
    }
}

/// Wraps a concept or reference value into a codeable reference
///
/// Values the typed variant cannot hold are wrapped as a structure so they
/// survive unchanged.
pub fn to_codeable_reference(slot: &str, value: FieldValue) -> FieldValue {
    match (slot, value) {
        ("concept", FieldValue::Concept(concept)) => FieldValue::CodeableReference {
            concept: Some(concept),
            reference: None,
        },
        ("reference", FieldValue::Reference(reference)) => FieldValue::CodeableReference {
            concept: None,
            reference: Some(reference),
        },
        (slot, other) => {
            let mut map = Map::new();
            map.insert(slot.to_string(), encode_value(&other));
            FieldValue::Structure(map)
        }
    }
}

/// Which half of a codeable reference a value came from
enum ReferenceSlot {
    Concept(FieldValue),
    Reference(FieldValue),
}

fn from_codeable_reference(
    value: &FieldValue,
    concept_name: &str,
    reference_name: &str,
) -> Option<ReferenceSlot> {
    match value {
        FieldValue::CodeableReference {
            concept: Some(concept),
            reference: None,
        } => Some(ReferenceSlot::Concept(FieldValue::Concept(concept.clone()))),
        FieldValue::CodeableReference {
            concept: None,
            reference: Some(reference),
        } => Some(ReferenceSlot::Reference(FieldValue::Reference(
            reference.clone(),
        ))),
        FieldValue::Structure(map) if map.len() == 1 => {
            let (slot, inner): (&String, &Value) = map.iter().next()?;
            match slot.as_str() {
                "concept" => decode_value(concept_name, inner).map(ReferenceSlot::Concept),
                "reference" => decode_value(reference_name, inner).map(ReferenceSlot::Reference),
                _ => None,
            }
        }
        _ => None,
    }
}

fn choice_to_codeable_reference(
    ctx: &mut RuleContext,
    fields: &mut Fields,
    concept: Option<&'static str>,
    reference: Option<&'static str>,
    target: &'static str,
    required: bool,
) -> Result<(), TransformError> {
    let concept_value = concept.and_then(|name| fields.remove(name));
    let reference_value = reference.and_then(|name| fields.remove(name));
    let value = match (concept_value, reference_value) {
        (Some(_), Some(_)) => {
            let names: Vec<&str> = concept.into_iter().chain(reference).collect();
            return Err(ctx.conflict(&names));
        }
        (Some(c), None) => to_codeable_reference("concept", c),
        (None, Some(r)) => to_codeable_reference("reference", r),
        (None, None) if required => return Err(ctx.missing(&format!("{target}[x]"))),
        (None, None) => return Ok(()),
    };
    if fields.contains_key(target) {
        return Err(ctx.conflict(&[target]));
    }
    fields.insert(target.to_string(), value);
    Ok(())
}

fn codeable_reference_to_choice(
    ctx: &mut RuleContext,
    fields: &mut Fields,
    concept: Option<&'static str>,
    reference: Option<&'static str>,
    target: &'static str,
    required: bool,
) -> Result<(), TransformError> {
    let Some(value) = fields.remove(target) else {
        return if required {
            Err(ctx.missing(target))
        } else {
            Ok(())
        };
    };
    let slot = from_codeable_reference(
        &value,
        concept.unwrap_or("concept"),
        reference.unwrap_or("reference"),
    );
    let (name, inner) = match (slot, concept, reference) {
        (Some(ReferenceSlot::Concept(inner)), Some(name), _) => (name, inner),
        (Some(ReferenceSlot::Reference(inner)), _, Some(name)) => (name, inner),
        _ => {
            // not representable as a choice, keep as is
            fields.insert(target.to_string(), value);
            return Ok(());
        }
    };
    if fields.contains_key(name) {
        return Err(ctx.conflict(&[target, name]));
    }
    fields.insert(name.to_string(), inner);
    Ok(())
}

fn into_items(value: Option<FieldValue>) -> Vec<FieldValue> {
    match value {
        None => Vec::new(),
        Some(FieldValue::List(items)) => items,
        Some(single) => vec![single],
    }
}

fn merge_reasons(
    ctx: &mut RuleContext,
    fields: &mut Fields,
    concept: &'static str,
    reference: &'static str,
    target: &'static str,
) -> Result<(), TransformError> {
    if !fields.contains_key(concept) && !fields.contains_key(reference) {
        return Ok(());
    }
    if fields.contains_key(target) {
        return Err(ctx.conflict(&[concept, reference, target]));
    }
    let concepts = into_items(fields.remove(concept));
    let references = into_items(fields.remove(reference));
    let merged = concepts
        .into_iter()
        .map(|c| to_codeable_reference("concept", c))
        .chain(
            references
                .into_iter()
                .map(|r| to_codeable_reference("reference", r)),
        )
        .collect();
    fields.insert(target.to_string(), FieldValue::List(merged));
    Ok(())
}

fn split_reasons(
    ctx: &mut RuleContext,
    fields: &mut Fields,
    concept: &'static str,
    reference: &'static str,
    target: &'static str,
) -> Result<(), TransformError> {
    let Some(value) = fields.get(target) else {
        return Ok(());
    };
    let items = match value {
        FieldValue::List(items) => items.as_slice(),
        single => std::slice::from_ref(single),
    };

    let mut concepts = Vec::new();
    let mut references = Vec::new();
    for item in items {
        match from_codeable_reference(item, concept, reference) {
            Some(ReferenceSlot::Concept(c)) => concepts.push(c),
            Some(ReferenceSlot::Reference(r)) => references.push(r),
            // mixed entries cannot be split, the list stays as it is
            None => return Ok(()),
        }
    }

    if fields.contains_key(concept) || fields.contains_key(reference) {
        return Err(ctx.conflict(&[concept, reference, target]));
    }
    fields.remove(target);
    if !concepts.is_empty() {
        fields.insert(concept.to_string(), FieldValue::List(concepts));
    }
    if !references.is_empty() {
        fields.insert(reference.to_string(), FieldValue::List(references));
    }
    Ok(())
}

/// Runs a JSON-level edit over one field
///
/// Nested backbone elements are easier to restructure as JSON. The field is
/// encoded, edited and decoded again under the same name; a field the edit
/// turns into JSON null is removed.
pub fn edit_json<F>(fields: &mut Fields, field: &str, edit: F) -> Result<(), TransformError>
where
    F: FnOnce(&mut Value) -> Result<(), TransformError>,
{
    let Some(value) = fields.get(field) else {
        return Ok(());
    };
    let mut json = encode_value(value);
    edit(&mut json)?;
    match decode_value(field, &json) {
        Some(decoded) => fields.insert(field.to_string(), decoded),
        None => fields.remove(field),
    };
    Ok(())
}

/// Applies `edit` to every object entry of a list-valued field
pub fn edit_entries<F>(fields: &mut Fields, field: &str, mut edit: F) -> Result<(), TransformError>
where
    F: FnMut(&mut Map<String, Value>),
{
    edit_json(fields, field, |json| {
        if let Some(entries) = json.as_array_mut() {
            for entry in entries.iter_mut().filter_map(Value::as_object_mut) {
                edit(entry);
            }
        }
        Ok(())
    })
}

/// A registered transform for one resource type and source generation
#[derive(Debug, Clone)]
pub struct TransformRule {
    pub source_type: ResourceType,
    pub source: Generation,
    pub target_type: ResourceType,
    pub version: &'static str,

    /// Fields the source resource must carry
    pub required: Vec<&'static str>,
    pub fields: Vec<FieldTransform>,

    /// Fragments produced after the field table ran
    pub split: Option<Fragmentation>,

    /// Fragments folded back into the output of this rule
    pub merge: Option<Fragmentation>,
}

impl TransformRule {
    /// Starts a rule that keeps the resource type
    pub fn new(resource_type: ResourceType, source: Generation, version: &'static str) -> Self {
        Self {
            source_type: resource_type.clone(),
            source,
            target_type: resource_type,
            version,
            required: Vec::new(),
            fields: Vec::new(),
            split: None,
            merge: None,
        }
    }

    pub fn target_type(mut self, target_type: ResourceType) -> Self {
        self.target_type = target_type;
        self
    }

    pub fn require(mut self, fields: &[&'static str]) -> Self {
        self.required = fields.to_vec();
        self
    }

    pub fn field(mut self, transform: FieldTransform) -> Self {
        self.fields.push(transform);
        self
    }

    pub fn split(mut self, fragmentation: Fragmentation) -> Self {
        self.split = Some(fragmentation);
        self
    }

    /// Target generation of the rule
    pub fn target(&self) -> Generation {
        self.source.opposite()
    }

    /// Tag recorded in provenance, e.g. `Condition:A->B@1.0.0`
    pub fn version_tag(&self) -> String {
        format!(
            "{}:{}->{}@{}",
            self.source_type,
            self.source,
            self.target(),
            self.version
        )
    }

    /// Derives the rule for the opposite direction
    ///
    /// Required fields are not inverted; set them on the result with
    /// [`TransformRule::require`].
    pub fn inverse(&self) -> TransformRule {
        TransformRule {
            source_type: self.target_type.clone(),
            source: self.target(),
            target_type: self.source_type.clone(),
            version: self.version,
            required: Vec::new(),
            fields: self.fields.iter().rev().map(FieldTransform::inverse).collect(),
            split: self.merge.clone(),
            merge: self.split.clone(),
        }
    }

    /// Transforms one resource
    ///
    /// The first produced resource is the direct counterpart of the input;
    /// any split fragments follow it.
    pub fn apply(
        &self,
        resource: &ClinicalResource,
    ) -> Result<(Vec<ClinicalResource>, Vec<TransformWarning>), TransformError> {
        let mut ctx = RuleContext::new(resource);

        if let Some(missing) = self
            .required
            .iter()
            .find(|name| !resource.fields.contains_key(**name))
        {
            return Err(ctx.missing(missing));
        }

        let mut fields = resource.fields.clone();
        for transform in &self.fields {
            transform.apply(&mut ctx, &mut fields)?;
        }

        let mut target = ClinicalResource {
            id: resource.id.clone(),
            resource_type: self.target_type.clone(),
            generation: self.target(),
            fields,
            source_id: Some(resource.id.clone()),
            created_at: resource.created_at,
        };

        let fragments = match &self.split {
            Some(fragmentation) => (fragmentation.split)(&mut ctx, &mut target)?,
            None => Vec::new(),
        };

        let mut produced = Vec::with_capacity(1 + fragments.len());
        produced.push(target);
        produced.extend(fragments);
        Ok((produced, ctx.into_warnings()))
    }
}

/// Field through which a fragment references the resource it was split from
pub const PARENT_FIELD: &str = "parent";

/// Id of the resource a fragment was split from
pub fn fragment_parent_id(fragment: &ClinicalResource) -> Option<&str> {
    fragment
        .field(PARENT_FIELD)
        .and_then(FieldValue::as_reference)
        .and_then(|r| r.target_id())
}

/// Builds a reference value to a resource
pub fn reference_to(resource_type: &ResourceType, id: &str) -> FieldValue {
    FieldValue::Reference(Reference::to(format!("{resource_type}/{id}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transform::vocabulary::OBSERVATION_STATUS;
    use crate::domain::Coding;

    fn resource(fields: Vec<(&str, FieldValue)>) -> ClinicalResource {
        let mut builder = ClinicalResource::builder()
            .id("r-1")
            .unwrap()
            .resource_type(ResourceType::Observation)
            .generation(Generation::A);
        for (name, value) in fields {
            builder = builder.field(name, value);
        }
        builder.build().unwrap()
    }

    fn run(transform: FieldTransform, fields: &mut Fields) -> (Result<(), TransformError>, Vec<TransformWarning>) {
        let mut ctx = RuleContext::new(&resource(vec![]));
        let result = transform.apply(&mut ctx, fields);
        (result, ctx.into_warnings())
    }

    #[test]
    fn test_rename_conflict() {
        let mut fields = Fields::new();
        fields.insert("period".into(), FieldValue::Text("a".into()));
        fields.insert("actualPeriod".into(), FieldValue::Text("b".into()));
        let (result, _) = run(
            FieldTransform::Rename {
                from: "period",
                to: "actualPeriod",
            },
            &mut fields,
        );
        assert!(matches!(result, Err(TransformError::ConflictingFields { .. })));
    }

    #[test]
    fn test_vocabulary_miss_becomes_text_with_warning() {
        let mut fields = Fields::new();
        fields.insert("status".into(), FieldValue::Code("appended".into()));
        let (result, warnings) = run(
            FieldTransform::Vocabulary {
                field: "status",
                table: &OBSERVATION_STATUS,
                reversed: true,
            },
            &mut fields,
        );
        assert!(result.is_ok());
        assert_eq!(fields["status"], FieldValue::Text("appended".into()));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_choice_round_trip() {
        let concept = FieldValue::Concept(Concept::from_coding(Coding::new("http://rxnorm", "1")));
        let mut fields = Fields::new();
        fields.insert("medicationCodeableConcept".into(), concept.clone());
        let forward = FieldTransform::ChoiceToCodeableReference {
            concept: Some("medicationCodeableConcept"),
            reference: Some("medicationReference"),
            target: "medication",
            required: true,
        };
        run(forward, &mut fields).0.unwrap();
        assert!(matches!(fields["medication"], FieldValue::CodeableReference { .. }));

        run(forward.inverse(), &mut fields).0.unwrap();
        assert_eq!(fields["medicationCodeableConcept"], concept);
        assert!(!fields.contains_key("medication"));
    }

    #[test]
    fn test_choice_missing_is_error() {
        let mut fields = Fields::new();
        let (result, _) = run(
            FieldTransform::ChoiceToCodeableReference {
                concept: Some("medicationCodeableConcept"),
                reference: Some("medicationReference"),
                target: "medication",
                required: true,
            },
            &mut fields,
        );
        assert_eq!(
            result.unwrap_err(),
            TransformError::MissingField {
                resource_id: "r-1".into(),
                field: "medication[x]".into()
            }
        );
    }

    #[test]
    fn test_reasons_round_trip() {
        let code = FieldValue::List(vec![FieldValue::Concept(Concept::from_text("headache"))]);
        let refs = FieldValue::List(vec![FieldValue::Reference(Reference::to("Condition/c1"))]);
        let mut fields = Fields::new();
        fields.insert("reasonCode".into(), code.clone());
        fields.insert("reasonReference".into(), refs.clone());
        let merge = FieldTransform::MergeReasons {
            concept: "reasonCode",
            reference: "reasonReference",
            target: "reason",
        };
        run(merge, &mut fields).0.unwrap();
        assert_eq!(fields["reason"].as_list().map(<[FieldValue]>::len), Some(2));

        run(merge.inverse(), &mut fields).0.unwrap();
        assert_eq!(fields["reasonCode"], code);
        assert_eq!(fields["reasonReference"], refs);
    }

    #[test]
    fn test_wrap_unwrap() {
        let mut fields = Fields::new();
        fields.insert("category".into(), FieldValue::Concept(Concept::from_text("x")));
        run(FieldTransform::WrapList { field: "category" }, &mut fields).0.unwrap();
        assert!(matches!(fields["category"], FieldValue::List(_)));
        run(FieldTransform::UnwrapList { field: "category" }, &mut fields).0.unwrap();
        assert!(matches!(fields["category"], FieldValue::Concept(_)));
    }

    #[test]
    fn test_concept_vocabulary_moves_unmapped_coding_to_text() {
        use crate::core::transform::vocabulary::CONDITION_CLINICAL_STATUS;
        let mut fields = Fields::new();
        fields.insert(
            "clinicalStatus".into(),
            FieldValue::Concept(Concept::from_coding(Coding::new(
                "http://terminology.hl7.org/CodeSystem/condition-clinical",
                "unknown",
            ))),
        );
        let (_, warnings) = run(
            FieldTransform::ConceptVocabulary {
                field: "clinicalStatus",
                table: &CONDITION_CLINICAL_STATUS,
                reversed: true,
            },
            &mut fields,
        );
        let concept = fields["clinicalStatus"].as_concept().unwrap();
        assert!(concept.codings.is_empty());
        assert_eq!(concept.text.as_deref(), Some("unknown"));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_rule_requires_fields() {
        let rule = TransformRule::new(ResourceType::Observation, Generation::A, "1.0.0")
            .require(&["code"]);
        let err = rule.apply(&resource(vec![])).unwrap_err();
        assert!(matches!(err, TransformError::MissingField { .. }));
    }

    #[test]
    fn test_rule_sets_source_reference() {
        let rule = TransformRule::new(ResourceType::Observation, Generation::A, "1.0.0");
        let (produced, _) = rule.apply(&resource(vec![])).unwrap();
        assert_eq!(produced[0].generation, Generation::B);
        assert_eq!(produced[0].source_id.as_ref().map(|id| id.as_str()), Some("r-1"));
        assert_eq!(rule.version_tag(), "Observation:A->B@1.0.0");
        assert_eq!(rule.inverse().version_tag(), "Observation:B->A@1.0.0");
    }

    fn no_split(
        _: &mut RuleContext,
        _: &mut ClinicalResource,
    ) -> Result<Vec<ClinicalResource>, TransformError> {
        Ok(Vec::new())
    }

    fn no_merge(
        _: &mut RuleContext,
        _: &mut ClinicalResource,
        _: &ClinicalResource,
    ) -> Result<bool, TransformError> {
        Ok(false)
    }

    #[test]
    fn test_inverse_swaps_split_and_merge() {
        let rule = TransformRule::new(ResourceType::Observation, Generation::A, "1.0.0").split(
            Fragmentation {
                fragment_type: ResourceType::MedicationTiming,
                split: no_split,
                merge: no_merge,
            },
        );
        let inverse = rule.inverse();

        assert!(inverse.split.is_none());
        let merge = inverse.merge.as_ref().unwrap();
        assert_eq!(merge.fragment_type, ResourceType::MedicationTiming);
        assert_eq!(
            rule.split.as_ref().map(|f| f.fragment_type.clone()),
            Some(ResourceType::MedicationTiming)
        );
    }
}
