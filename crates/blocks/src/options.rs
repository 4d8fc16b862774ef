//! Option declaration, resolution and validation.
//!
//! Each processor declares an ordered set of options. Defaults may be
//! static, computed from the acquired image's metadata, or looked up in the
//! store, which is why resolution runs after acquisition and never before.
//! The resolved map is immutable; construction is its only write path.

use std::collections::BTreeMap;

use chain_kit_common::{ImageMetadata, ImageRef, OptionValue};

use crate::error::{BlockError, ProcessingError, Result};
use crate::store::{ImageStore, StoreError};

/// The type an option value must have
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Float,
    Int,
    Bool,
    Text,
}

impl OptionKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Int => "int",
            Self::Bool => "bool",
            Self::Text => "text",
        }
    }
}

/// A per-option constraint, checked during the configure stage
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    None,
    /// Exclusive lower bound for numeric options
    GreaterThan(f64),
    /// Inclusive numeric range
    Range { min: f64, max: f64 },
    /// Admissible values for text options
    OneOf(Vec<&'static str>),
}

/// Where an option's value comes from when the operator supplies none
#[derive(Debug, Clone)]
pub enum DefaultSource {
    /// A fixed fallback value
    Static(OptionValue),
    /// Computed from the acquired image's metadata
    FromMetadata(fn(&ImageMetadata) -> Option<OptionValue>),
    /// Looked up in the store via `fetch_default`
    FromStore,
    /// No default; an explicit value is mandatory
    Required,
}

/// Declaration of a single option of a processing block
#[derive(Debug, Clone)]
pub struct OptionDecl {
    pub name: &'static str,
    pub kind: OptionKind,
    pub constraint: Constraint,
    pub default: DefaultSource,
    pub doc: &'static str,
}

impl OptionDecl {
    pub fn new(name: &'static str, kind: OptionKind, doc: &'static str) -> Self {
        Self {
            name,
            kind,
            constraint: Constraint::None,
            default: DefaultSource::Required,
            doc,
        }
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraint = constraint;
        self
    }

    pub fn with_default(mut self, default: DefaultSource) -> Self {
        self.default = default;
        self
    }
}

/// The validated name→value map a block carries from configure onwards.
///
/// There is no mutation API; once built the options are frozen for the rest
/// of the lifecycle.
#[derive(Debug, Clone, Default)]
pub struct ResolvedOptions {
    values: BTreeMap<String, OptionValue>,
}

impl ResolvedOptions {
    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.values.get(name)
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        self.values.get(name).and_then(OptionValue::as_float)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.values.get(name).and_then(OptionValue::as_int)
    }

    pub fn flag(&self, name: &str) -> Option<bool> {
        self.values.get(name).and_then(OptionValue::as_bool)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(OptionValue::as_text)
    }

    /// Like [`Self::float`], but failing as a processing error.
    ///
    /// For use inside `process` implementations, where a declared option is
    /// guaranteed resolved and absence means a wiring bug.
    pub fn require_float(&self, name: &str) -> std::result::Result<f64, ProcessingError> {
        self.float(name)
            .ok_or_else(|| ProcessingError::Algorithm(format!("option `{name}` not resolved")))
    }

    pub fn require_int(&self, name: &str) -> std::result::Result<i64, ProcessingError> {
        self.int(name)
            .ok_or_else(|| ProcessingError::Algorithm(format!("option `{name}` not resolved")))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Resolve declared options against supplied values, image-derived defaults
/// and store defaults, validating each in declaration order.
pub fn resolve(
    decls: &[OptionDecl],
    supplied: &BTreeMap<String, OptionValue>,
    reference: &ImageRef,
    metadata: &ImageMetadata,
    store: &dyn ImageStore,
) -> Result<ResolvedOptions> {
    let mut values = BTreeMap::new();

    for decl in decls {
        let value = match supplied.get(decl.name) {
            Some(value) => value.clone(),
            None => default_for(decl, reference, metadata, store)?,
        };
        let value = check(decl, value)?;
        values.insert(decl.name.to_string(), value);
    }

    // Supplied values that match no declaration are misconfigurations, not
    // silent extras.
    for name in supplied.keys() {
        if !decls.iter().any(|d| d.name == name) {
            return Err(BlockError::invalid_option(
                name.clone(),
                supplied[name].clone(),
                "option is not declared by this block",
            ));
        }
    }

    Ok(ResolvedOptions { values })
}

fn default_for(
    decl: &OptionDecl,
    reference: &ImageRef,
    metadata: &ImageMetadata,
    store: &dyn ImageStore,
) -> Result<OptionValue> {
    match &decl.default {
        DefaultSource::Static(value) => Ok(value.clone()),
        DefaultSource::FromMetadata(derive) => derive(metadata).ok_or_else(|| {
            BlockError::invalid_option(
                decl.name,
                OptionValue::Text(String::new()),
                "no value supplied and none derivable from the image metadata",
            )
        }),
        DefaultSource::FromStore => match store.fetch_default(reference, decl.name) {
            Ok(value) => Ok(value),
            Err(StoreError::NoDefault { .. }) => Err(BlockError::invalid_option(
                decl.name,
                OptionValue::Text(String::new()),
                "no value supplied and the store holds no default",
            )),
            Err(e) => Err(BlockError::invalid_option(
                decl.name,
                OptionValue::Text(String::new()),
                format!("default lookup failed: {e}"),
            )),
        },
        DefaultSource::Required => Err(BlockError::invalid_option(
            decl.name,
            OptionValue::Text(String::new()),
            "a value is required",
        )),
    }
}

/// Type- and constraint-check one value, widening ints where a float is
/// declared (configuration files carry `10` as an integer).
fn check(decl: &OptionDecl, value: OptionValue) -> Result<OptionValue> {
    let value = match (decl.kind, value) {
        (OptionKind::Float, OptionValue::Int(v)) => OptionValue::Float(v as f64),
        (OptionKind::Float, v @ OptionValue::Float(_)) => v,
        (OptionKind::Int, v @ OptionValue::Int(_)) => v,
        (OptionKind::Bool, v @ OptionValue::Bool(_)) => v,
        (OptionKind::Text, v @ OptionValue::Text(_)) => v,
        (kind, v) => {
            return Err(BlockError::invalid_option(
                decl.name,
                v.clone(),
                format!("expected {}, got {}", kind.name(), v.kind_name()),
            ))
        }
    };

    match &decl.constraint {
        Constraint::None => {}
        Constraint::GreaterThan(min) => {
            let v = value.as_float().unwrap_or(f64::NAN);
            if !(v > *min) {
                return Err(BlockError::invalid_option(
                    decl.name,
                    value,
                    format!("must be > {min}"),
                ));
            }
        }
        Constraint::Range { min, max } => {
            let v = value.as_float().unwrap_or(f64::NAN);
            if !(v >= *min && v <= *max) {
                return Err(BlockError::invalid_option(
                    decl.name,
                    value,
                    format!("must be within {min}..={max}"),
                ));
            }
        }
        Constraint::OneOf(admissible) => {
            let v = value.as_text().unwrap_or_default();
            if !admissible.contains(&v) {
                return Err(BlockError::invalid_option(
                    decl.name,
                    value.clone(),
                    format!("must be one of {admissible:?}"),
                ));
            }
        }
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use image::DynamicImage;

    fn fixture() -> (MemoryStore, ImageRef, ImageMetadata) {
        let store = MemoryStore::new();
        let metadata = ImageMetadata::new("specimen", 8, 8)
            .unwrap()
            .with_pixel_size_um(0.5);
        let reference = store.insert_image(DynamicImage::new_luma8(8, 8), metadata.clone());
        (store, reference, metadata)
    }

    fn sigma_decl() -> OptionDecl {
        OptionDecl::new("sigma", OptionKind::Float, "blur width")
            .with_constraint(Constraint::GreaterThan(0.0))
            .with_default(DefaultSource::FromMetadata(|meta| {
                meta.pixel_size_um.map(|p| OptionValue::Float(2.0 * p))
            }))
    }

    #[test]
    fn test_supplied_value_wins_over_default() {
        let (store, reference, metadata) = fixture();
        let supplied = BTreeMap::from([("sigma".to_string(), OptionValue::Float(3.0))]);
        let resolved =
            resolve(&[sigma_decl()], &supplied, &reference, &metadata, &store).unwrap();
        assert_eq!(resolved.float("sigma"), Some(3.0));
    }

    #[test]
    fn test_metadata_derived_default() {
        let (store, reference, metadata) = fixture();
        let resolved =
            resolve(&[sigma_decl()], &BTreeMap::new(), &reference, &metadata, &store).unwrap();
        assert_eq!(resolved.float("sigma"), Some(1.0));
    }

    #[test]
    fn test_negative_sigma_rejected() {
        let (store, reference, metadata) = fixture();
        let supplied = BTreeMap::from([("sigma".to_string(), OptionValue::Float(-1.0))]);
        let err = resolve(&[sigma_decl()], &supplied, &reference, &metadata, &store).unwrap_err();
        match err {
            BlockError::OptionValidation { option, value, .. } => {
                assert_eq!(option, "sigma");
                assert_eq!(value, OptionValue::Float(-1.0));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_int_widens_to_float() {
        let (store, reference, metadata) = fixture();
        let supplied = BTreeMap::from([("sigma".to_string(), OptionValue::Int(2))]);
        let resolved =
            resolve(&[sigma_decl()], &supplied, &reference, &metadata, &store).unwrap();
        assert_eq!(resolved.float("sigma"), Some(2.0));
    }

    #[test]
    fn test_kind_mismatch_names_both_kinds() {
        let (store, reference, metadata) = fixture();
        let supplied = BTreeMap::from([("sigma".to_string(), OptionValue::Text("big".into()))]);
        let err = resolve(&[sigma_decl()], &supplied, &reference, &metadata, &store).unwrap_err();
        assert!(err.to_string().contains("expected float"));
    }

    #[test]
    fn test_store_default() {
        let (store, reference, metadata) = fixture();
        store.set_default(&reference, "bins", OptionValue::Int(128));
        let decl = OptionDecl::new("bins", OptionKind::Int, "histogram bins")
            .with_constraint(Constraint::Range { min: 2.0, max: 1024.0 })
            .with_default(DefaultSource::FromStore);
        let resolved = resolve(&[decl], &BTreeMap::new(), &reference, &metadata, &store).unwrap();
        assert_eq!(resolved.int("bins"), Some(128));
    }

    #[test]
    fn test_required_option_missing() {
        let (store, reference, metadata) = fixture();
        let decl = OptionDecl::new("psf_sigma", OptionKind::Float, "psf width");
        let err = resolve(&[decl], &BTreeMap::new(), &reference, &metadata, &store).unwrap_err();
        assert!(err.to_string().contains("psf_sigma"));
    }

    #[test]
    fn test_undeclared_supplied_option_rejected() {
        let (store, reference, metadata) = fixture();
        let supplied = BTreeMap::from([("unknown".to_string(), OptionValue::Int(1))]);
        let err = resolve(&[sigma_decl()], &supplied, &reference, &metadata, &store).unwrap_err();
        assert!(err.to_string().contains("unknown"));
    }

    #[test]
    fn test_one_of_constraint() {
        let (store, reference, metadata) = fixture();
        let decl = OptionDecl::new("mode", OptionKind::Text, "projection mode")
            .with_constraint(Constraint::OneOf(vec!["max", "mean"]))
            .with_default(DefaultSource::Static(OptionValue::Text("max".into())));
        let supplied = BTreeMap::from([("mode".to_string(), OptionValue::Text("median".into()))]);
        assert!(resolve(&[decl.clone()], &supplied, &reference, &metadata, &store).is_err());
        let resolved = resolve(&[decl], &BTreeMap::new(), &reference, &metadata, &store).unwrap();
        assert_eq!(resolved.text("mode"), Some("max"));
    }
}
