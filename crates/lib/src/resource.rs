//! Resource model: the typed representation of a single declared resource.
//!
//! A declaration set maps resource ids to [`ResourceSpec`]s. Parameters are
//! literal values or [`ParameterRef`]s pointing at another resource's output;
//! refs are never evaluated at parse time, only after the referenced resource
//! has been applied.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Identifier of a resource, unique within one declaration set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub String);

impl std::fmt::Display for ResourceId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl From<&str> for ResourceId {
  fn from(s: &str) -> Self {
    Self(s.to_string())
  }
}

/// Reference to another resource's output.
///
/// Resolved strictly after the referenced resource has been applied (or from
/// its apply record when the resource is not changing in this run).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterRef {
  /// Id of the resource whose output is referenced.
  #[serde(rename = "ref")]
  pub resource: ResourceId,

  /// Name of the referenced output.
  pub output: String,
}

/// A parameter value: a literal or a cross-resource output reference.
///
/// `Ref` must come first so that tables shaped `{ ref = "...", output = "..." }`
/// deserialize as references rather than generic maps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
  Ref(ParameterRef),
  Bool(bool),
  Int(i64),
  Float(f64),
  String(String),
  List(Vec<ParamValue>),
  Map(BTreeMap<String, ParamValue>),
}

impl ParamValue {
  /// Recursively collect every [`ParameterRef`] contained in this value.
  pub fn collect_refs<'a>(&'a self, refs: &mut Vec<&'a ParameterRef>) {
    match self {
      ParamValue::Ref(r) => refs.push(r),
      ParamValue::List(items) => {
        for item in items {
          item.collect_refs(refs);
        }
      }
      ParamValue::Map(map) => {
        for value in map.values() {
          value.collect_refs(refs);
        }
      }
      ParamValue::Bool(_) | ParamValue::Int(_) | ParamValue::Float(_) | ParamValue::String(_) => {}
    }
  }

  /// Rewrite refs in this value, keeping the rest of the structure.
  ///
  /// The callback returns `Some(replacement)` to substitute a ref, or `None`
  /// to leave it symbolic.
  pub fn resolve_refs<E>(
    &self,
    resolve: &mut impl FnMut(&ParameterRef) -> Result<Option<ParamValue>, E>,
  ) -> Result<ParamValue, E> {
    match self {
      ParamValue::Ref(r) => Ok(resolve(r)?.unwrap_or_else(|| ParamValue::Ref(r.clone()))),
      ParamValue::List(items) => {
        let mut resolved = Vec::with_capacity(items.len());
        for item in items {
          resolved.push(item.resolve_refs(resolve)?);
        }
        Ok(ParamValue::List(resolved))
      }
      ParamValue::Map(map) => {
        let mut resolved = BTreeMap::new();
        for (key, value) in map {
          resolved.insert(key.clone(), value.resolve_refs(resolve)?);
        }
        Ok(ParamValue::Map(resolved))
      }
      other => Ok(other.clone()),
    }
  }
}

/// Desired state of a single externally-managed infrastructure resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
  /// Unique id within the declaration set.
  pub id: ResourceId,

  /// Resource kind (e.g. `storage-account`, `compute-service`).
  pub kind: String,

  /// Whether this run may deploy the resource. `false` means "reuse an
  /// existing deployment": outputs come from the prior apply record and the
  /// backend is never called.
  pub deploy: bool,

  /// Parameters passed to the backend; values may reference other
  /// resources' outputs.
  pub parameters: BTreeMap<String, ParamValue>,

  /// Explicit dependency edges, in addition to those inferred from refs.
  pub depends_on: Vec<ResourceId>,
}

impl ResourceSpec {
  /// All parameter refs declared by this resource.
  pub fn parameter_refs(&self) -> Vec<&ParameterRef> {
    let mut refs = Vec::new();
    for value in self.parameters.values() {
      value.collect_refs(&mut refs);
    }
    refs
  }
}

/// A full declaration set, keyed by resource id.
pub type DeclarationSet = BTreeMap<ResourceId, ResourceSpec>;

#[cfg(test)]
mod tests {
  use super::*;

  fn reference(resource: &str, output: &str) -> ParameterRef {
    ParameterRef {
      resource: resource.into(),
      output: output.to_string(),
    }
  }

  #[test]
  fn collect_refs_walks_nested_values() {
    let mut inner = BTreeMap::new();
    inner.insert("url".to_string(), ParamValue::Ref(reference("storage", "endpoint")));

    let spec = ResourceSpec {
      id: "backend".into(),
      kind: "compute-service".to_string(),
      deploy: true,
      parameters: [
        ("name".to_string(), ParamValue::String("api".to_string())),
        (
          "env".to_string(),
          ParamValue::List(vec![ParamValue::Map(inner), ParamValue::Ref(reference("db", "conn"))]),
        ),
      ]
      .into_iter()
      .collect(),
      depends_on: vec![],
    };

    let refs = spec.parameter_refs();
    assert_eq!(refs.len(), 2);
    assert_eq!(refs[0].resource, "storage".into());
    assert_eq!(refs[1].resource, "db".into());
  }

  #[test]
  fn resolve_refs_substitutes_and_keeps_symbolic() {
    let value = ParamValue::List(vec![
      ParamValue::Ref(reference("storage", "endpoint")),
      ParamValue::Ref(reference("db", "conn")),
      ParamValue::Int(7),
    ]);

    let resolved = value
      .resolve_refs::<()>(&mut |r| {
        if r.resource == "storage".into() {
          Ok(Some(ParamValue::String("https://blob".to_string())))
        } else {
          Ok(None)
        }
      })
      .unwrap();

    assert_eq!(
      resolved,
      ParamValue::List(vec![
        ParamValue::String("https://blob".to_string()),
        ParamValue::Ref(reference("db", "conn")),
        ParamValue::Int(7),
      ])
    );
  }

  #[test]
  fn ref_deserializes_before_map() {
    let value: ParamValue = serde_json::from_str(r#"{"ref": "storage", "output": "endpoint"}"#).unwrap();
    assert_eq!(value, ParamValue::Ref(reference("storage", "endpoint")));

    let value: ParamValue = serde_json::from_str(r#"{"tier": "standard"}"#).unwrap();
    assert!(matches!(value, ParamValue::Map(_)));
  }
}
