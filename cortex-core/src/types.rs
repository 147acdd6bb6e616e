//! Type registry and the property mutation policy.
//!
//! Each property binds to a named type; types may derive from a base
//! (`subof`) and carry a mutation policy. Policies are a closed variant
//! set rather than runtime flag sniffing.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::errors::{CortexError, CortexResult};
use crate::row::{parse_int, Valu};

/// Guard against subof cycles introduced by re-registration.
const MAX_SUBOF_DEPTH: usize = 64;

/// How `set_tufo_prop` treats an existing value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypePolicy {
    /// Any assignment of the right shape.
    Plain,
    /// Updates only accept strictly smaller values.
    Min,
    /// Updates only accept strictly larger values.
    Max,
}

/// Root shape a type ultimately stores as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeBase {
    Int,
    Str,
    Bytes,
}

#[derive(Debug, Clone)]
pub struct TypeDef {
    pub name: String,
    pub subof: Option<String>,
    pub policy: TypePolicy,
}

#[derive(Debug, Clone)]
pub struct FormDef {
    pub name: String,
    pub ptype: String,
}

#[derive(Debug, Clone)]
pub struct PropDef {
    pub form: String,
    pub name: String,
    pub ptype: String,
}

/// Per-cortex registry of types, forms, and props. Each cortex
/// exclusively owns one.
pub struct TypeRegistry {
    types: HashMap<String, TypeDef>,
    forms: HashMap<String, FormDef>,
    /// Keyed by the full `form:prop` name.
    props: HashMap<String, PropDef>,
}

impl TypeRegistry {
    /// A registry seeded with the base types: `int`, `str`, `bytes`,
    /// and `time` (subof `int`).
    pub fn new() -> Self {
        let mut types = HashMap::new();
        for (name, subof) in [
            ("int", None),
            ("str", None),
            ("bytes", None),
            ("time", Some("int")),
        ] {
            types.insert(
                name.to_string(),
                TypeDef {
                    name: name.to_string(),
                    subof: subof.map(str::to_string),
                    policy: TypePolicy::Plain,
                },
            );
        }
        Self {
            types,
            forms: HashMap::new(),
            props: HashMap::new(),
        }
    }

    /// Register a type. An unknown base fails with `NoSuchType`.
    pub fn add_type(
        &mut self,
        name: &str,
        subof: Option<&str>,
        policy: TypePolicy,
    ) -> CortexResult<()> {
        if let Some(base) = subof {
            if base == name {
                return Err(CortexError::InvalidParam {
                    name: "subof".to_string(),
                    mesg: format!("type {name:?} may not derive from itself"),
                });
            }
            if !self.types.contains_key(base) {
                return Err(CortexError::NoSuchType {
                    name: base.to_string(),
                });
            }
        }
        self.types.insert(
            name.to_string(),
            TypeDef {
                name: name.to_string(),
                subof: subof.map(str::to_string),
                policy,
            },
        );
        Ok(())
    }

    /// Register a tufo form whose primary prop has type `ptype`.
    pub fn add_form(&mut self, name: &str, ptype: &str) -> CortexResult<()> {
        self.req_type(ptype)?;
        self.forms.insert(
            name.to_string(),
            FormDef {
                name: name.to_string(),
                ptype: ptype.to_string(),
            },
        );
        Ok(())
    }

    /// Register a prop on an existing form.
    pub fn add_prop(&mut self, form: &str, name: &str, ptype: &str) -> CortexResult<()> {
        if !self.forms.contains_key(form) {
            return Err(CortexError::NoSuchForm {
                form: form.to_string(),
            });
        }
        self.req_type(ptype)?;
        let full = format!("{form}:{name}");
        self.props.insert(
            full,
            PropDef {
                form: form.to_string(),
                name: name.to_string(),
                ptype: ptype.to_string(),
            },
        );
        Ok(())
    }

    pub fn form(&self, name: &str) -> Option<&FormDef> {
        self.forms.get(name)
    }

    pub fn prop(&self, full: &str) -> Option<&PropDef> {
        self.props.get(full)
    }

    fn req_type(&self, name: &str) -> CortexResult<()> {
        if !self.types.contains_key(name) {
            return Err(CortexError::NoSuchType {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Mutation policy for a full prop name. The first non-plain policy
    /// walking up the subof chain wins; undeclared props are plain.
    pub fn policy(&self, full_prop: &str) -> TypePolicy {
        let mut cur = self
            .props
            .get(full_prop)
            .and_then(|pd| self.types.get(&pd.ptype));
        for _ in 0..MAX_SUBOF_DEPTH {
            match cur {
                Some(td) if td.policy != TypePolicy::Plain => return td.policy,
                Some(td) => cur = td.subof.as_deref().and_then(|s| self.types.get(s)),
                None => break,
            }
        }
        TypePolicy::Plain
    }

    /// Root shape of a type, or `None` for custom roots (no coercion).
    pub fn base_of(&self, ptype: &str) -> Option<TypeBase> {
        let mut cur = self.types.get(ptype);
        for _ in 0..MAX_SUBOF_DEPTH {
            let td = cur?;
            match td.subof.as_deref() {
                Some(base) => cur = self.types.get(base),
                None => {
                    return match td.name.as_str() {
                        "int" => Some(TypeBase::Int),
                        "str" => Some(TypeBase::Str),
                        "bytes" => Some(TypeBase::Bytes),
                        _ => None,
                    }
                }
            }
        }
        None
    }

    /// Coerce a value to a prop's declared type. Undeclared props pass
    /// values through unchanged.
    pub fn frob(&self, full_prop: &str, valu: Valu) -> CortexResult<Valu> {
        match self.props.get(full_prop) {
            Some(pd) => self.frob_type(&pd.ptype, valu),
            None => Ok(valu),
        }
    }

    /// Coerce a value to a named type: int-based types accept ints or
    /// parseable strings, str-based types accept strings or render ints.
    pub fn frob_type(&self, ptype: &str, valu: Valu) -> CortexResult<Valu> {
        self.req_type(ptype)?;
        match self.base_of(ptype) {
            Some(TypeBase::Int) => match valu {
                Valu::Int(_) => Ok(valu),
                Valu::Str(text) => match parse_int(&text) {
                    Some(v) => Ok(Valu::Int(v)),
                    None => Err(CortexError::BadStorValu {
                        name: ptype.to_string(),
                        mesg: format!("{text:?} is not an integer"),
                    }),
                },
                other => Err(CortexError::BadStorValu {
                    name: ptype.to_string(),
                    mesg: format!("{other:?} is not an integer"),
                }),
            },
            Some(TypeBase::Str) => match valu {
                Valu::Str(_) => Ok(valu),
                Valu::Int(v) => Ok(Valu::Str(v.to_string())),
                other => Err(CortexError::BadStorValu {
                    name: ptype.to_string(),
                    mesg: format!("{other:?} is not a string"),
                }),
            },
            Some(TypeBase::Bytes) => match valu {
                Valu::Bytes(_) => Ok(valu),
                other => Err(CortexError::BadStorValu {
                    name: ptype.to_string(),
                    mesg: format!("{other:?} is not binary"),
                }),
            },
            None => Ok(valu),
        }
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Does the policy accept replacing `current` with `next`?
/// An absent current value accepts anything; equal values and
/// cross-variant comparisons are silent rejections.
pub fn ratchet(policy: TypePolicy, current: Option<&Valu>, next: &Valu) -> bool {
    let Some(cur) = current else {
        return true;
    };
    match policy {
        TypePolicy::Plain => true,
        TypePolicy::Min => matches!(next.cmp_same(cur), Some(Ordering::Less)),
        TypePolicy::Max => matches!(next.cmp_same(cur), Some(Ordering::Greater)),
    }
}
