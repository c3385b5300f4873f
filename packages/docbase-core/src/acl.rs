//! Object ACLs and their storage encoding.
//!
//! At the API boundary an ACL is a map `{subject: {read, write}}` where a
//! subject is a user id, `role:<name>` or `*`. Storage keeps two flat
//! permission lists, `_rperm` and `_wperm`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DbError, ErrorCode};
use crate::Document;

/// Subject granting access to everyone.
pub const PUBLIC: &str = "*";

/// Prefix for role subjects.
pub const ROLE_PREFIX: &str = "role:";

fn is_false(value: &bool) -> bool {
    !*value
}

/// Permissions granted to one subject.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclEntry {
    #[serde(default, skip_serializing_if = "is_false")]
    pub read: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub write: bool,
}

/// Per-object access control list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Acl {
    entries: BTreeMap<String, AclEntry>,
}

impl Acl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a REST-format ACL value.
    pub fn from_value(value: &Value) -> Result<Self, DbError> {
        serde_json::from_value(value.clone())
            .map_err(|e| DbError::new(ErrorCode::InvalidAcl, format!("Invalid ACL: {}", e)))
    }

    /// Builds an ACL back from storage permission lists. Non-string entries are skipped.
    pub fn from_permissions(rperm: &[Value], wperm: &[Value]) -> Self {
        let mut acl = Acl::new();
        for subject in rperm.iter().filter_map(Value::as_str) {
            acl.set_read_access(subject, true);
        }
        for subject in wperm.iter().filter_map(Value::as_str) {
            acl.set_write_access(subject, true);
        }
        acl
    }

    pub fn set_read_access(&mut self, subject: &str, allowed: bool) {
        self.entries.entry(subject.to_string()).or_default().read = allowed;
        self.prune(subject);
    }

    pub fn set_write_access(&mut self, subject: &str, allowed: bool) {
        self.entries.entry(subject.to_string()).or_default().write = allowed;
        self.prune(subject);
    }

    fn prune(&mut self, subject: &str) {
        if self.entries.get(subject) == Some(&AclEntry::default()) {
            self.entries.remove(subject);
        }
    }

    pub fn get_public_read_access(&self) -> bool {
        self.get_read_access(PUBLIC)
    }

    /// Read access for an exact subject. Public access is not implied.
    pub fn get_read_access(&self, subject: &str) -> bool {
        self.entries.get(subject).map(|e| e.read).unwrap_or(false)
    }

    pub fn get_write_access(&self, subject: &str) -> bool {
        self.entries.get(subject).map(|e| e.write).unwrap_or(false)
    }

    pub fn get_role_read_access(&self, role_name: &str) -> bool {
        self.get_read_access(&format!("{}{}", ROLE_PREFIX, role_name))
    }

    /// Returns true if any role subject appears in the ACL.
    pub fn has_role_entries(&self) -> bool {
        self.entries.keys().any(|k| k.starts_with(ROLE_PREFIX))
    }

    /// Returns the `(_rperm, _wperm)` storage lists.
    pub fn to_permissions(&self) -> (Vec<String>, Vec<String>) {
        let mut rperm = Vec::new();
        let mut wperm = Vec::new();
        for (subject, entry) in &self.entries {
            if entry.read {
                rperm.push(subject.clone());
            }
            if entry.write {
                wperm.push(subject.clone());
            }
        }
        (rperm, wperm)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Object(Default::default()))
    }
}

/// Replaces a REST `ACL` key with `_rperm`/`_wperm` lists.
pub fn transform_object_acl(object: &mut Document) -> Result<(), DbError> {
    let Some(value) = object.remove("ACL") else {
        return Ok(());
    };
    let acl = Acl::from_value(&value)?;
    let (rperm, wperm) = acl.to_permissions();
    object.insert("_rperm".to_string(), Value::from(rperm));
    object.insert("_wperm".to_string(), Value::from(wperm));
    Ok(())
}

/// Replaces `_rperm`/`_wperm` lists with a REST `ACL` key.
pub fn untransform_object_acl(object: &mut Document) {
    if !object.contains_key("_rperm") && !object.contains_key("_wperm") {
        return;
    }
    let rperm = take_list(object, "_rperm");
    let wperm = take_list(object, "_wperm");
    let acl = Acl::from_permissions(&rperm, &wperm);
    object.insert("ACL".to_string(), acl.to_value());
}

fn take_list(object: &mut Document, key: &str) -> Vec<Value> {
    match object.remove(key) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

/// Reads the ACL of a REST-format object, if it carries one.
pub fn object_acl(object: &Document) -> Option<Acl> {
    object.get("ACL").and_then(|v| Acl::from_value(v).ok())
}
