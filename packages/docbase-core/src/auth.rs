//! Caller identity: session tokens, users and roles.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::debug;

use crate::acl::{PUBLIC, ROLE_PREFIX};
use crate::database::{Access, DatabaseController, FindOptions};
use crate::error::{DbError, ErrorCode};
use crate::Query;

/// Identity of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Auth {
    pub is_master: bool,
    pub user_id: Option<String>,
    /// Role subjects, `role:<name>`
    pub user_roles: Vec<String>,
}

impl Auth {
    pub fn master() -> Self {
        Self {
            is_master: true,
            ..Default::default()
        }
    }

    pub fn nobody() -> Self {
        Self::default()
    }

    pub fn user(user_id: impl Into<String>, user_roles: Vec<String>) -> Self {
        Self {
            is_master: false,
            user_id: Some(user_id.into()),
            user_roles,
        }
    }

    /// `*`, then the user id, then the roles.
    pub fn acl_group(&self) -> Vec<String> {
        let mut group = vec![PUBLIC.to_string()];
        group.extend(self.user_id.iter().cloned());
        group.extend(self.user_roles.iter().cloned());
        group
    }

    pub fn access(&self) -> Access {
        if self.is_master {
            Access::Master
        } else {
            Access::Group(self.acl_group())
        }
    }
}

/// Resolves session tokens and role membership.
#[async_trait]
pub trait AuthResolver: Send + Sync {
    /// Returns the user id owning a session token.
    ///
    /// Fails with `INVALID_SESSION_TOKEN` for unknown or expired tokens.
    async fn user_for_session_token(&self, session_token: &str) -> Result<String, DbError>;

    /// Returns every role of a user as `role:<name>`, inherited roles included.
    async fn roles_for_user(&self, user_id: &str) -> Result<Vec<String>, DbError>;

    /// Builds the identity of a request carrying an optional session token.
    async fn resolve(&self, session_token: Option<&str>) -> Result<Auth, DbError> {
        let Some(token) = session_token else {
            return Ok(Auth::nobody());
        };
        let user_id = self.user_for_session_token(token).await?;
        let roles = self.roles_for_user(&user_id).await?;
        Ok(Auth::user(user_id, roles))
    }
}

/// Resolver backed by the `_Session` and `_Role` classes.
#[derive(Clone)]
pub struct DatabaseAuth {
    database: DatabaseController,
}

fn invalid_session_token(message: &str) -> DbError {
    DbError::new(ErrorCode::InvalidSessionToken, message)
}

fn is_expired(session: &Query) -> bool {
    let iso = match session.get("expiresAt") {
        Some(Value::String(iso)) => Some(iso.as_str()),
        Some(value) => value.get("iso").and_then(Value::as_str),
        None => None,
    };
    iso.and_then(|iso| DateTime::parse_from_rfc3339(iso).ok())
        .map(|expires| expires.with_timezone(&Utc) < Utc::now())
        .unwrap_or(false)
}

fn role_pointers(ids: &[String]) -> Value {
    Value::Array(
        ids.iter()
            .map(|id| json!({"__type": "Pointer", "className": "_Role", "objectId": id}))
            .collect(),
    )
}

impl DatabaseAuth {
    pub fn new(database: DatabaseController) -> Self {
        Self { database }
    }

    async fn find_roles(&self, query: Query) -> Result<Vec<(String, String)>, DbError> {
        let options = FindOptions {
            keys: Some(vec!["name".to_string()]),
            ..Default::default()
        };
        let roles = self
            .database
            .find("_Role", &query, &Access::Master, options)
            .await?;
        Ok(roles
            .iter()
            .filter_map(|role| {
                let id = role.get("objectId").and_then(Value::as_str)?;
                let name = role.get("name").and_then(Value::as_str)?;
                Some((id.to_string(), name.to_string()))
            })
            .collect())
    }
}

#[async_trait]
impl AuthResolver for DatabaseAuth {
    async fn user_for_session_token(&self, session_token: &str) -> Result<String, DbError> {
        let mut query = Query::new();
        query.insert("sessionToken".to_string(), json!(session_token));
        let options = FindOptions {
            limit: Some(1),
            ..Default::default()
        };
        let sessions = self
            .database
            .find("_Session", &query, &Access::Master, options)
            .await?;
        let Some(session) = sessions.into_iter().next() else {
            return Err(invalid_session_token("Invalid session token"));
        };
        if is_expired(&session) {
            return Err(invalid_session_token("Session token is expired."));
        }
        session
            .get("user")
            .and_then(|user| user.get("objectId"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| invalid_session_token("Invalid session token"))
    }

    /// Direct roles come from `_Role.users`; parents are found by walking
    /// `_Role.roles` upwards until no new role appears.
    async fn roles_for_user(&self, user_id: &str) -> Result<Vec<String>, DbError> {
        let mut query = Query::new();
        query.insert(
            "users".to_string(),
            json!({"$in": [{"__type": "Pointer", "className": "_User", "objectId": user_id}]}),
        );
        let mut found = self.find_roles(query).await?;
        let mut seen: HashSet<String> = found.iter().map(|(id, _)| id.clone()).collect();
        let mut frontier: Vec<String> = seen.iter().cloned().collect();

        while !frontier.is_empty() {
            let mut query = Query::new();
            query.insert("roles".to_string(), json!({"$in": role_pointers(&frontier)}));
            let parents = self.find_roles(query).await?;
            frontier = parents
                .iter()
                .filter(|(id, _)| seen.insert(id.clone()))
                .map(|(id, _)| id.clone())
                .collect();
            found.extend(parents.into_iter().filter(|(id, _)| frontier.contains(id)));
        }

        debug!("Resolved {} roles for user {}", found.len(), user_id);
        Ok(found
            .into_iter()
            .map(|(_, name)| format!("{}{}", ROLE_PREFIX, name))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::cache::InMemorySchemaCache;
    use crate::schema::SchemaController;
    use crate::storage::{MemoryStorageAdapter, StorageAdapter};
    use serde_json::Map;
    use std::sync::Arc;
    use std::time::Duration;

    fn doc(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn database() -> DatabaseController {
        let adapter: Arc<dyn StorageAdapter> = Arc::new(MemoryStorageAdapter::new());
        let cache = Arc::new(InMemorySchemaCache::new(Duration::from_secs(5)));
        DatabaseController::new(Arc::clone(&adapter), SchemaController::new(adapter, cache))
    }

    fn pointer(class_name: &str, id: &str) -> Value {
        json!({"__type": "Pointer", "className": class_name, "objectId": id})
    }

    #[test]
    fn test_acl_group_and_access() {
        let auth = Auth::user("u1", vec!["role:admin".to_string()]);
        assert_eq!(auth.acl_group(), vec!["*", "u1", "role:admin"]);
        assert_eq!(Auth::nobody().access(), Access::public());
        assert!(Auth::master().access().is_master());
    }

    #[tokio::test]
    async fn test_session_token_resolution() {
        let db = database();
        db.create(
            "_Session",
            doc(json!({"sessionToken": "r:live", "user": pointer("_User", "u1")})),
            &Access::Master,
        )
        .await
        .unwrap();
        db.create(
            "_Session",
            doc(json!({
                "sessionToken": "r:old",
                "user": pointer("_User", "u2"),
                "expiresAt": {"__type": "Date", "iso": "2001-01-01T00:00:00.000Z"}
            })),
            &Access::Master,
        )
        .await
        .unwrap();

        let resolver = DatabaseAuth::new(db);
        assert_eq!(resolver.user_for_session_token("r:live").await.unwrap(), "u1");
        let err = resolver.user_for_session_token("r:old").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidSessionToken);
        assert_eq!(err.message, "Session token is expired.");
        let err = resolver.user_for_session_token("r:none").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidSessionToken);

        assert_eq!(resolver.resolve(None).await.unwrap(), Auth::nobody());
    }

    #[tokio::test]
    async fn test_roles_include_parents() {
        let db = database();
        db.create(
            "_Role",
            doc(json!({
                "objectId": "editors",
                "name": "editor",
                "ACL": {"*": {"read": true}},
                "users": {"__op": "AddRelation", "objects": [pointer("_User", "u1")]}
            })),
            &Access::Master,
        )
        .await
        .unwrap();
        db.create(
            "_Role",
            doc(json!({
                "objectId": "staff",
                "name": "staff",
                "ACL": {"*": {"read": true}},
                "roles": {"__op": "AddRelation", "objects": [pointer("_Role", "editors")]}
            })),
            &Access::Master,
        )
        .await
        .unwrap();
        db.create(
            "_Role",
            doc(json!({"objectId": "others", "name": "other", "ACL": {"*": {"read": true}}})),
            &Access::Master,
        )
        .await
        .unwrap();

        let resolver = DatabaseAuth::new(db);
        let mut roles = resolver.roles_for_user("u1").await.unwrap();
        roles.sort();
        assert_eq!(roles, vec!["role:editor", "role:staff"]);
        assert!(resolver.roles_for_user("u2").await.unwrap().is_empty());
    }
}
