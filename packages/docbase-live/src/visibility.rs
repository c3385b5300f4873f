//! Per-viewer read checks of object ACLs.

use std::collections::HashMap;
use std::sync::Arc;

use docbase_core::acl::Acl;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::session_token_cache::SessionTokenCache;

/// Identity a subscription sees objects with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Viewer {
    pub has_master_key: bool,
    /// Subscription token, or the connect token when the subscription has none
    pub session_token: Option<String>,
}

/// Role lookups shared by all checks of one change event.
///
/// Each user's roles are fetched at most once per event no matter how many
/// of their subscriptions see the object.
#[derive(Default)]
pub struct RoleMemo {
    users: Mutex<HashMap<String, Arc<OnceCell<Option<Vec<String>>>>>>,
}

impl RoleMemo {
    async fn roles(&self, sessions: &SessionTokenCache, user_id: &str) -> Option<Vec<String>> {
        let cell = self.users.lock().entry(user_id.to_string()).or_default().clone();
        cell.get_or_init(|| async {
            match sessions.resolver().roles_for_user(user_id).await {
                Ok(roles) => Some(roles),
                Err(e) => {
                    debug!("Role lookup for {} failed: {}", user_id, e);
                    None
                }
            }
        })
        .await
        .clone()
    }

    /// Number of distinct users looked up.
    pub fn len(&self) -> usize {
        self.users.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Whether `viewer` may read an object carrying `acl`.
///
/// Objects without an ACL, publicly readable objects and master viewers
/// pass immediately. Otherwise the viewer's session token is resolved and
/// checked against the user entry, then against role entries. Lookup
/// failures deny.
pub async fn can_read(
    acl: Option<&Acl>,
    viewer: &Viewer,
    sessions: &SessionTokenCache,
    roles: &RoleMemo,
) -> bool {
    let Some(acl) = acl else {
        return true;
    };
    if acl.get_public_read_access() || viewer.has_master_key {
        return true;
    }
    let Some(token) = viewer.session_token.as_deref() else {
        return false;
    };
    let user_id = match sessions.get_user_id(token).await {
        Ok(user_id) => user_id,
        Err(e) => {
            debug!("Denying read for an unresolved session token: {}", e);
            return false;
        }
    };
    if acl.get_read_access(&user_id) {
        return true;
    }
    if !acl.has_role_entries() {
        return false;
    }
    match roles.roles(sessions, &user_id).await {
        Some(user_roles) => user_roles.iter().any(|role| acl.get_read_access(role)),
        None => false,
    }
}
