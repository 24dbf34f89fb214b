//! Chat users and their roles.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{DeployError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Viewer,
    Developer,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub chat_id: String,
    pub display_name: String,
    /// Source-control login, used to request reviews.
    #[serde(default)]
    pub scm_login: Option<String>,
    #[serde(default)]
    pub scm_node_id: Option<String>,
    #[serde(default)]
    pub role: Role,
}

impl User {
    pub fn is_developer(&self) -> bool {
        self.role >= Role::Developer
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Default)]
pub struct UserDirectory {
    users: RwLock<HashMap<String, User>>,
}

impl UserDirectory {
    pub fn new(users: Vec<User>) -> Self {
        let directory = Self::default();
        directory.replace(users);
        directory
    }

    pub fn replace(&self, users: Vec<User>) {
        let map = users.into_iter().map(|u| (u.chat_id.clone(), u)).collect();
        *self.users.write().unwrap_or_else(PoisonError::into_inner) = map;
    }

    pub fn find(&self, chat_id: &str) -> Option<User> {
        self.users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(chat_id)
            .cloned()
    }

    /// The user behind `chat_id`, if they hold at least `role`.
    pub fn authorize(&self, chat_id: &str, role: Role) -> Result<User> {
        let user = self
            .find(chat_id)
            .ok_or_else(|| DeployError::UnknownUser(chat_id.to_string()))?;
        if user.role < role {
            return Err(DeployError::Forbidden(user.display_name));
        }
        Ok(user)
    }
}
