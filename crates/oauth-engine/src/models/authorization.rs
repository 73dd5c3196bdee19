//! A user's standing consent for a client.

use serde::{Deserialize, Serialize};

use super::meta::{Object, ObjectMeta};
use crate::error::{EngineError, EngineResult};

const SEPARATOR: char = ':';

/// Record name for `(userName, clientName)`: `"{user}:{client}"`.
///
/// Neither part may be empty or contain the separator, so the name can always
/// be split back into its parts.
pub fn authorization_name(user_name: &str, client_name: &str) -> EngineResult<String> {
    for (field, value) in [("user_name", user_name), ("client_name", client_name)] {
        if value.is_empty() {
            return Err(EngineError::invalid_input(field, "cannot be empty"));
        }
        if value.contains(SEPARATOR) {
            return Err(EngineError::invalid_input(field, format!("cannot contain '{SEPARATOR}'")));
        }
    }
    Ok(format!("{user_name}{SEPARATOR}{client_name}"))
}

/// Reverse of [`authorization_name`].
pub fn split_authorization_name(name: &str) -> EngineResult<(String, String)> {
    let mut parts = name.split(SEPARATOR);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(user), Some(client), None) if !user.is_empty() && !client.is_empty() => {
            Ok((user.to_owned(), client.to_owned()))
        }
        _ => Err(EngineError::invalid_input(
            "name",
            format!("must be in the format <userName>{SEPARATOR}<clientName>"),
        )),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientAuthorization {
    pub metadata: ObjectMeta,
    pub user_name: String,
    #[serde(rename = "userUID")]
    pub user_uid: String,
    pub client_name: String,
    /// Sorted and de-duplicated.
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl ClientAuthorization {
    pub fn new(
        user_name: &str,
        user_uid: &str,
        client_name: &str,
        scopes: Vec<String>,
    ) -> EngineResult<Self> {
        Ok(Self {
            metadata: ObjectMeta::named(authorization_name(user_name, client_name)?),
            user_name: user_name.to_owned(),
            user_uid: user_uid.to_owned(),
            client_name: client_name.to_owned(),
            scopes: crate::scope::add::<String, String>(&[], &scopes),
        })
    }
}

impl Object for ClientAuthorization {
    const KIND: &'static str = "clientauthorization";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn field(&self, key: &str) -> Option<&str> {
        match key {
            "userName" => Some(&self.user_name),
            "clientName" => Some(&self.client_name),
            "userUID" => Some(&self.user_uid),
            _ => None,
        }
    }
}
