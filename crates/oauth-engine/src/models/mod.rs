//! Records persisted through the registries, plus the request-scoped values
//! (`UserInfo`, `Grant`) the engine passes between components.
//!
//! All persisted models serialize with `#[serde(rename_all = "camelCase")]`.

mod authorization;
mod client;
mod meta;
mod token;
mod user;

pub use authorization::{ClientAuthorization, authorization_name, split_authorization_name};
pub use client::{Client, GrantMethod};
pub use meta::{Object, ObjectMeta};
pub use token::{AccessToken, AuthorizeToken, TokenRecord};
pub use user::{Grant, UserInfo};
