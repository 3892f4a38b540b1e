pub mod android_management;
pub mod auth;
pub mod error;
#[cfg(test)]
pub(crate) mod fake;

pub use android_management::AndroidManagementClient;
pub use auth::{AccessTokenSource, ServiceAccountKey, ServiceAccountTokenSource, StaticTokenSource};
pub use error::GoogleApiError;
