use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::api::ApiClient;
use crate::auth::Role;
use crate::error::ClientResult;

/// The signed-in user's profile as reported by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub username: String,
    #[serde(default)]
    pub role: Option<Role>,
    /// Absolute image URL
    #[serde(default)]
    pub profile_image: Option<String>,
}

impl Profile {
    /// Where the console sends this user after signing in
    pub fn landing_route(&self) -> &'static str {
        self.role.map(|role| role.landing_route()).unwrap_or("/")
    }
}

/// Fetch the current user's profile. Relative image paths are resolved
/// against the backend origin.
pub async fn fetch_profile(api: &ApiClient) -> ClientResult<Profile> {
    let path = api.config().endpoints.profile.clone();
    let mut profile: Profile = api.get_json(&path).await?;

    profile.profile_image = match profile.profile_image.take() {
        Some(image) if image.is_empty() => None,
        Some(image) if image.starts_with("http://") || image.starts_with("https://") => {
            Some(image)
        }
        Some(image) => {
            let origin = api.config().origin()?;
            let separator = if image.starts_with('/') { "" } else { "/" };
            Some(format!("{origin}{separator}{image}"))
        }
        None => None,
    };

    debug!(username = %profile.username, role = ?profile.role, "Fetched profile");
    Ok(profile)
}
