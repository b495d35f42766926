use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error};

const HELIX_URL: &str = "https://api.twitch.tv/helix";

#[derive(Deserialize, Debug, Default)]
struct HelixPage {
    #[serde(default)]
    data: Vec<Value>,
}

/// Twitch Helix lookups used to decide when the bot should be in chat.
///
/// Every call tries the user token first and falls back to the bare
/// `Client-ID`, which Helix still accepts for public reads.
#[derive(Clone)]
pub struct Helix {
    client: Client,
    client_id: String,
    token: String,
}

impl Helix {
    pub fn new(client: Client, client_id: &str, oauth: &str) -> Self {
        Self {
            client,
            client_id: client_id.to_owned(),
            token: bearer_token(oauth).to_owned(),
        }
    }

    async fn request(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
        with_token: bool,
    ) -> color_eyre::Result<HelixPage> {
        let mut req = self
            .client
            .get(format!("{}/{}", HELIX_URL, endpoint))
            .query(query)
            .header("Client-ID", &self.client_id);
        if with_token {
            req = req.bearer_auth(&self.token);
        }

        let res = req.send().await?.error_for_status()?;
        Ok(res.json::<HelixPage>().await?)
    }

    async fn get(&self, endpoint: &str, query: &[(&str, &str)]) -> color_eyre::Result<HelixPage> {
        match self.request(endpoint, query, true).await {
            Ok(page) => Ok(page),
            Err(e) => {
                debug!(endpoint, error = %e, "helix request with token failed, retrying with client id");
                self.request(endpoint, query, false).await
            }
        }
    }

    /// Unknown counts as offline.
    pub async fn is_live(&self, channel: &str) -> bool {
        let login = channel.to_lowercase();
        match self.get("streams", &[("user_login", login.as_str())]).await {
            Ok(page) => {
                debug!(channel = %login, streams = page.data.len(), "stream check");
                !page.data.is_empty()
            }
            Err(e) => {
                error!(channel = %login, error = %e, "error checking stream status");
                false
            }
        }
    }

    pub async fn user_id(&self, login: &str) -> Option<String> {
        let login = login.to_lowercase();
        match self.get("users", &[("login", login.as_str())]).await {
            Ok(page) => first_id(&page),
            Err(e) => {
                debug!(login = %login, error = %e, "could not fetch twitch user id");
                None
            }
        }
    }
}

fn bearer_token(oauth: &str) -> &str {
    oauth.strip_prefix("oauth:").unwrap_or(oauth)
}

fn first_id(page: &HelixPage) -> Option<String> {
    page.data
        .first()
        .and_then(|user| user["id"].as_str())
        .map(str::to_owned)
}
