use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::emote::{Emote, EmoteSetEmote};

const SEVENTV_URL: &str = "https://7tv.io/v3";

#[derive(Deserialize, Debug, Default)]
struct EmoteSetRef {
    id: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct UserConnection {
    emote_set: Option<EmoteSetRef>,
}

#[derive(Deserialize, Debug, Default)]
struct SevenTvUser {
    id: Option<String>,
    emote_set: Option<EmoteSetRef>,
    emote_sets: Option<Vec<EmoteSetRef>>,
    connections: Option<Vec<UserConnection>>,
}

fn set_id(set: &EmoteSetRef) -> Option<&str> {
    set.id.as_deref().filter(|id| !id.is_empty())
}

impl SevenTvUser {
    /// Active emote set, from whichever of the three places 7TV put it.
    fn emote_set_id(&self) -> Option<&str> {
        if let Some(id) = self.emote_set.as_ref().and_then(set_id) {
            return Some(id);
        }
        if let Some(id) = self.emote_sets.iter().flatten().next().and_then(set_id) {
            return Some(id);
        }
        self.connections
            .iter()
            .flatten()
            .find_map(|c| c.emote_set.as_ref().and_then(set_id))
    }
}

/// `Ok(None)` when 7TV answers 404.
async fn seventv_request(client: &Client, path: &str) -> color_eyre::Result<Option<Value>> {
    let res = client.get(format!("{}/{}", SEVENTV_URL, path)).send().await?;
    debug!(path, status = %res.status(), "7TV response");

    if res.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if res.status().is_server_error() || res.status().is_client_error() {
        return Err(color_eyre::eyre::eyre!(
            "Error while sending request to 7TV: {} - {}",
            res.status(),
            res.text().await?
        ));
    }

    Ok(Some(res.json::<Value>().await?))
}

fn parse_emotes(list: Value) -> color_eyre::Result<Vec<Emote>> {
    let raw = serde_json::from_value::<Vec<EmoteSetEmote>>(list)?;
    Ok(raw.into_iter().filter_map(EmoteSetEmote::into_emote).collect())
}

/// Emote list out of an emote set body; older responses were a bare array.
fn emotes_from_set(body: Value) -> color_eyre::Result<Vec<Emote>> {
    match body {
        Value::Array(_) => parse_emotes(body),
        Value::Object(mut fields) => match fields.remove("emotes") {
            Some(list @ Value::Array(_)) => parse_emotes(list),
            _ => Ok(vec![]),
        },
        _ => Ok(vec![]),
    }
}

async fn get_user(
    client: &Client,
    login: &str,
    twitch_id: Option<&str>,
) -> color_eyre::Result<Option<Value>> {
    if let Some(id) = twitch_id {
        match seventv_request(client, &format!("users/twitch/{}", id)).await {
            Ok(Some(user)) => return Ok(Some(user)),
            Ok(None) => debug!(twitch_id = id, "7TV lookup by id missed, trying login"),
            Err(e) => debug!(twitch_id = id, error = %e, "7TV lookup by id failed, trying login"),
        }
    }
    seventv_request(client, &format!("users/twitch/{}", login)).await
}

/// Emotes active in a Twitch channel's 7TV emote set.
///
/// An empty list means the channel exists but nothing usable was found;
/// transport and decode failures are errors.
pub async fn get_channel_emotes(
    client: &Client,
    channel: &str,
    twitch_id: Option<&str>,
) -> color_eyre::Result<Vec<Emote>> {
    let login = channel.to_lowercase();

    let user = match get_user(client, &login, twitch_id).await? {
        Some(user) => serde_json::from_value::<SevenTvUser>(user)?,
        None => {
            warn!(
                channel = %login,
                "channel not found on 7TV, check https://7tv.io/users/{}", login
            );
            return Ok(vec![]);
        }
    };

    let set_id = user.emote_set_id();

    if set_id.is_none() {
        if let Some(user_id) = user.id.as_deref() {
            match seventv_request(client, &format!("users/{}/emotes", user_id)).await {
                Ok(Some(list @ Value::Array(_))) => {
                    let emotes = parse_emotes(list)?;
                    if !emotes.is_empty() {
                        debug!(channel = %login, count = emotes.len(), "loaded emotes from user listing");
                        return Ok(emotes);
                    }
                }
                Ok(_) => {}
                Err(e) => debug!(channel = %login, error = %e, "user emote listing failed"),
            }
        }
    }

    match set_id {
        Some(set_id) => match seventv_request(client, &format!("emote-sets/{}", set_id)).await? {
            Some(body) => emotes_from_set(body),
            None => Ok(vec![]),
        },
        None => Ok(vec![]),
    }
}
