use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Emote {
    pub id: String,
    pub name: String,
    pub animated: bool,
}

impl Emote {
    #[cfg(test)]
    pub fn new(name: impl Into<String>, id: impl Into<String>, animated: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            animated,
        }
    }

    pub fn cdn_url(&self) -> String {
        let extension = if self.animated { "gif" } else { "png" };
        format!("https://cdn.7tv.app/emote/{}/2x.{}", self.id, extension)
    }
}

/// Case-folded emote name, used to key usage tracking.
///
/// Only constructible from a resolved [`Emote`], so every key handed to the
/// usage tracker names an emote the matcher actually found.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EmoteKey(String);

impl EmoteKey {
    pub fn of(emote: &Emote) -> Self {
        Self(emote.name.to_lowercase())
    }
}

impl std::fmt::Display for EmoteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct EmoteData {
    pub id: Option<String>,
    pub name: Option<String>,
    pub animated: Option<bool>,
}

/// An emote as it appears inside a 7TV emote set or user emote listing.
///
/// 7TV has shipped several shapes for this over time, so every field is
/// optional and the nested `data` object fills in whatever the outer one lacks.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct EmoteSetEmote {
    pub id: Option<String>,
    pub name: Option<String>,
    pub animated: Option<bool>,
    pub data: Option<EmoteData>,
}

impl EmoteSetEmote {
    pub fn into_emote(self) -> Option<Emote> {
        let data = self.data.unwrap_or_default();
        let name = self.name.or(data.name).filter(|n| !n.is_empty())?;
        let id = self.id.or(data.id).unwrap_or_default();
        let animated = data.animated.unwrap_or(false) || self.animated.unwrap_or(false);
        Some(Emote { id, name, animated })
    }
}
