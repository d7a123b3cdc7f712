use bitflags::bitflags;
use serde::{
    de::{Deserialize, Deserializer},
    ser::{Serialize, Serializer},
};

bitflags! {
    /// Event categories a gateway session subscribes to via IDENTIFY.
    ///
    /// Some intents gate "privileged" event categories that must also be
    /// enabled for the application in the developer portal; sending them
    /// without that approval closes the connection with
    /// [`CloseCode::DISALLOWED_INTENTS`](crate::CloseCode::DISALLOWED_INTENTS).
    pub struct Intents: u64 {
        /// Guild create/update/delete/role/channel events.
        const GUILDS = 1;
        /// Guild member add/update/remove. Privileged.
        const GUILD_MEMBERS = 1 << 1;
        /// Guild ban add/remove.
        const GUILD_MODERATION = 1 << 2;
        /// Guild emoji/sticker update.
        const GUILD_EMOJIS_AND_STICKERS = 1 << 3;
        /// Guild integration update.
        const GUILD_INTEGRATIONS = 1 << 4;
        /// Guild webhooks update.
        const GUILD_WEBHOOKS = 1 << 5;
        /// Guild invite create/delete.
        const GUILD_INVITES = 1 << 6;
        /// Guild voice state update.
        const GUILD_VOICE_STATES = 1 << 7;
        /// Guild presence update. Privileged.
        const GUILD_PRESENCES = 1 << 8;
        /// Guild message create/update/delete.
        const GUILD_MESSAGES = 1 << 9;
        /// Guild message reaction add/remove.
        const GUILD_MESSAGE_REACTIONS = 1 << 10;
        /// Guild typing start.
        const GUILD_MESSAGE_TYPING = 1 << 11;
        /// Direct message create/update/delete.
        const DIRECT_MESSAGES = 1 << 12;
        /// Direct message reaction add/remove.
        const DIRECT_MESSAGE_REACTIONS = 1 << 13;
        /// Direct message typing start.
        const DIRECT_MESSAGE_TYPING = 1 << 14;
        /// Message content is included on message events. Privileged.
        const MESSAGE_CONTENT = 1 << 15;
        /// Guild scheduled event create/update/delete.
        const GUILD_SCHEDULED_EVENTS = 1 << 16;
        /// Guild auto moderation rule create/update/delete.
        const AUTO_MODERATION_CONFIGURATION = 1 << 20;
        /// Guild auto moderation action execution.
        const AUTO_MODERATION_EXECUTION = 1 << 21;
    }
}

impl Default for Intents {
    fn default() -> Self {
        Intents::empty()
    }
}

// Discord sends and expects intents on the wire as a plain integer, so this
// bypasses bitflags's default struct shape and (de)serializes the bits
// directly, truncating unknown bits on the way in.
impl Serialize for Intents {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.bits())
    }
}

impl<'de> Deserialize<'de> for Intents {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u64::deserialize(deserializer)?;

        Ok(Intents::from_bits_truncate(bits))
    }
}

#[cfg(test)]
mod tests {
    use super::Intents;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Intents: Clone, Copy, Send, Sync);

    #[test]
    fn privileged_intents_are_distinct_bits() {
        let privileged =
            Intents::GUILD_MEMBERS | Intents::GUILD_PRESENCES | Intents::MESSAGE_CONTENT;

        assert!(privileged.contains(Intents::GUILD_MEMBERS));
        assert!(!privileged.contains(Intents::GUILDS));
    }

    #[test]
    fn serializes_as_integer() {
        let intents = Intents::GUILDS | Intents::GUILD_MESSAGES;
        let value = serde_json::to_value(intents).unwrap();

        assert_eq!(serde_json::json!(1 | (1 << 9)), value);
    }
}
