//! Bitmask selecting which dispatch event categories a shard cares about.

use bitflags::bitflags;

bitflags! {
    /// A set of bitflags specifying which dispatch event categories should
    /// be processed.
    ///
    /// Gating on this lets a caller skip the cost of deserializing and
    /// dispatching event categories it never subscribes to, e.g. a bot that
    /// never reads presences can exclude [`Self::PRESENCE_UPDATE`].
    pub struct EventTypeFlags: u64 {
        /// `CHANNEL_CREATE`.
        const CHANNEL_CREATE = 1;
        /// `CHANNEL_DELETE`.
        const CHANNEL_DELETE = 1 << 1;
        /// `CHANNEL_PINS_UPDATE`.
        const CHANNEL_PINS_UPDATE = 1 << 2;
        /// `CHANNEL_UPDATE`.
        const CHANNEL_UPDATE = 1 << 3;
        /// `GUILD_BAN_ADD`.
        const GUILD_BAN_ADD = 1 << 4;
        /// `GUILD_BAN_REMOVE`.
        const GUILD_BAN_REMOVE = 1 << 5;
        /// `GUILD_CREATE`.
        const GUILD_CREATE = 1 << 6;
        /// `GUILD_DELETE`.
        const GUILD_DELETE = 1 << 7;
        /// `GUILD_EMOJIS_UPDATE`.
        const GUILD_EMOJIS_UPDATE = 1 << 8;
        /// `GUILD_INTEGRATIONS_UPDATE`.
        const GUILD_INTEGRATIONS_UPDATE = 1 << 9;
        /// `GUILD_MEMBER_ADD`.
        const GUILD_MEMBER_ADD = 1 << 10;
        /// `GUILD_MEMBER_REMOVE`.
        const GUILD_MEMBER_REMOVE = 1 << 11;
        /// `GUILD_MEMBER_UPDATE`.
        const GUILD_MEMBER_UPDATE = 1 << 12;
        /// `GUILD_MEMBERS_CHUNK`.
        const GUILD_MEMBERS_CHUNK = 1 << 13;
        /// `GUILD_ROLE_CREATE`.
        const GUILD_ROLE_CREATE = 1 << 14;
        /// `GUILD_ROLE_DELETE`.
        const GUILD_ROLE_DELETE = 1 << 15;
        /// `GUILD_ROLE_UPDATE`.
        const GUILD_ROLE_UPDATE = 1 << 16;
        /// `GUILD_UPDATE`.
        const GUILD_UPDATE = 1 << 17;
        /// `INVITE_CREATE`.
        const INVITE_CREATE = 1 << 18;
        /// `INVITE_DELETE`.
        const INVITE_DELETE = 1 << 19;
        /// `MESSAGE_CREATE`.
        const MESSAGE_CREATE = 1 << 20;
        /// `MESSAGE_DELETE`.
        const MESSAGE_DELETE = 1 << 21;
        /// `MESSAGE_DELETE_BULK`.
        const MESSAGE_DELETE_BULK = 1 << 22;
        /// `MESSAGE_REACTION_ADD`.
        const MESSAGE_REACTION_ADD = 1 << 23;
        /// `MESSAGE_REACTION_REMOVE`.
        const MESSAGE_REACTION_REMOVE = 1 << 24;
        /// `MESSAGE_REACTION_REMOVE_ALL`.
        const MESSAGE_REACTION_REMOVE_ALL = 1 << 25;
        /// `MESSAGE_REACTION_REMOVE_EMOJI`.
        const MESSAGE_REACTION_REMOVE_EMOJI = 1 << 26;
        /// `MESSAGE_UPDATE`.
        const MESSAGE_UPDATE = 1 << 27;
        /// `PRESENCE_UPDATE`. Privileged.
        const PRESENCE_UPDATE = 1 << 28;
        /// `READY`.
        const READY = 1 << 29;
        /// `RESUMED`.
        const RESUMED = 1 << 30;
        /// `TYPING_START`.
        const TYPING_START = 1 << 31;
        /// `USER_UPDATE`.
        const USER_UPDATE = 1 << 32;
        /// `VOICE_SERVER_UPDATE`.
        const VOICE_SERVER_UPDATE = 1 << 33;
        /// `VOICE_STATE_UPDATE`.
        const VOICE_STATE_UPDATE = 1 << 34;
        /// `WEBHOOKS_UPDATE`.
        const WEBHOOKS_UPDATE = 1 << 35;
    }
}

impl EventTypeFlags {
    /// Map a raw `t` field to the flag it's gated by, if recognized.
    ///
    /// `READY` and `RESUMED` are session-lifecycle events the session state
    /// machine always needs internally (to learn the session id and
    /// `resume_gateway_url`), so those two are dispatched to the caller
    /// unconditionally by [`Self::always`] regardless of this mapping.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "CHANNEL_CREATE" => Self::CHANNEL_CREATE,
            "CHANNEL_DELETE" => Self::CHANNEL_DELETE,
            "CHANNEL_PINS_UPDATE" => Self::CHANNEL_PINS_UPDATE,
            "CHANNEL_UPDATE" => Self::CHANNEL_UPDATE,
            "GUILD_BAN_ADD" => Self::GUILD_BAN_ADD,
            "GUILD_BAN_REMOVE" => Self::GUILD_BAN_REMOVE,
            "GUILD_CREATE" => Self::GUILD_CREATE,
            "GUILD_DELETE" => Self::GUILD_DELETE,
            "GUILD_EMOJIS_UPDATE" => Self::GUILD_EMOJIS_UPDATE,
            "GUILD_INTEGRATIONS_UPDATE" => Self::GUILD_INTEGRATIONS_UPDATE,
            "GUILD_MEMBER_ADD" => Self::GUILD_MEMBER_ADD,
            "GUILD_MEMBER_REMOVE" => Self::GUILD_MEMBER_REMOVE,
            "GUILD_MEMBER_UPDATE" => Self::GUILD_MEMBER_UPDATE,
            "GUILD_MEMBERS_CHUNK" => Self::GUILD_MEMBERS_CHUNK,
            "GUILD_ROLE_CREATE" => Self::GUILD_ROLE_CREATE,
            "GUILD_ROLE_DELETE" => Self::GUILD_ROLE_DELETE,
            "GUILD_ROLE_UPDATE" => Self::GUILD_ROLE_UPDATE,
            "GUILD_UPDATE" => Self::GUILD_UPDATE,
            "INVITE_CREATE" => Self::INVITE_CREATE,
            "INVITE_DELETE" => Self::INVITE_DELETE,
            "MESSAGE_CREATE" => Self::MESSAGE_CREATE,
            "MESSAGE_DELETE" => Self::MESSAGE_DELETE,
            "MESSAGE_DELETE_BULK" => Self::MESSAGE_DELETE_BULK,
            "MESSAGE_REACTION_ADD" => Self::MESSAGE_REACTION_ADD,
            "MESSAGE_REACTION_REMOVE" => Self::MESSAGE_REACTION_REMOVE,
            "MESSAGE_REACTION_REMOVE_ALL" => Self::MESSAGE_REACTION_REMOVE_ALL,
            "MESSAGE_REACTION_REMOVE_EMOJI" => Self::MESSAGE_REACTION_REMOVE_EMOJI,
            "MESSAGE_UPDATE" => Self::MESSAGE_UPDATE,
            "PRESENCE_UPDATE" => Self::PRESENCE_UPDATE,
            "READY" => Self::READY,
            "RESUMED" => Self::RESUMED,
            "TYPING_START" => Self::TYPING_START,
            "USER_UPDATE" => Self::USER_UPDATE,
            "VOICE_SERVER_UPDATE" => Self::VOICE_SERVER_UPDATE,
            "VOICE_STATE_UPDATE" => Self::VOICE_STATE_UPDATE,
            "WEBHOOKS_UPDATE" => Self::WEBHOOKS_UPDATE,
            _ => return None,
        })
    }
}

impl Default for EventTypeFlags {
    fn default() -> Self {
        Self::all()
    }
}

#[cfg(test)]
mod tests {
    use super::EventTypeFlags;
    use static_assertions::assert_impl_all;

    assert_impl_all!(EventTypeFlags: Clone, Copy, Send, Sync);

    #[test]
    fn default_subscribes_to_everything() {
        assert_eq!(EventTypeFlags::all(), EventTypeFlags::default());
    }

    #[test]
    fn from_name_maps_known_dispatch_events() {
        assert_eq!(
            Some(EventTypeFlags::MESSAGE_CREATE),
            EventTypeFlags::from_name("MESSAGE_CREATE")
        );
        assert_eq!(
            Some(EventTypeFlags::READY),
            EventTypeFlags::from_name("READY")
        );
    }

    #[test]
    fn from_name_rejects_unknown_events() {
        assert_eq!(None, EventTypeFlags::from_name("SOME_FUTURE_EVENT"));
    }
}
