//! Address (JID) helpers.
//!
//! A JID looks like `5511987654321@s.whatsapp.net`, optionally with a device
//! part (`5511987654321:12@s.whatsapp.net`). The server suffix tells us what
//! kind of chat the address belongs to.

/// Suffix of a group chat.
pub const GROUP_SUFFIX: &str = "@g.us";

/// Suffix of a linked-device identity (hidden phone number).
pub const LINKED_DEVICE_SUFFIX: &str = "@lid";

/// Suffix of a channel/newsletter identity.
pub const NEWSLETTER_SUFFIX: &str = "@newsletter";

/// The status-updates pseudo chat.
pub const STATUS_BROADCAST: &str = "status@broadcast";

/// Marker present in every broadcast-list address.
pub const BROADCAST_MARKER: &str = "@broadcast";

/// Whether the address is the status chat or any broadcast list.
pub fn is_broadcast(jid: &str) -> bool {
    jid == STATUS_BROADCAST || jid.contains(BROADCAST_MARKER)
}

/// Whether the address belongs to a group chat.
pub fn is_group(jid: &str) -> bool {
    jid.ends_with(GROUP_SUFFIX)
}

/// Whether the address is relayed through a linked-device or newsletter
/// identity rather than a direct user address.
pub fn is_indirect(jid: &str) -> bool {
    jid.ends_with(LINKED_DEVICE_SUFFIX) || jid.ends_with(NEWSLETTER_SUFFIX)
}

/// The user part of an address: everything before `@`, without a `:device`
/// qualifier.
pub fn user_part(jid: &str) -> &str {
    let user = jid.split_once('@').map_or(jid, |(user, _)| user);
    user.split_once(':').map_or(user, |(user, _)| user)
}
