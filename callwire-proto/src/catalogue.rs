//! Action names, field keys and result codes shared by both peers.
//!
//! The core never validates action-specific fields; these constants exist so
//! consumers and providers spell them the same way.

/// Protocol version stamped on every outgoing envelope.
pub const API_VERSION: i32 = 1;

/// Action identifiers.
pub mod action {
    /// Lists every API version the provider supports.
    ///
    /// Returns `supported_versions` (int array).
    pub const GET_SUPPORTED_VERSIONS: &str = "callwire.action.GET_SUPPORTED_VERSIONS";

    /// No-op that surfaces the permission dialog if the caller lacks access.
    pub const CHECK_PERMISSION: &str = "callwire.action.CHECK_PERMISSION";

    /// Sends one raw XML element from `account_jid`.
    ///
    /// Requires `account_jid` and `raw_xml`.
    pub const SEND_RAW_XML: &str = "callwire.action.SEND_RAW_XML";

    /// Registers a callback for events matching an account and optional
    /// peer domain/local part.
    ///
    /// Requires `account_jid`; optional `jid_domain`, `jid_local_part`
    /// (the latter only together with the domain). Returns `registration_id`.
    pub const REGISTER_PLUGIN_CALLBACK: &str = "callwire.action.REGISTER_PLUGIN_CALLBACK";

    /// Removes a registration created by [`REGISTER_PLUGIN_CALLBACK`].
    ///
    /// Requires `registration_id`.
    pub const UNREGISTER_PLUGIN_CALLBACK: &str = "callwire.action.UNREGISTER_PLUGIN_CALLBACK";

    /// Asks the provider (possibly via user selection) for an account.
    ///
    /// Optional `account_jid`; returns `account_jid`.
    pub const GET_ACCOUNT_JID: &str = "callwire.action.GET_ACCOUNT_JID";

    /// Pushed into callbacks when a message arrives.
    ///
    /// Carries `account_jid`, `message_from`, `message_to`, `message_body`,
    /// `message_status`.
    pub const NEW_MESSAGE: &str = "callwire.action.NEW_MESSAGE";

    /// Pushed into callbacks with the response to a `SEND_RAW_XML` IQ.
    ///
    /// Carries `account_jid` and `raw_xml`.
    pub const IQ_RESPONSE: &str = "callwire.action.IQ_RESPONSE";
}

/// Envelope field keys.
pub mod extra {
    /// Sender's protocol version (always present).
    pub const API_VERSION: &str = "api_version";
    /// Versions a provider supports.
    pub const SUPPORTED_VERSIONS: &str = "supported_versions";
    /// Account the call or event belongs to.
    pub const ACCOUNT_JID: &str = "account_jid";
    /// Raw XML payload.
    pub const RAW_XML: &str = "raw_xml";
    /// Peer domain filter / value.
    pub const JID_DOMAIN: &str = "jid_domain";
    /// Peer local-part filter / value.
    pub const JID_LOCAL_PART: &str = "jid_local_part";
    /// Message sender.
    pub const MESSAGE_FROM: &str = "message_from";
    /// Message recipient.
    pub const MESSAGE_TO: &str = "message_to";
    /// Message body.
    pub const MESSAGE_BODY: &str = "message_body";
    /// Message delivery status.
    pub const MESSAGE_STATUS: &str = "message_status";
    /// Identifier of a callback registration.
    pub const REGISTRATION_ID: &str = "registration_id";
    /// Socket path where a consumer serves its callback.
    pub const CALLBACK_ADDRESS: &str = "callback_address";
}

/// Result envelope keys and codes.
pub mod result {
    /// Outcome code (`ERROR`, `SUCCESS` or `USER_INTERACTION_REQUIRED`).
    pub const CODE: &str = "result_code";
    /// Encoded [`ErrorDetails`](crate::ErrorDetails); present iff `ERROR`.
    pub const ERROR: &str = "error";
    /// Resumable token; present iff `USER_INTERACTION_REQUIRED`.
    pub const INTENT: &str = "intent";

    /// The call failed; see [`ERROR`].
    pub const CODE_ERROR: i32 = 0;
    /// The call succeeded.
    pub const CODE_SUCCESS: i32 = 1;
    /// The user must act first; see [`INTENT`].
    pub const CODE_USER_INTERACTION_REQUIRED: i32 = 2;
}
