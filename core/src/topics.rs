//! Topic catalog and per-topic codec enums.
//!
//! Topic names are part of the contract with the downstream services; each
//! logical channel has exactly one wire name. Every topic carries one codec
//! enum, so consumers route with a compile-time-checked `match` instead of
//! dynamic dispatch on type names. A kind that is not in the topic's catalog
//! decodes to [`CodecError::UnknownKind`] and is routed to dead-letter by
//! the consumer.

use crate::commands::{CreateContract, CreateInfluencer, DeleteCampaign, RegisterCampaign};
use crate::envelope::{CodecError, Envelope, Message};
use crate::events::{
    CampaignCreated, CampaignDeleted, CampaignRejected, ContractCreated, ContractError,
    InfluencerRegistered,
};

/// Suffix appended to a topic's wire name to form its dead-letter channel.
pub const DEAD_LETTER_SUFFIX: &str = "-dlq";

/// The dead-letter channel for a topic.
#[must_use]
pub fn dead_letter_topic(topic: &str) -> String {
    format!("{topic}{DEAD_LETTER_SUFFIX}")
}

/// Whether a wire name already is a dead-letter channel.
#[must_use]
pub fn is_dead_letter_topic(topic: &str) -> bool {
    topic.ends_with(DEAD_LETTER_SUFFIX)
}

/// Commands from the BFF to the Influencers service.
pub const CREATE_INFLUENCER: &str = "events-create-influencer";
/// Success events from the Influencers service.
pub const INFLUENCER_EVENTS: &str = "events-influencers";
/// Commands to the Campaigns service.
pub const CAMPAIGN_COMMANDS: &str = "commands-campaigns";
/// Success and rejection events from the Campaigns service.
pub const CAMPAIGN_EVENTS: &str = "events-campaigns";
/// Compensation channel: deletion requests and confirmations.
pub const CAMPAIGN_DELETION: &str = "events-campaigns-deletion";
/// Commands to the Contracts service.
pub const CONTRACT_COMMANDS: &str = "commands-contracts";
/// Success events from the Contracts service.
pub const CONTRACT_EVENTS: &str = "events-contracts";
/// Business/infrastructure error events from the Contracts service.
pub const CONTRACT_ERRORS: &str = "events-contracts-error";

/// Every logical channel, in dependency order; consumers that sweep all
/// channels (e.g. the dead-letter archiver) iterate this.
pub const ALL: [&str; 8] = [
    CREATE_INFLUENCER,
    INFLUENCER_EVENTS,
    CAMPAIGN_COMMANDS,
    CAMPAIGN_EVENTS,
    CAMPAIGN_DELETION,
    CONTRACT_COMMANDS,
    CONTRACT_EVENTS,
    CONTRACT_ERRORS,
];

macro_rules! topic_codec {
    (
        $(#[$meta:meta])*
        $name:ident on $topic:expr => {
            $(
                $(#[$vmeta:meta])*
                $variant:ident($payload:ty)
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                $variant($payload),
            )+
        }

        impl $name {
            /// Wire name of the topic this catalog belongs to.
            pub const TOPIC: &'static str = $topic;

            /// Decode an envelope received on this topic.
            ///
            /// # Errors
            ///
            /// Returns [`CodecError::UnknownKind`] for kinds outside this
            /// topic's catalog, or [`CodecError::Decode`] when the payload
            /// does not match the kind's schema.
            pub fn from_envelope(envelope: &Envelope) -> Result<Self, CodecError> {
                match envelope.kind.as_str() {
                    $(
                        <$payload as Message>::KIND => {
                            envelope.open::<$payload>().map(Self::$variant)
                        }
                    )+
                    other => Err(CodecError::UnknownKind {
                        kind: other.to_string(),
                        topic: Self::TOPIC,
                    }),
                }
            }
        }
    };
}

topic_codec! {
    /// Messages on [`CREATE_INFLUENCER`].
    InfluencersCommand on CREATE_INFLUENCER => {
        /// Register a new influencer.
        Create(CreateInfluencer),
    }
}

topic_codec! {
    /// Messages on [`INFLUENCER_EVENTS`].
    InfluencersEvent on INFLUENCER_EVENTS => {
        /// An influencer was registered.
        Registered(InfluencerRegistered),
    }
}

topic_codec! {
    /// Messages on [`CAMPAIGN_COMMANDS`].
    CampaignsCommand on CAMPAIGN_COMMANDS => {
        /// Create a campaign.
        Register(RegisterCampaign),
    }
}

topic_codec! {
    /// Messages on [`CAMPAIGN_EVENTS`].
    CampaignsEvent on CAMPAIGN_EVENTS => {
        /// A campaign was created.
        Created(CampaignCreated),
        /// A campaign command was rejected by a business rule.
        Rejected(CampaignRejected),
    }
}

topic_codec! {
    /// Messages on [`CAMPAIGN_DELETION`].
    ///
    /// The deletion channel carries both directions of the compensation
    /// exchange: the coordinator's request and the service's confirmation.
    CampaignDeletionMessage on CAMPAIGN_DELETION => {
        /// The coordinator requests a deletion.
        Requested(DeleteCampaign),
        /// The campaigns service confirms the deletion.
        Deleted(CampaignDeleted),
    }
}

topic_codec! {
    /// Messages on [`CONTRACT_COMMANDS`].
    ContractsCommand on CONTRACT_COMMANDS => {
        /// Create a contract.
        Create(CreateContract),
    }
}

topic_codec! {
    /// Messages on [`CONTRACT_EVENTS`].
    ContractsEvent on CONTRACT_EVENTS => {
        /// A contract was created.
        Created(ContractCreated),
    }
}

topic_codec! {
    /// Messages on [`CONTRACT_ERRORS`].
    ContractsErrorEvent on CONTRACT_ERRORS => {
        /// Contract creation failed.
        Failed(ContractError),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::envelope::CorrelationId;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn campaigns_event_routes_by_kind() {
        let rejected = CampaignRejected {
            campaign_id: Uuid::new_v4(),
            name: "n".to_string(),
            reason: "duplicate name".to_string(),
        };
        let envelope =
            Envelope::enclose(&rejected, CorrelationId::new(), "campaigns", Utc::now()).unwrap();

        match CampaignsEvent::from_envelope(&envelope).unwrap() {
            CampaignsEvent::Rejected(event) => assert_eq!(event.reason, "duplicate name"),
            CampaignsEvent::Created(_) => panic!("routed to wrong variant"),
        }
    }

    #[test]
    fn unknown_kind_is_reported_with_topic() {
        let stray = InfluencerRegistered {
            influencer_id: "inf-1".to_string(),
            name: "Ana".to_string(),
            email: "a@x.io".to_string(),
            categories: vec![],
            registered_at: Utc::now(),
        };
        // An influencer event arriving on the campaigns topic is not decodable.
        let envelope =
            Envelope::enclose(&stray, CorrelationId::new(), "influencers", Utc::now()).unwrap();

        let err = CampaignsEvent::from_envelope(&envelope).unwrap_err();
        match err {
            CodecError::UnknownKind { kind, topic } => {
                assert_eq!(kind, "InfluencerRegistered");
                assert_eq!(topic, CAMPAIGN_EVENTS);
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn dead_letter_naming_is_stable() {
        assert_eq!(dead_letter_topic(CONTRACT_COMMANDS), "commands-contracts-dlq");
        assert!(is_dead_letter_topic("commands-contracts-dlq"));
        assert!(!is_dead_letter_topic(CONTRACT_COMMANDS));
        // Every channel is covered by the sweep list exactly once.
        let unique: std::collections::HashSet<_> = ALL.iter().collect();
        assert_eq!(unique.len(), ALL.len());
    }

    #[test]
    fn deletion_channel_carries_both_directions() {
        let request = DeleteCampaign {
            campaign_id: Uuid::new_v4(),
            influencer_id: Some("inf-1".to_string()),
            reason: "compensation".to_string(),
        };
        let envelope =
            Envelope::enclose(&request, CorrelationId::new(), "coordinator", Utc::now()).unwrap();
        assert!(matches!(
            CampaignDeletionMessage::from_envelope(&envelope).unwrap(),
            CampaignDeletionMessage::Requested(_)
        ));

        let confirmation = CampaignDeleted {
            campaign_id: request.campaign_id,
            influencer_id: request.influencer_id.clone(),
            reason: request.reason.clone(),
            deleted_at: Utc::now(),
        };
        let envelope =
            Envelope::enclose(&confirmation, CorrelationId::new(), "campaigns", Utc::now())
                .unwrap();
        assert!(matches!(
            CampaignDeletionMessage::from_envelope(&envelope).unwrap(),
            CampaignDeletionMessage::Deleted(_)
        ));
    }
}
