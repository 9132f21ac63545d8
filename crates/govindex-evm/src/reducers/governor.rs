//! ENS governor reducer: proposals, their lifecycle, and every cast vote.

use std::collections::BTreeMap;

use alloy_primitives::{address, Address, U256};
use serde::{Deserialize, Serialize};

use govindex_core::entity::{EntityDefinition, EntityWithMetadata, IndexDefinition};
use govindex_core::error::{IndexerError, ReduceError};
use govindex_core::handler::{ContractEvent, HandlerRegistry};
use govindex_core::sort_key;
use govindex_core::types::RawLog;

use super::{address_id, decimal};
use crate::abi::{find_event, EventAbi, EventParam};
use crate::reducer::{as_pairs, Reducer};

pub const ENS_GOVERNOR_ADDRESS: Address = address!("323A76393544d5ecca80cd6ef2A560C6a395b7E3");
pub const ENS_GOVERNOR_STARTING_BLOCK: u64 = 13_533_772;

/// Quorum numerator the governor is deployed with.
pub const INITIAL_QUORUM_NUMERATOR: u64 = 10;

pub const PROPOSAL_ENTITY: &str = "Proposal";
pub const VOTE_ENTITY: &str = "Vote";
pub const VOTER_STATS_ENTITY: &str = "VoterStats";
pub const GOVERNOR_SETTINGS_ENTITY: &str = "GovernorSettings";

const PROPOSAL_CREATED: &str =
    "ProposalCreated(uint256,address,address[],uint256[],string[],bytes[],uint256,uint256,string)";
const QUORUM_NUMERATOR_UPDATED: &str = "QuorumNumeratorUpdated(uint256,uint256)";
const VOTE_CAST: &str = "VoteCast(address,uint256,uint8,uint256,string)";
const PROPOSAL_CANCELED: &str = "ProposalCanceled(uint256)";
const PROPOSAL_EXECUTED: &str = "ProposalExecuted(uint256)";
const PROPOSAL_QUEUED: &str = "ProposalQueued(uint256,uint256)";

const EVENTS: &[EventAbi] = &[
    EventAbi {
        signature: PROPOSAL_CREATED,
        params: &[
            EventParam::data("proposalId", "uint256"),
            EventParam::data("proposer", "address"),
            EventParam::data("targets", "address[]"),
            EventParam::data("values", "uint256[]"),
            EventParam::data("signatures", "string[]"),
            EventParam::data("calldatas", "bytes[]"),
            EventParam::data("startBlock", "uint256"),
            EventParam::data("endBlock", "uint256"),
            EventParam::data("description", "string"),
        ],
    },
    EventAbi {
        signature: QUORUM_NUMERATOR_UPDATED,
        params: &[
            EventParam::data("oldQuorumNumerator", "uint256"),
            EventParam::data("newQuorumNumerator", "uint256"),
        ],
    },
    EventAbi {
        signature: VOTE_CAST,
        params: &[
            EventParam::indexed("voter", "address"),
            EventParam::data("proposalId", "uint256"),
            EventParam::data("support", "uint8"),
            EventParam::data("weight", "uint256"),
            EventParam::data("reason", "string"),
        ],
    },
    EventAbi {
        signature: PROPOSAL_CANCELED,
        params: &[EventParam::data("proposalId", "uint256")],
    },
    EventAbi {
        signature: PROPOSAL_EXECUTED,
        params: &[EventParam::data("proposalId", "uint256")],
    },
    EventAbi {
        signature: PROPOSAL_QUEUED,
        params: &[
            EventParam::data("proposalId", "uint256"),
            EventParam::data("eta", "uint256"),
        ],
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GovernorEvent {
    ProposalCreated(Box<NewProposal>),
    QuorumNumeratorUpdated { new_quorum_numerator: U256 },
    VoteCast {
        voter: Address,
        proposal_id: U256,
        support: u8,
        weight: U256,
        reason: String,
    },
    ProposalCanceled { proposal_id: U256 },
    ProposalExecuted { proposal_id: U256 },
    ProposalQueued { proposal_id: U256, eta: U256 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProposal {
    pub id: U256,
    pub proposer: Address,
    pub targets: Vec<Address>,
    pub values: Vec<U256>,
    pub signatures: Vec<String>,
    pub calldatas: Vec<String>,
    pub start_block: U256,
    pub end_block: U256,
    pub description: String,
}

impl ContractEvent for GovernorEvent {
    fn signature(&self) -> &'static str {
        match self {
            Self::ProposalCreated(_) => PROPOSAL_CREATED,
            Self::QuorumNumeratorUpdated { .. } => QUORUM_NUMERATOR_UPDATED,
            Self::VoteCast { .. } => VOTE_CAST,
            Self::ProposalCanceled { .. } => PROPOSAL_CANCELED,
            Self::ProposalExecuted { .. } => PROPOSAL_EXECUTED,
            Self::ProposalQueued { .. } => PROPOSAL_QUEUED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalStatus {
    Created,
    Cancelled,
    Executed,
    Queued {
        #[serde(rename = "activatedAt")]
        activated_at: U256,
    },
}

impl ProposalStatus {
    fn label(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Cancelled => "CANCELLED",
            Self::Executed => "EXECUTED",
            Self::Queued { .. } => "QUEUED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: U256,
    pub proposer: Address,
    pub start_block: U256,
    pub end_block: U256,
    pub description: String,
    pub targets: Vec<Address>,
    pub values: Vec<U256>,
    pub signatures: Vec<String>,
    pub calldatas: Vec<String>,
    pub status: ProposalStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub block_hash: String,
    pub transaction_hash: String,
    pub log_index: u32,
    pub proposal_id: U256,
    pub voter: Address,
    /// 0 against, 1 for, 2 abstain.
    pub support: u8,
    pub weight: U256,
    pub reason: String,
}

impl Vote {
    pub fn id(&self) -> String {
        format!("{}-{}", self.transaction_hash, self.log_index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernorState {
    #[serde(with = "as_pairs")]
    pub proposals: BTreeMap<U256, Proposal>,
    pub votes: Vec<Vote>,
    pub quorum_numerator: U256,
}

impl Default for GovernorState {
    fn default() -> Self {
        Self {
            proposals: BTreeMap::new(),
            votes: vec![],
            quorum_numerator: U256::from(INITIAL_QUORUM_NUMERATOR),
        }
    }
}

// ─── Entities ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalEntity {
    #[serde(with = "decimal")]
    pub id: U256,
    pub proposer: String,
    #[serde(with = "decimal")]
    pub start_block: U256,
    #[serde(with = "decimal")]
    pub end_block: U256,
    pub description: String,
    pub targets: Vec<String>,
    pub values: Vec<String>,
    pub signatures: Vec<String>,
    pub calldatas: Vec<String>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<String>,
    #[serde(with = "decimal")]
    pub for_votes: U256,
    #[serde(with = "decimal")]
    pub against_votes: U256,
    #[serde(with = "decimal")]
    pub abstain_votes: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteEntity {
    pub id: String,
    #[serde(with = "decimal")]
    pub proposal_id: U256,
    pub voter: String,
    pub support: u8,
    #[serde(with = "decimal")]
    pub weight: U256,
    pub reason: String,
    pub block_hash: String,
    pub transaction_hash: String,
}

/// Participation metrics of one address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterStatsEntity {
    pub address: String,
    pub total_votes: u64,
    pub for_votes: u64,
    pub against_votes: u64,
    pub abstain_votes: u64,
    pub proposals_created: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernorSettingsEntity {
    #[serde(with = "decimal")]
    pub quorum_numerator: U256,
    pub proposal_count: u64,
}

#[derive(Default)]
struct Tally {
    for_votes: U256,
    against_votes: U256,
    abstain_votes: U256,
}

// ─── Reducer ─────────────────────────────────────────────────────────────────

pub struct EnsGovernor {
    address: Address,
    starting_block: u64,
    handlers: HandlerRegistry<GovernorState, GovernorEvent>,
}

impl EnsGovernor {
    /// The mainnet ENS governor.
    pub fn new() -> Self {
        Self::at(ENS_GOVERNOR_ADDRESS, ENS_GOVERNOR_STARTING_BLOCK)
    }

    pub fn at(address: Address, starting_block: u64) -> Self {
        Self {
            address,
            starting_block,
            handlers: HandlerRegistry::new()
                .on(PROPOSAL_CREATED, proposal_created)
                .on(QUORUM_NUMERATOR_UPDATED, quorum_numerator_updated)
                .on(VOTE_CAST, vote_cast)
                .on(PROPOSAL_CANCELED, proposal_canceled)
                .on(PROPOSAL_EXECUTED, proposal_executed)
                .on(PROPOSAL_QUEUED, proposal_queued),
        }
    }
}

impl Default for EnsGovernor {
    fn default() -> Self {
        Self::new()
    }
}

impl Reducer for EnsGovernor {
    type State = GovernorState;
    type Event = GovernorEvent;

    fn name(&self) -> &str {
        "ENSGovernor"
    }

    fn address(&self) -> String {
        self.address.to_string()
    }

    fn starting_block(&self) -> u64 {
        self.starting_block
    }

    fn initial_state(&self) -> GovernorState {
        GovernorState::default()
    }

    fn handlers(&self) -> &HandlerRegistry<GovernorState, GovernorEvent> {
        &self.handlers
    }

    fn decode_log(&self, log: &RawLog) -> Result<GovernorEvent, ReduceError> {
        let abi = find_event(EVENTS, log).ok_or_else(|| {
            ReduceError::Decode(format!(
                "unrecognised topic0 {}",
                log.topics.first().map(String::as_str).unwrap_or("<none>")
            ))
        })?;
        let d = abi.decode(log)?;
        let event = match abi.signature {
            PROPOSAL_CREATED => GovernorEvent::ProposalCreated(Box::new(NewProposal {
                id: d.uint("proposalId")?,
                proposer: d.address("proposer")?,
                targets: d.addresses("targets")?,
                values: d.uints("values")?,
                signatures: d.strings("signatures")?,
                calldatas: d.bytes_hex("calldatas")?,
                start_block: d.uint("startBlock")?,
                end_block: d.uint("endBlock")?,
                description: d.string("description")?,
            })),
            QUORUM_NUMERATOR_UPDATED => GovernorEvent::QuorumNumeratorUpdated {
                new_quorum_numerator: d.uint("newQuorumNumerator")?,
            },
            VOTE_CAST => GovernorEvent::VoteCast {
                voter: d.address("voter")?,
                proposal_id: d.uint("proposalId")?,
                support: d.uint8("support")?,
                weight: d.uint("weight")?,
                reason: d.string("reason")?,
            },
            PROPOSAL_CANCELED => GovernorEvent::ProposalCanceled {
                proposal_id: d.uint("proposalId")?,
            },
            PROPOSAL_EXECUTED => GovernorEvent::ProposalExecuted {
                proposal_id: d.uint("proposalId")?,
            },
            PROPOSAL_QUEUED => GovernorEvent::ProposalQueued {
                proposal_id: d.uint("proposalId")?,
                eta: d.uint("eta")?,
            },
            other => return Err(ReduceError::Decode(format!("no decoder for {other}"))),
        };
        Ok(event)
    }

    fn entity_definitions(&self) -> Vec<EntityDefinition> {
        vec![
            EntityDefinition::new(PROPOSAL_ENTITY)
                .index(IndexDefinition::typed::<ProposalEntity>("byProposer", |p| {
                    sort_key::text(&p.proposer)
                }))
                .index(IndexDefinition::typed::<ProposalEntity>("byStartBlock", |p| {
                    sort_key::uint_desc(&p.start_block.to_be_bytes::<32>())
                })),
            EntityDefinition::new(VOTE_ENTITY)
                .index(IndexDefinition::typed::<VoteEntity>("byProposal", |v| {
                    sort_key::join(&[
                        sort_key::uint_asc(&v.proposal_id.to_be_bytes::<32>()),
                        sort_key::uint_desc(&v.weight.to_be_bytes::<32>()),
                    ])
                }))
                .index(IndexDefinition::typed::<VoteEntity>("byVoter", |v| {
                    sort_key::text(&v.voter)
                })),
            EntityDefinition::new(VOTER_STATS_ENTITY).index(
                IndexDefinition::typed::<VoterStatsEntity>("byTotalVotes", |s| {
                    sort_key::u64_desc(s.total_votes)
                }),
            ),
            EntityDefinition::new(GOVERNOR_SETTINGS_ENTITY),
        ]
    }

    fn entities(&self, state: &GovernorState) -> Result<Vec<EntityWithMetadata>, IndexerError> {
        let mut tallies: BTreeMap<U256, Tally> = BTreeMap::new();
        let mut stats: BTreeMap<Address, VoterStatsEntity> = BTreeMap::new();
        let mut entities = Vec::with_capacity(state.proposals.len() + state.votes.len() + 1);

        for vote in &state.votes {
            let tally = tallies.entry(vote.proposal_id).or_default();
            let voter = stats.entry(vote.voter).or_default();
            voter.total_votes += 1;
            match vote.support {
                0 => {
                    tally.against_votes = tally.against_votes.saturating_add(vote.weight);
                    voter.against_votes += 1;
                }
                1 => {
                    tally.for_votes = tally.for_votes.saturating_add(vote.weight);
                    voter.for_votes += 1;
                }
                _ => {
                    tally.abstain_votes = tally.abstain_votes.saturating_add(vote.weight);
                    voter.abstain_votes += 1;
                }
            }

            let entity = VoteEntity {
                id: vote.id(),
                proposal_id: vote.proposal_id,
                voter: address_id(&vote.voter),
                support: vote.support,
                weight: vote.weight,
                reason: vote.reason.clone(),
                block_hash: vote.block_hash.clone(),
                transaction_hash: vote.transaction_hash.clone(),
            };
            entities.push(EntityWithMetadata::new(VOTE_ENTITY, entity.id.clone(), &entity)?);
        }

        for proposal in state.proposals.values() {
            stats.entry(proposal.proposer).or_default().proposals_created += 1;
            let tally = tallies.remove(&proposal.id).unwrap_or_default();
            let entity = ProposalEntity {
                id: proposal.id,
                proposer: address_id(&proposal.proposer),
                start_block: proposal.start_block,
                end_block: proposal.end_block,
                description: proposal.description.clone(),
                targets: proposal.targets.iter().map(address_id).collect(),
                values: proposal.values.iter().map(U256::to_string).collect(),
                signatures: proposal.signatures.clone(),
                calldatas: proposal.calldatas.clone(),
                status: proposal.status.label().to_string(),
                activated_at: match &proposal.status {
                    ProposalStatus::Queued { activated_at } => Some(activated_at.to_string()),
                    _ => None,
                },
                for_votes: tally.for_votes,
                against_votes: tally.against_votes,
                abstain_votes: tally.abstain_votes,
            };
            entities.push(EntityWithMetadata::new(
                PROPOSAL_ENTITY,
                proposal.id.to_string(),
                &entity,
            )?);
        }

        for (address, mut voter) in stats {
            voter.address = address_id(&address);
            entities.push(EntityWithMetadata::new(
                VOTER_STATS_ENTITY,
                voter.address.clone(),
                &voter,
            )?);
        }

        let settings = GovernorSettingsEntity {
            quorum_numerator: state.quorum_numerator,
            proposal_count: state.proposals.len() as u64,
        };
        entities.push(EntityWithMetadata::new(
            GOVERNOR_SETTINGS_ENTITY,
            Reducer::name(self),
            &settings,
        )?);
        Ok(entities)
    }
}

// ─── Handlers ────────────────────────────────────────────────────────────────

fn proposal_created(
    state: &mut GovernorState,
    event: &GovernorEvent,
    _log: &RawLog,
) -> Result<(), ReduceError> {
    let GovernorEvent::ProposalCreated(created) = event else {
        return Err(ReduceError::UnexpectedEvent {
            expected: PROPOSAL_CREATED,
        });
    };
    let NewProposal {
        id,
        proposer,
        targets,
        values,
        signatures,
        calldatas,
        start_block,
        end_block,
        description,
    } = created.as_ref().clone();
    state.proposals.insert(
        id,
        Proposal {
            id,
            proposer,
            start_block,
            end_block,
            description,
            targets,
            values,
            signatures,
            calldatas,
            status: ProposalStatus::Created,
        },
    );
    Ok(())
}

fn quorum_numerator_updated(
    state: &mut GovernorState,
    event: &GovernorEvent,
    _log: &RawLog,
) -> Result<(), ReduceError> {
    let GovernorEvent::QuorumNumeratorUpdated {
        new_quorum_numerator,
    } = event
    else {
        return Err(ReduceError::UnexpectedEvent {
            expected: QUORUM_NUMERATOR_UPDATED,
        });
    };
    state.quorum_numerator = *new_quorum_numerator;
    Ok(())
}

fn vote_cast(state: &mut GovernorState, event: &GovernorEvent, log: &RawLog) -> Result<(), ReduceError> {
    let GovernorEvent::VoteCast {
        voter,
        proposal_id,
        support,
        weight,
        reason,
    } = event
    else {
        return Err(ReduceError::UnexpectedEvent { expected: VOTE_CAST });
    };
    state.votes.push(Vote {
        block_hash: log.block_hash.clone(),
        transaction_hash: log.tx_hash.clone(),
        log_index: log.log_index_u32(),
        proposal_id: *proposal_id,
        voter: *voter,
        support: *support,
        weight: *weight,
        reason: reason.clone(),
    });
    Ok(())
}

fn set_status(
    state: &mut GovernorState,
    proposal_id: &U256,
    status: ProposalStatus,
) -> Result<(), ReduceError> {
    let proposal = state
        .proposals
        .get_mut(proposal_id)
        .ok_or_else(|| ReduceError::UnknownProposal {
            id: proposal_id.to_string(),
        })?;
    proposal.status = status;
    Ok(())
}

fn proposal_canceled(
    state: &mut GovernorState,
    event: &GovernorEvent,
    _log: &RawLog,
) -> Result<(), ReduceError> {
    let GovernorEvent::ProposalCanceled { proposal_id } = event else {
        return Err(ReduceError::UnexpectedEvent {
            expected: PROPOSAL_CANCELED,
        });
    };
    set_status(state, proposal_id, ProposalStatus::Cancelled)
}

fn proposal_executed(
    state: &mut GovernorState,
    event: &GovernorEvent,
    _log: &RawLog,
) -> Result<(), ReduceError> {
    let GovernorEvent::ProposalExecuted { proposal_id } = event else {
        return Err(ReduceError::UnexpectedEvent {
            expected: PROPOSAL_EXECUTED,
        });
    };
    set_status(state, proposal_id, ProposalStatus::Executed)
}

fn proposal_queued(
    state: &mut GovernorState,
    event: &GovernorEvent,
    _log: &RawLog,
) -> Result<(), ReduceError> {
    let GovernorEvent::ProposalQueued { proposal_id, eta } = event else {
        return Err(ReduceError::UnexpectedEvent {
            expected: PROPOSAL_QUEUED,
        });
    };
    set_status(state, proposal_id, ProposalStatus::Queued { activated_at: *eta })
}
