//! Entity records and their services

pub mod input;
pub mod join;
pub mod model;
pub mod service;

pub use input::{NewClient, NewInteraction, NewOpportunity, NewRecord, NewTask};
pub use join::{join_client, ClientIndex, ClientLookup, StoreClientLookup};
pub use model::{
    Client, ClientStatus, ClientType, Interaction, InteractionType, Opportunity,
    OpportunityStage, Principal, Profile, Record, RecordKind, Role, Task, TaskStatus,
};
pub use service::{RecordService, Records};
