//! Approval service: proposal store, state machine, token issuance.
//!
//! The service exclusively owns proposals and tokens. No object graph is
//! exposed: tokens refer to proposals by id and intent hash, proposals
//! record the granted token id, and every lookup goes through the service.

mod auto;
mod service;

pub use auto::{AutoApprovalPolicy, DayOfWeek, DcaSchedule, PolicyChecker, TimeWindow};
pub use service::{ApprovalService, AutoApprovalContext};
