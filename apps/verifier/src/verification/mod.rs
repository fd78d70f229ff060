// Verification pipeline: validate, check existing, build, sign, broadcast, confirm.
// Chain access goes through chain::ChainClient and signing through signer::SigningIdentity.

pub mod error;
pub mod handlers;
pub mod orchestrator;
pub mod outcome;
pub mod retry;
