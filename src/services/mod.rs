// Payment lifecycle services. The ledger owns every durable state
// change; the other services orchestrate providers and queries around it.
pub mod ledger;
pub mod payments;
pub mod reconciliation;
pub mod refunds;
