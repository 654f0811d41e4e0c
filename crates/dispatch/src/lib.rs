//! Message dispatch and queueing engine.
//!
//! The delivery pipeline, leaf to root:
//! 1. [`provider`] picks an active account with spare daily capacity
//! 2. [`email`] / [`whatsapp`] carry one message (or one email batch) to the
//!    provider and report a structured outcome
//! 3. [`batch`] drives a claimed same-channel batch through one account and
//!    writes outcomes back to the store
//! 4. [`scanner`] periodically claims due queue entries (the single
//!    serialization point between concurrent workers) and hands per-channel
//!    partitions to the batch processor
//! 5. [`sweeper`] returns messages stranded by crashed workers to the queue
//!
//! [`store`] owns every status mutation and enforces the message state
//! machine.

pub mod batch;
pub mod email;
pub mod provider;
pub mod scanner;
pub mod store;
pub mod sweeper;
pub mod whatsapp;
