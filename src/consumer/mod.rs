//! Synchronous receive on top of push-based deliveries.

mod rendezvous;

pub use rendezvous::RendezvousConsumer;
