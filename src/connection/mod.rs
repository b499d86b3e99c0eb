//! Connection lifecycle - start/stop/close across the executor and sessions.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Connection                           │
//! │  owns: broker connection, executor, session registry         │
//! │  start(): executor.resume() ──▶ session.resume() for each    │
//! │  stop():  executor.pause()  ──▶ session.pause() for each     │
//! │  close(): shutdown ─▶ close sessions ─▶ await ─▶ broker.close│
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Session                             │
//! │  one channel; one RendezvousConsumer per receive()           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod connection;
mod factory;
mod session;

pub use connection::Connection;
pub use factory::ConnectionFactory;
pub use session::Session;
