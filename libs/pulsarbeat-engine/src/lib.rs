//! Consumption core of pulsarbeat.
//!
//! ```text
//!   Broker ──subscribe()──► SubscriptionHandle ×N
//!                                   │
//!                     Pump::start() │ one task per handle
//!                                   ▼
//!   ┌─────────────── Worker ────────────────┐
//!   │ receive(cancel) → map → sink.send()    │
//!   │        ok → ack        err → nack      │
//!   └────────────────────────────────────────┘
//!                                   │
//!   PumpHandle::stop() ──► CancelSignal ──► every worker drains,
//!   PumpHandle::wait() ◄── WorkerReport ×N   closes its handle
//! ```

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod mapper;
pub mod supervisor;
pub mod worker;

pub use bootstrap::Beater;
pub use error::EngineError;
pub use mapper::{EventMapper, PulsarMapper};
pub use supervisor::{Pump, PumpHandle, PumpReport, PumpStopper};
pub use worker::{Worker, WorkerOutcome, WorkerReport, WorkerState, WorkerStats};
