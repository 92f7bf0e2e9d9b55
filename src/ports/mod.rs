//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the usecases layer requires
//! from the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `Notifier`: Fire-and-forget settlement events (post-commit only)
//! - `Clock`: Injectable time source for deadlines and dispute windows
//!
//! Persistence is not a port: services compose the transactional
//! primitives of `adapters::persistence::LedgerStore` directly, because
//! a transaction has to span several primitives.

pub mod clock;
pub mod notifier;
