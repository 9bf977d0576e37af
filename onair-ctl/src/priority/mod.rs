//! Priority arbitration
//!
//! The resolver owns the transactional read-modify-write of priority rows;
//! the service adds the named operations and event publication on top.

mod locks;
pub mod resolver;
pub mod service;

pub use locks::StationLocks;
pub use resolver::{
    can_preempt, classify, parse_priority, requires_fade, Resolver, TransitionRequest,
    TransitionResult,
};
pub use service::PriorityService;
