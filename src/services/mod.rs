//! Service layer: action submission, subscription management, reconnection,
//! and the final-round countdown.

pub mod actions;
pub mod countdown;
pub mod reconnect;
pub mod subscription;
