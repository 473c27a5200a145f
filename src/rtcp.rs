//! the control side of a stream: who is sending, how their clock maps to
//! ours, and how bad the network is treating us.
pub mod participant;
pub mod reports;
