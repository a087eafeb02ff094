//! Hardware-independent core for the dozer deep-sleep sensor node
//!
//! The node wakes, samples temperature and supply voltage, decides whether the
//! new readings are worth the radio time, and goes back to deep sleep. Deep
//! sleep is a full reboot, so everything that must survive between wakes lives
//! in a small non-volatile record managed by [`persistence::DurableStore`].
//!
//! This crate owns the decision engine ([`metric`], [`cycle`]) and the
//! collaborator boundaries ([`sensors`], [`transport`], [`power`]). It is
//! `#![no_std]` and needs no allocator, so it runs on the node itself and on
//! desktop hosts (for the simulator and tests).

#![no_std]

pub mod config;
pub mod cycle;
pub mod metric;
pub mod persistence;
pub mod power;
pub mod sensors;
pub mod transport;
