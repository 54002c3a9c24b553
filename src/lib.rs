//! A small, dependency-light user-space IPv4 network stack: ARP, ICMP, UDP
//! and TCP over a raw Ethernet (or TAP) transport.
//!
//! The crate is organized the way a `smoltcp`-lineage stack is: [`wire`]
//! parses and emits on-the-wire headers, [`iface`] owns the interface state
//! machine that drives ingress/egress against a [`phy::Device`], and
//! [`socket`] holds the protocol-specific socket types that plug into an
//! [`iface::SocketSet`]. [`event_loop`] is a thin driver layered on top for
//! programs that don't want to write their own poll loop.
//!
//! # Platform contract
//!
//! This crate is agnostic to where its [`time::Instant`] values come from;
//! [`time::Instant::now`] is provided for callers happy to use the process's
//! own monotonic clock, but nothing internally calls it -- every [`time::Instant`]
//! the stack sees is handed in by the caller via [`iface::Interface::poll`].

#[macro_use]
mod macros;

pub mod buf;
pub mod chksum;
pub mod config;
pub mod event_loop;
pub mod iface;
pub mod phy;
pub mod rand;
pub mod socket;
pub mod storage;
pub mod time;
pub mod wire;
