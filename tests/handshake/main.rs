#![cfg(feature = "rcgen")]

mod common;

mod cookie;
mod failure;
mod loopback;
mod negotiation;
mod retransmit;
mod roundtrip;
