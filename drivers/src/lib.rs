#![no_std]
#![allow(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod net;
pub mod ppp;

pub mod netdev_tests;
pub mod packetbuf_tests;
pub mod ppp_chain_tests;
pub mod ppp_rx_tests;
pub mod ppp_tx_tests;
