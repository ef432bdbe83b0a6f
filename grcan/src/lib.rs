#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
//! # GRCAN
//!
//! ## Overview
//! This crate provides a platform-agnostic driver for the GRCAN and GRCANFD
//! CAN controllers.
//!
//! It provides the following features:
//!
//! - classical CAN and CAN FD frames over the same transfer logic, selected
//!   by a type parameter ([`Classic`] or [`Fd`])
//! - DMA ring layout via [`SharedMemory`] with type-level ring sizes
//! - blocking, complete and non-blocking reads and writes that can run
//!   concurrently with each other and with the interrupt handler
//! - bus-off, AHB error and close handling that releases every suspended
//!   caller
//! - bit timing calculation, acceptance and sync filters, statistics
//!
//! The core moves frames between the CAN bus and two circular buffers in
//! memory: it writes received frames into the receive ring and reads frames
//! to send from the transmit ring. Each ring has a read and a write offset
//! register; software owns the receive read offset and the transmit write
//! offset, the core owns the other two. An interrupt is raised when the
//! core's offset passes a programmable position, which is how a blocking
//! call is woken up.
//!
//! The platform side is covered by the [`grcan_core`] traits:
//! [`Dependencies`] gives access to the registers, the core clock, the DMA
//! address translation and the wait primitive of the RTOS. Safety
//! requirements of the `Dependencies` trait guarantee a correct state of the
//! core during its operation.
//!
//! ## Ring memory
//!
//! Both rings must start on a 1 KiB boundary in memory the core can reach
//! with its AHB master; [`SharedMemory`] takes care of the alignment and
//! [`Dependencies::dma_address`] tells the driver whether the location is
//! usable. Ring sizes must be a multiple of 4 slots and hold at least one
//! largest frame plus one slot.
//!
//! ## General usage example
//!
//! ```no_run
//! use grcan::bus::Channel;
//! use grcan::core::fugit::RateExtU32 as _;
//! use grcan::embedded_can::StandardId;
//! use grcan::generic_array::typenum::consts::*;
//! use grcan::message::{Classic, ClassicFrame};
//! use grcan::messageram::SharedMemory;
//! use grcan::prelude::*;
//!
//! struct Capacities;
//! impl grcan::messageram::Capacities for Capacities {
//!     type RxSlots = U64;
//!     type TxSlots = U32;
//! }
//! # struct Can0;
//! # unsafe impl grcan::core::CanId for Can0 {
//! #     const ADDRESS: *const () = 0x8000_0c00 as *const _;
//! # }
//! # mod hal {
//! #     pub struct Dependencies(grcan::core::Mmio<super::Can0>);
//! #     unsafe impl grcan::core::Dependencies<super::Can0> for Dependencies {
//! #         type Registers = grcan::core::Mmio<super::Can0>;
//! #         type Signal = grcan::core::StdSignal;
//! #         fn registers(&self) -> &Self::Registers { &self.0 }
//! #         fn core_clock(&self) -> grcan::core::fugit::HertzU32 { unreachable!() }
//! #         fn dma_address(&self, address: *const ()) -> Option<u32> { Some(address as u32) }
//! #     }
//! #     pub fn dependencies() -> Dependencies {
//! #         Dependencies(unsafe { grcan::core::Mmio::new() })
//! #     }
//! # }
//! # fn main() {
//!
//! let mut rings = SharedMemory::<Capacities>::new();
//! let mut can: Channel<'_, Can0, _, Capacities, Classic> =
//!     Channel::new(500.kHz(), hal::dependencies(), &mut rings).unwrap();
//!
//! // Configuration can only be changed while the channel is stopped
//! can.config_mut().unwrap().rx.complete = true;
//! can.start().unwrap();
//!
//! // `Channel::on_interrupt` must be called from the interrupt handler of
//! // the core for blocking calls to make progress.
//! let frame = ClassicFrame::new(StandardId::new(0x123).unwrap(), &[1, 2, 3]).unwrap();
//! can.write(&[frame]).unwrap();
//!
//! let mut received = [ClassicFrame::default(); 4];
//! let n = can.read(&mut received).unwrap();
//! # }
//! ```
//!
//! [`Classic`]: crate::message::Classic
//! [`Fd`]: crate::message::Fd
//! [`SharedMemory`]: crate::messageram::SharedMemory
//! [`Dependencies`]: grcan_core::Dependencies
//! [`Dependencies::dma_address`]: grcan_core::Dependencies::dma_address

pub mod bus;
pub mod config;
pub mod filter;
pub mod interrupt;
pub mod message;
pub mod messageram;
pub mod prelude;
pub mod reg;
pub mod ring;
mod rx_ring;
pub mod state;
mod tx_ring;

pub use embedded_can;
pub use generic_array;
pub use grcan_core as core;
