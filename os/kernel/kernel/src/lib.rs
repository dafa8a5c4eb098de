//! # Kernel processor context
//!
//! Everything an i686 processor needs before the kernel proper can run on it:
//!
//! * [`gdt`]: the fixed 128-entry segment layout,
//! * [`idt`] and [`traps`]: 256 gates and the vectors they lead to,
//! * [`tss`]: the main task segment and the fatal-trap task segments,
//! * [`processor_block`]: the per-processor root structure behind `FS`,
//! * [`cpuid`]: vendor, signature and feature identification,
//! * [`structures`]: where all of the above live in memory,
//! * [`init`]: [`initialize_processor`](init::initialize_processor), which
//!   builds and loads it all,
//! * [`entry`]: the loader handoff that runs it on the bootstrap processor.
//!
//! Privileged instructions are issued through
//! [`ProcessorControl`](processor::ProcessorControl), so the tables can be
//! built and checked on any host.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod cpuid;
pub mod entry;
pub mod gdt;
pub mod idt;
pub mod init;
pub mod privilege;
pub mod processor;
pub mod processor_block;
pub mod run_level;
pub mod structures;
pub mod traps;
pub mod tss;
