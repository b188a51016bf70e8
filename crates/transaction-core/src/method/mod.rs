//! Method-specific utilities for SIP transactions
//!
//! This module contains helpers for the methods that need special handling
//! at the transaction layer.

pub mod ack;
pub mod cancel;
