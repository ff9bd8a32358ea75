// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Time-ordered identifiers for sessions, messages and parts.
//!
//! IDs are 26-character Crockford-base32 ULIDs generated from a single
//! process-wide monotonic generator, so that sorting IDs lexicographically
//! yields creation order even for IDs minted within the same millisecond.
//! Everywhere outside this module they are opaque strings.

use std::sync::{Mutex, OnceLock};

use ulid::{Generator, Ulid};

static GENERATOR: OnceLock<Mutex<Generator>> = OnceLock::new();

/// Mint a new sortable identifier.
pub fn new_id() -> String {
    let gen = GENERATOR.get_or_init(|| Mutex::new(Generator::new()));
    let mut gen = gen.lock().expect("id generator poisoned");
    match gen.generate() {
        Ok(id) => id.to_string(),
        // Random-part overflow within one millisecond: fall back to a fresh
        // ULID.  Sort order within that millisecond is undefined, which the
        // journal tolerates (it never mints that fast outside stress tests).
        Err(_) => Ulid::new().to_string(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
