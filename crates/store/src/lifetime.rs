// Path: crates/store/src/lifetime.rs
//! IPC lifetime math (§4.5.1): the harder an IPC's proof-of-work, the longer
//! it is entitled to live before a later-dated or harder-mined successor at
//! the same key would be preferred.

use verity_types::wire::CubeKind;

const D1_SECS: f64 = 7.0 * 24.0 * 3600.0;
const D2_SECS: f64 = 28.0 * 24.0 * 3600.0;
const C1: f64 = 12.0;
const C2: f64 = 20.0;

/// Linearly interpolates an IPC's lifetime, in seconds, between
/// `(c1=12 bits, d1=7 days)` and `(c2=20 bits, d2=28 days)` over the
/// challenge level. Clamped at both ends: a challenge level at or below
/// `c1` gets the minimum lifetime, one at or above `c2` gets the maximum.
pub fn cube_lifetime_secs(challenge_level: u32) -> u64 {
    let c = f64::from(challenge_level);
    let secs = if c <= C1 {
        D1_SECS
    } else if c >= C2 {
        D2_SECS
    } else {
        let t = (c - C1) / (C2 - C1);
        D1_SECS + t * (D2_SECS - D1_SECS)
    };
    secs.round() as u64
}

/// The instant (seconds since the epoch) at which an IPC minted at `date`
/// with `challenge_level` trailing zero bits expires.
pub fn ipc_expiration(date: u64, challenge_level: u32) -> u64 {
    date.saturating_add(cube_lifetime_secs(challenge_level))
}

/// The single source of truth for "does an incoming MUC/IPC replace what's
/// stored at this key" (spec §4.5.1), expressed over raw fields rather than
/// a parsed `Cube` so both the local add path (`CubeStore::add`) and the
/// wire-facing hash-response contest check (`verity-sync`'s `SyncPeer`) stay
/// in lockstep — an IPC must contest on `ipc_expiration`, not raw date.
///
/// `stored_date`/`stored_challenge_level` are `None` when nothing is stored
/// yet at the key (or it's an incomplete placeholder), which always loses.
pub fn contest_winner(
    kind: CubeKind,
    stored_date: Option<u64>,
    stored_challenge_level: Option<u32>,
    incoming_date: u64,
    incoming_challenge_level: u32,
) -> bool {
    match kind {
        CubeKind::Muc => match stored_date {
            Some(stored_date) => incoming_date > stored_date,
            None => true,
        },
        CubeKind::Ipc => {
            let stored_expiration = match (stored_date, stored_challenge_level) {
                (Some(date), Some(challenge_level)) => ipc_expiration(date, challenge_level),
                _ => 0,
            };
            let incoming_expiration = ipc_expiration(incoming_date, incoming_challenge_level);
            incoming_expiration > stored_expiration
        }
        CubeKind::Frozen => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifetime_at_anchors_matches_spec_constants() {
        assert_eq!(cube_lifetime_secs(12), 7 * 24 * 3600);
        assert_eq!(cube_lifetime_secs(20), 28 * 24 * 3600);
    }

    #[test]
    fn lifetime_clamps_outside_anchor_range() {
        assert_eq!(cube_lifetime_secs(0), cube_lifetime_secs(12));
        assert_eq!(cube_lifetime_secs(64), cube_lifetime_secs(20));
    }

    #[test]
    fn lifetime_at_midpoint_is_between_anchors() {
        let mid = cube_lifetime_secs(16);
        assert!(mid > cube_lifetime_secs(12));
        assert!(mid < cube_lifetime_secs(20));
    }

    #[test]
    fn expiration_adds_lifetime_to_date() {
        let date = 1_000_000u64;
        let challenge_level = 12;
        assert_eq!(
            ipc_expiration(date, challenge_level),
            date + cube_lifetime_secs(challenge_level)
        );
    }

    #[test]
    fn ipc_contest_prefers_expiration_over_raw_date() {
        // Stored IPC: earlier date but much higher challenge level, so it
        // expires later than a newer-dated but weakly-mined incoming IPC.
        let stored_date = 1_000_000u64;
        let stored_challenge = 20u32;
        let incoming_date = 1_000_500u64;
        let incoming_challenge = 12u32;
        assert!(ipc_expiration(stored_date, stored_challenge) > incoming_date);
        assert!(!contest_winner(
            CubeKind::Ipc,
            Some(stored_date),
            Some(stored_challenge),
            incoming_date,
            incoming_challenge,
        ));
    }

    #[test]
    fn ipc_contest_wins_on_later_expiration() {
        assert!(contest_winner(
            CubeKind::Ipc,
            Some(1_000_000),
            Some(12),
            1_000_000 + 28 * 24 * 3600,
            20,
        ));
    }

    #[test]
    fn muc_contest_is_raw_date_only() {
        assert!(contest_winner(CubeKind::Muc, Some(100), None, 101, 0));
        assert!(!contest_winner(CubeKind::Muc, Some(100), None, 100, 0));
        assert!(contest_winner(CubeKind::Muc, None, None, 0, 0));
    }
}
