//! In-memory drivers for multi-party protocol runs.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;

use crate::error::Result;
use crate::protocol::{gg, DkgResult, EngineOutput, Inbound, SchemeEngine, SignResult};
use crate::types::PartyIndex;

/// GG pre-parameters are the expensive fixture; generate a small pool once
/// per test binary and hand them out by participant index.
pub static GG_PRE_PARAMS: Lazy<Vec<gg::PreParams>> = Lazy::new(|| {
    (0..3).map(|_| gg::generate_pre_params(1024).expect("pre-params")).collect()
});

struct Pending {
    from: PartyIndex,
    to: Option<PartyIndex>,
    round: u32,
    sequence: u32,
    payload: Vec<u8>,
}

/// Drive a set of engines to completion, simulating the router's
/// per-sender sequence stamping and broadcast fan-out. An optional
/// tamper hook may rewrite payloads in flight.
pub fn run_engines(
    mut engines: BTreeMap<u16, SchemeEngine>,
    initial: Vec<(PartyIndex, Vec<crate::protocol::Outbound>)>,
    mut tamper: impl FnMut(PartyIndex, &mut Vec<u8>),
) -> Result<BTreeMap<u16, crate::protocol::ProtocolResult>> {
    let mut sequences: BTreeMap<u16, u32> = BTreeMap::new();
    let mut queue: Vec<Pending> = Vec::new();
    let mut results = BTreeMap::new();

    let mut stage = |from: PartyIndex,
                     outbound: Vec<crate::protocol::Outbound>,
                     sequences: &mut BTreeMap<u16, u32>,
                     queue: &mut Vec<Pending>| {
        for item in outbound {
            let sequence = *sequences.get(&from.0).unwrap_or(&0);
            sequences.insert(from.0, sequence + 1);
            queue.push(Pending {
                from,
                to: item.to,
                round: item.round,
                sequence,
                payload: item.payload,
            });
        }
    };

    for (from, outbound) in initial {
        stage(from, outbound, &mut sequences, &mut queue);
    }

    let mut cursor = 0;
    while cursor < queue.len() {
        let Pending { from, to, round, sequence, payload } = {
            let p = &queue[cursor];
            Pending {
                from: p.from,
                to: p.to,
                round: p.round,
                sequence: p.sequence,
                payload: p.payload.clone(),
            }
        };
        cursor += 1;

        let recipients: Vec<u16> = match to {
            Some(target) => vec![target.0],
            None => engines.keys().copied().filter(|&j| j != from.0).collect(),
        };
        for recipient in recipients {
            if results.contains_key(&recipient) {
                continue;
            }
            let Some(engine) = engines.get_mut(&recipient) else { continue };
            let mut delivered = payload.clone();
            tamper(PartyIndex(recipient), &mut delivered);
            let output: EngineOutput = engine.handle(Inbound {
                from,
                round,
                sequence,
                payload: delivered,
            })?;
            stage(PartyIndex(recipient), output.outbound, &mut sequences, &mut queue);
            if let Some(result) = output.result {
                results.insert(recipient, result);
            }
        }
    }
    Ok(results)
}

pub fn no_tamper(_from: PartyIndex, _payload: &mut Vec<u8>) {}

pub fn dkg_results(
    results: BTreeMap<u16, crate::protocol::ProtocolResult>,
) -> BTreeMap<u16, DkgResult> {
    results
        .into_iter()
        .map(|(j, r)| match r {
            crate::protocol::ProtocolResult::Dkg(dkg) => (j, *dkg),
            other => panic!("expected DKG result, got {other:?}"),
        })
        .collect()
}

pub fn sign_results(
    results: BTreeMap<u16, crate::protocol::ProtocolResult>,
) -> BTreeMap<u16, SignResult> {
    results
        .into_iter()
        .map(|(j, r)| match r {
            crate::protocol::ProtocolResult::Sign(sign) => (j, sign),
            other => panic!("expected sign result, got {other:?}"),
        })
        .collect()
}
